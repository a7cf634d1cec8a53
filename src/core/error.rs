//! 编排器错误类型
//!
//! 规划期错误（容量、地址格式、重复、结算参数）在任何网络调用前失败；
//! 提交期错误携带 `last_committed`，供调用方决定何时重跑（进度存储保持完整）。

use thiserror::Error;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid batch capacity: {0} (must be a positive integer)")]
    InvalidCapacity(usize),

    #[error("Malformed identifier: {0:?}")]
    MalformedIdentifier(String),

    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Invalid finalization parameters: {0}")]
    InvalidFinalizationParameters(String),

    /// 瞬时错误重试耗尽
    #[error(
        "{call} failed after {attempts} attempts: {reason} (last committed: {})",
        fmt_last(.last_committed)
    )]
    TransientSubmissionFailure {
        /// 失败的调用，如 `batch #3`、`finalize_end`
        call: String,
        attempts: u32,
        reason: String,
        last_committed: Option<u64>,
    },

    #[error(
        "{call} failed permanently after {attempts} attempt(s): {reason} (last committed: {})",
        fmt_last(.last_committed)
    )]
    FatalSubmissionFailure {
        call: String,
        /// 含此前的瞬时失败
        attempts: u32,
        reason: String,
        last_committed: Option<u64>,
    },

    /// 编排器自身的调用顺序错误（Continue 先于 Start 等），属于程序缺陷
    #[error("Phase sequence violation: {0}")]
    PhaseSequenceViolation(String),

    #[error("Sequence regression: batch #{sequence} is not after last committed #{last}")]
    SequenceRegression { sequence: u64, last: u64 },

    /// 在批次之间或退避等待中收到取消
    #[error("Run cancelled")]
    Cancelled,

    #[error("Progress store error: {0}")]
    Progress(String),

    #[error("Loader error: {0}")]
    Loader(String),

    #[error("Config error: {0}")]
    Config(String),
}

fn fmt_last(last: &Option<u64>) -> String {
    match last {
        Some(seq) => format!("#{seq}"),
        None => "none".to_string(),
    }
}

impl OrchestratorError {
    /// 是否为规划期错误（尚未发生任何链上调用）
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCapacity(_)
                | Self::MalformedIdentifier(_)
                | Self::DuplicateIdentifier(_)
                | Self::InvalidFinalizationParameters(_)
        )
    }

    /// 提交期失败时该调用的总尝试次数
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::TransientSubmissionFailure { attempts, .. }
            | Self::FatalSubmissionFailure { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// 提交期失败时最后一个已提交批次
    pub fn last_committed(&self) -> Option<u64> {
        match self {
            Self::TransientSubmissionFailure { last_committed, .. }
            | Self::FatalSubmissionFailure { last_committed, .. } => *last_committed,
            _ => None,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        Self::Progress(e.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Progress(e.to_string())
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planning_errors() {
        assert!(OrchestratorError::InvalidCapacity(0).is_planning_error());
        assert!(OrchestratorError::DuplicateIdentifier("0x1".into()).is_planning_error());
        assert!(!OrchestratorError::PhaseSequenceViolation("x".into()).is_planning_error());
    }

    #[test]
    fn test_last_committed_in_message() {
        let err = OrchestratorError::FatalSubmissionFailure {
            call: "batch #3".into(),
            attempts: 3,
            reason: "MoveAbort".into(),
            last_committed: Some(2),
        };
        assert_eq!(err.last_committed(), Some(2));
        assert_eq!(err.attempts(), Some(3));
        assert!(err.to_string().starts_with("batch #3 failed permanently"));
        assert!(err.to_string().contains("last committed: #2"));

        let err = OrchestratorError::TransientSubmissionFailure {
            call: "batch #0".into(),
            attempts: 5,
            reason: "timeout".into(),
            last_committed: None,
        };
        assert!(err.to_string().contains("none"));
        assert_eq!(OrchestratorError::Cancelled.attempts(), None);
    }
}
