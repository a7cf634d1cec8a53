//! 分阶段调用状态机：Start → Continue* → End
//!
//! 编排器每提交一个批次前向状态机要令牌，提交成功后回报；违反顺序即 PhaseSequenceViolation。
//! 重启后由进度存储恢复状态，保证 Start 只发送一次。

use serde::{Deserialize, Serialize};

use crate::core::{OrchestratorError, Result};

/// 调用阶段令牌
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseToken {
    Start,
    Continue,
    End,
}

/// 状态机状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseState {
    NotStarted,
    Started,
    Continuing,
    Ended,
    Aborted,
}

impl PhaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Aborted)
    }
}

/// 结算（End）调用的聚合参数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeParams {
    pub clearing_price: u64,
    pub discounts: i64,
}

impl FinalizeParams {
    /// 成交价不得低于阈值，折扣数不得为负；在任何网络调用之前检查
    pub fn validate(&self, min_clearing_price: u64) -> Result<()> {
        if self.clearing_price < min_clearing_price {
            return Err(OrchestratorError::InvalidFinalizationParameters(format!(
                "clearing price {} is below the minimum {}",
                self.clearing_price, min_clearing_price
            )));
        }
        if self.discounts < 0 {
            return Err(OrchestratorError::InvalidFinalizationParameters(format!(
                "discounts must be non-negative, got {}",
                self.discounts
            )));
        }
        Ok(())
    }
}

/// 阶段状态机；`expected` 为下一个允许提交的批次序号
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    state: PhaseState,
    expected: Option<u64>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            state: PhaseState::NotStarted,
            expected: None,
        }
    }

    /// 从进度存储恢复：`last_committed` 为已提交的最大批次号，`finalized` 表示 End 已提交
    pub fn resume(last_committed: Option<u64>, finalized: bool) -> Self {
        match (last_committed, finalized) {
            (_, true) => Self {
                state: PhaseState::Ended,
                expected: None,
            },
            (Some(0), false) => Self {
                state: PhaseState::Started,
                expected: Some(1),
            },
            (Some(last), false) => Self {
                state: PhaseState::Continuing,
                expected: Some(last + 1),
            },
            (None, false) => Self::new(),
        }
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    /// 批次 `sequence` 应携带的令牌
    pub fn token_for(&self, sequence: u64) -> Result<PhaseToken> {
        match self.state {
            PhaseState::NotStarted => Ok(PhaseToken::Start),
            PhaseState::Started | PhaseState::Continuing => {
                if Some(sequence) != self.expected {
                    return Err(violation(format!(
                        "batch #{sequence} submitted out of order (expected #{})",
                        self.expected.unwrap_or_default()
                    )));
                }
                Ok(PhaseToken::Continue)
            }
            PhaseState::Ended | PhaseState::Aborted => Err(violation(format!(
                "batch #{sequence} submitted after phase reached {:?}",
                self.state
            ))),
        }
    }

    /// 批次提交成功后推进状态
    pub fn on_committed(&mut self, sequence: u64, token: PhaseToken) -> Result<()> {
        let expected_token = self.token_for(sequence)?;
        if expected_token != token {
            return Err(violation(format!(
                "batch #{sequence} carried {token:?} but {expected_token:?} was due"
            )));
        }
        self.state = match token {
            PhaseToken::Start => PhaseState::Started,
            _ => PhaseState::Continuing,
        };
        self.expected = Some(sequence + 1);
        Ok(())
    }

    /// End 之前的检查：必须已 Start 且未终止
    pub fn ensure_can_end(&self) -> Result<()> {
        match self.state {
            PhaseState::Started | PhaseState::Continuing => Ok(()),
            other => Err(violation(format!("End requested while phase is {other:?}"))),
        }
    }

    pub fn on_ended(&mut self) -> Result<()> {
        self.ensure_can_end()?;
        self.state = PhaseState::Ended;
        self.expected = None;
        Ok(())
    }

    pub fn abort(&mut self) {
        if self.state != PhaseState::Ended {
            self.state = PhaseState::Aborted;
        }
    }
}

fn violation(msg: String) -> OrchestratorError {
    tracing::error!("Phase sequence violation: {}", msg);
    OrchestratorError::PhaseSequenceViolation(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_continue_end() {
        let mut m = PhaseMachine::new();
        assert_eq!(m.token_for(0).unwrap(), PhaseToken::Start);
        m.on_committed(0, PhaseToken::Start).unwrap();
        assert_eq!(m.state(), PhaseState::Started);

        assert_eq!(m.token_for(1).unwrap(), PhaseToken::Continue);
        m.on_committed(1, PhaseToken::Continue).unwrap();
        assert_eq!(m.state(), PhaseState::Continuing);

        m.on_ended().unwrap();
        assert_eq!(m.state(), PhaseState::Ended);
        assert!(m.token_for(2).is_err());
    }

    #[test]
    fn test_skipping_batch_is_violation() {
        let mut m = PhaseMachine::new();
        m.on_committed(0, PhaseToken::Start).unwrap();
        let err = m.token_for(2).unwrap_err();
        assert!(matches!(err, OrchestratorError::PhaseSequenceViolation(_)));
    }

    #[test]
    fn test_continue_before_start_is_violation() {
        let mut m = PhaseMachine::new();
        let err = m.on_committed(0, PhaseToken::Continue).unwrap_err();
        assert!(matches!(err, OrchestratorError::PhaseSequenceViolation(_)));
    }

    #[test]
    fn test_end_before_start_is_violation() {
        let mut m = PhaseMachine::new();
        assert!(matches!(
            m.on_ended(),
            Err(OrchestratorError::PhaseSequenceViolation(_))
        ));
    }

    #[test]
    fn test_resume_never_restarts() {
        let m = PhaseMachine::resume(Some(4), false);
        assert_eq!(m.state(), PhaseState::Continuing);
        assert_eq!(m.token_for(5).unwrap(), PhaseToken::Continue);

        let m = PhaseMachine::resume(Some(0), false);
        assert_eq!(m.token_for(1).unwrap(), PhaseToken::Continue);

        let m = PhaseMachine::resume(None, false);
        assert_eq!(m.token_for(0).unwrap(), PhaseToken::Start);

        let m = PhaseMachine::resume(Some(2), true);
        assert_eq!(m.state(), PhaseState::Ended);
    }

    #[test]
    fn test_abort_is_terminal() {
        let mut m = PhaseMachine::new();
        m.on_committed(0, PhaseToken::Start).unwrap();
        m.abort();
        assert!(m.state().is_terminal());
        assert!(m.token_for(1).is_err());
        assert!(m.ensure_can_end().is_err());
    }

    #[test]
    fn test_finalize_params() {
        let min = 1_000_000_000;
        assert!(FinalizeParams { clearing_price: min, discounts: 0 }.validate(min).is_ok());
        assert!(matches!(
            FinalizeParams { clearing_price: min - 1, discounts: 0 }.validate(min),
            Err(OrchestratorError::InvalidFinalizationParameters(_))
        ));
        assert!(matches!(
            FinalizeParams { clearing_price: min, discounts: -1 }.validate(min),
            Err(OrchestratorError::InvalidFinalizationParameters(_))
        ));
    }
}
