//! 重试 / 退避控制器
//!
//! 将提交错误分为 Transient / Fatal；瞬时错误对同一批次指数退避重试，超过 max_attempts 转为致命。
//! 批次之间另有固定间隔，用于遵守远端限流。

use std::time::Duration;

use crate::config::RetrySection;
use crate::ledger::{SubmitError, SubmitErrorKind};

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Fatal,
}

/// 对某次失败给出的下一步动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待后重试同一批次
    RetryAfter(Duration),
    /// 终止整个运行
    Abort,
}

/// 统一的重试策略对象，由 RunCoordinator 对所有操作复用
#[derive(Debug, Clone)]
pub struct RetryController {
    /// 单批次总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 批次间固定间隔
    pub inter_batch_delay: Duration,
    pub confirm_interval: Duration,
    pub confirm_max_polls: u32,
}

impl Default for RetryController {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            inter_batch_delay: Duration::from_millis(2000),
            confirm_interval: Duration::from_millis(1000),
            confirm_max_polls: 30,
        }
    }
}

impl RetryController {
    pub fn from_config(retry: &RetrySection, inter_batch_delay_ms: u64) -> Self {
        Self {
            max_attempts: retry.max_attempts,
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            inter_batch_delay: Duration::from_millis(inter_batch_delay_ms),
            confirm_interval: Duration::from_millis(retry.confirm_interval_ms),
            confirm_max_polls: retry.confirm_max_polls,
        }
    }

    /// 无任何等待的策略（测试与 dry-run）
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            inter_batch_delay: Duration::ZERO,
            confirm_interval: Duration::ZERO,
            confirm_max_polls: 3,
        }
    }

    pub fn classify(&self, err: &SubmitError) -> FailureClass {
        match err.kind {
            SubmitErrorKind::Network | SubmitErrorKind::Timeout | SubmitErrorKind::RateLimited => {
                FailureClass::Transient
            }
            SubmitErrorKind::InvalidArguments
            | SubmitErrorKind::Unauthorized
            | SubmitErrorKind::ExecutionFailed => FailureClass::Fatal,
        }
    }

    /// 第 `attempt` 次失败后的退避时长：base * 2^(attempt-1)，上限 max_delay
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// `attempt` 为已经失败的尝试次数（从 1 开始）
    pub fn decide(&self, err: &SubmitError, attempt: u32) -> RetryDecision {
        if self.classify(err) == FailureClass::Fatal || attempt >= self.max_attempts {
            return RetryDecision::Abort;
        }
        let delay = self.next_delay(attempt);
        match err.retry_after {
            Some(hint) => RetryDecision::RetryAfter(delay.max(hint)),
            None => RetryDecision::RetryAfter(delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> RetryController {
        RetryController {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            ..RetryController::default()
        }
    }

    #[test]
    fn test_classify() {
        let c = controller();
        assert_eq!(c.classify(&SubmitError::timeout("rpc")), FailureClass::Transient);
        assert_eq!(c.classify(&SubmitError::network("reset")), FailureClass::Transient);
        assert_eq!(
            c.classify(&SubmitError::rate_limited("429", None)),
            FailureClass::Transient
        );
        assert_eq!(
            c.classify(&SubmitError::new(SubmitErrorKind::Unauthorized, "bad cap")),
            FailureClass::Fatal
        );
        assert_eq!(
            c.classify(&SubmitError::execution_failed("MoveAbort(3)")),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_next_delay_exponential_capped() {
        let c = controller();
        assert_eq!(c.next_delay(1), Duration::from_millis(100));
        assert_eq!(c.next_delay(2), Duration::from_millis(200));
        assert_eq!(c.next_delay(3), Duration::from_millis(350));
        assert_eq!(c.next_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn test_decide_exhausts() {
        let c = controller();
        let err = SubmitError::timeout("rpc");
        assert!(matches!(c.decide(&err, 1), RetryDecision::RetryAfter(_)));
        assert!(matches!(c.decide(&err, 2), RetryDecision::RetryAfter(_)));
        assert_eq!(c.decide(&err, 3), RetryDecision::Abort);
    }

    #[test]
    fn test_decide_fatal_never_retries() {
        let c = controller();
        let err = SubmitError::new(SubmitErrorKind::InvalidArguments, "vector too long");
        assert_eq!(c.decide(&err, 1), RetryDecision::Abort);
    }

    #[test]
    fn test_retry_after_hint() {
        let c = controller();
        let err = SubmitError::rate_limited("429", Some(Duration::from_secs(2)));
        assert_eq!(c.decide(&err, 1), RetryDecision::RetryAfter(Duration::from_secs(2)));
    }
}
