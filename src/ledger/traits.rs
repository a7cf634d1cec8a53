//! 提交客户端抽象
//!
//! 所有后端（HTTP 中继 / Mock）实现 SubmissionClient：submit 发送一次链上调用，confirm 查询其最终状态。
//! 错误需带足够信息供 RetryController 区分瞬时与致命。

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::LedgerCall;

/// 链上交易引用（digest）
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxReference(pub String);

impl fmt::Display for TxReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 单个批次的提交结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Committed(TxReference),
    TransientFailure(String),
    FatalFailure(String),
}

/// confirm 的查询结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Committed,
    Pending,
    Failed(String),
}

/// 提交错误类别
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitErrorKind {
    Network,
    Timeout,
    RateLimited,
    InvalidArguments,
    Unauthorized,
    /// 链上执行失败（effects status = failure）
    ExecutionFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct SubmitError {
    pub kind: SubmitErrorKind,
    pub message: String,
    /// 限流响应给出的建议等待时间
    pub retry_after: Option<Duration>,
}

impl SubmitError {
    pub fn new(kind: SubmitErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SubmitErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SubmitErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(SubmitErrorKind::RateLimited, message)
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(SubmitErrorKind::ExecutionFailed, message)
    }
}

/// 提交客户端：无状态能力，可跨批次、跨运行复用
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    /// 发送一次链上调用，返回交易引用
    async fn submit(&self, call: &LedgerCall) -> Result<TxReference, SubmitError>;

    /// 查询交易是否已最终生效
    async fn confirm(&self, reference: &TxReference) -> Result<Confirmation, SubmitError>;
}
