//! Mock 账本客户端（用于测试与 --dry-run，无需网络）
//!
//! 默认每次提交都成功并立即确认；可按批次序号预置失败，并记录所有收到的调用。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::core::PhaseToken;
use crate::ledger::{Confirmation, LedgerCall, SubmissionClient, SubmitError, TxReference};

/// 预置失败的目标调用
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum ScriptKey {
    Batch(u64),
    /// End、抽奖等无序号调用
    Single,
}

impl ScriptKey {
    fn of(call: &LedgerCall) -> Self {
        match call.sequence {
            Some(seq) => Self::Batch(seq),
            None => Self::Single,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockLedgerClient {
    failures: Mutex<HashMap<ScriptKey, VecDeque<SubmitError>>>,
    confirmations: Mutex<VecDeque<Confirmation>>,
    submissions: Mutex<Vec<LedgerCall>>,
    committed: Mutex<Vec<LedgerCall>>,
    next_digest: AtomicU64,
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 批次 `sequence` 的前几次提交依次返回这些错误
    pub fn with_failures(self, sequence: u64, errors: Vec<SubmitError>) -> Self {
        lock(&self.failures)
            .entry(ScriptKey::Batch(sequence))
            .or_default()
            .extend(errors);
        self
    }

    /// 无序号调用（End / 抽奖 / 单次设置）的前几次提交依次返回这些错误
    pub fn with_single_call_failures(self, errors: Vec<SubmitError>) -> Self {
        lock(&self.failures)
            .entry(ScriptKey::Single)
            .or_default()
            .extend(errors);
        self
    }

    /// 依次返回的确认结果；用完后恒为 Committed
    pub fn with_confirmations(self, confirmations: Vec<Confirmation>) -> Self {
        lock(&self.confirmations).extend(confirmations);
        self
    }

    /// 所有提交尝试（含失败）
    pub fn submissions(&self) -> Vec<LedgerCall> {
        lock(&self.submissions).clone()
    }

    /// 成功返回引用的调用
    pub fn committed_calls(&self) -> Vec<LedgerCall> {
        lock(&self.committed).clone()
    }

    /// 成功调用的阶段序列，便于断言 Start / Continue / End 顺序
    pub fn committed_phases(&self) -> Vec<Option<PhaseToken>> {
        lock(&self.committed).iter().map(|c| c.phase).collect()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl SubmissionClient for MockLedgerClient {
    async fn submit(&self, call: &LedgerCall) -> Result<TxReference, SubmitError> {
        lock(&self.submissions).push(call.clone());

        let scripted = lock(&self.failures)
            .get_mut(&ScriptKey::of(call))
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            tracing::debug!("Mock ledger failing {} with {}", call.target, err);
            return Err(err);
        }

        let n = self.next_digest.fetch_add(1, Ordering::Relaxed);
        lock(&self.committed).push(call.clone());
        Ok(TxReference(format!("mock-digest-{n:06}")))
    }

    async fn confirm(&self, _reference: &TxReference) -> Result<Confirmation, SubmitError> {
        Ok(lock(&self.confirmations)
            .pop_front()
            .unwrap_or(Confirmation::Committed))
    }
}
