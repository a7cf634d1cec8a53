//! 进度跟踪：哪些批次已提交、从哪里续跑
//!
//! 每次变更都先写存储再更新内存，存储写失败时内存状态不变。

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::{OrchestratorError, Result};
use crate::ledger::{Operation, TxReference};
use crate::progress::{CommittedBatch, MemoryProgressStore, ProgressSnapshot, ProgressStore};
use crate::record::RecordKey;

pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    snapshot: ProgressSnapshot,
}

impl ProgressTracker {
    /// 从存储加载某操作的进度
    pub fn open(store: Arc<dyn ProgressStore>, operation: Operation) -> Result<Self> {
        let snapshot = store.load(operation)?;
        if let Some(last) = snapshot.last_committed() {
            tracing::info!(
                "Loaded progress for {}: {} batches committed (last #{})",
                operation,
                snapshot.batches.len(),
                last
            );
        }
        Ok(Self { store, snapshot })
    }

    pub fn in_memory(operation: Operation) -> Self {
        Self {
            store: Arc::new(MemoryProgressStore::new()),
            snapshot: ProgressSnapshot::empty(operation),
        }
    }

    pub fn operation(&self) -> Operation {
        self.snapshot.operation
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn is_committed(&self, sequence: u64) -> bool {
        self.snapshot.batches.contains_key(&sequence)
    }

    pub fn last_committed(&self) -> Option<u64> {
        self.snapshot.last_committed()
    }

    pub fn next_sequence(&self) -> u64 {
        self.last_committed().map_or(0, |last| last + 1)
    }

    /// 至少一个批次已提交（分阶段操作已发送 Start）
    pub fn phase_started(&self) -> bool {
        !self.snapshot.batches.is_empty()
    }

    pub fn committed_keys(&self) -> HashSet<RecordKey> {
        self.snapshot
            .batches
            .values()
            .flat_map(|b| b.keys.iter().copied())
            .collect()
    }

    pub fn is_finalized(&self) -> bool {
        self.snapshot.finalized.is_some()
    }

    /// 记录批次提交；序号必须大于已提交的最大序号
    pub fn mark_committed(
        &mut self,
        sequence: u64,
        keys: Vec<RecordKey>,
        reference: &TxReference,
        attempts: u32,
    ) -> Result<()> {
        if let Some(last) = self.last_committed() {
            if sequence <= last {
                return Err(OrchestratorError::SequenceRegression { sequence, last });
            }
        }
        let now = chrono::Utc::now().to_rfc3339();
        let mut next = self.snapshot.clone();
        next.batches.insert(
            sequence,
            CommittedBatch {
                keys,
                reference: reference.clone(),
                attempts,
                committed_at: now.clone(),
            },
        );
        next.last_error = None;
        next.updated_at = Some(now);
        self.store.save(&next)?;
        self.snapshot = next;
        Ok(())
    }

    pub fn mark_finalized(&mut self, reference: &TxReference) -> Result<()> {
        let mut next = self.snapshot.clone();
        next.finalized = Some(reference.clone());
        next.last_error = None;
        next.updated_at = Some(chrono::Utc::now().to_rfc3339());
        self.store.save(&next)?;
        self.snapshot = next;
        Ok(())
    }

    /// 保存中止原因，供 `status` 与下次运行查看；不影响已提交批次
    pub fn record_failure(&mut self, message: &str) -> Result<()> {
        let mut next = self.snapshot.clone();
        next.last_error = Some(message.to_string());
        next.updated_at = Some(chrono::Utc::now().to_rfc3339());
        self.store.save(&next)?;
        self.snapshot = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::FileProgressStore;
    use tempfile::TempDir;

    fn reference(s: &str) -> TxReference {
        TxReference(s.to_string())
    }

    #[test]
    fn test_fresh_tracker() {
        let tracker = ProgressTracker::in_memory(Operation::AddEligible);
        assert_eq!(tracker.next_sequence(), 0);
        assert!(!tracker.phase_started());
        assert!(!tracker.is_committed(0));
        assert!(tracker.committed_keys().is_empty());
    }

    #[test]
    fn test_mark_committed_and_regression() {
        let mut tracker = ProgressTracker::in_memory(Operation::SetBadgeNames);
        tracker
            .mark_committed(0, vec![RecordKey::Badge(1)], &reference("a"), 1)
            .unwrap();
        tracker
            .mark_committed(1, vec![RecordKey::Badge(2)], &reference("b"), 3)
            .unwrap();

        assert!(tracker.is_committed(1));
        assert_eq!(tracker.next_sequence(), 2);
        assert_eq!(tracker.snapshot().batches[&1].attempts, 3);

        let err = tracker
            .mark_committed(1, vec![RecordKey::Badge(9)], &reference("c"), 1)
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::SequenceRegression { sequence: 1, last: 1 }
        ));
        assert_eq!(tracker.committed_keys().len(), 2);
    }

    #[test]
    fn test_reopen_from_file() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ProgressStore> = Arc::new(FileProgressStore::new(dir.path()));

        let mut tracker = ProgressTracker::open(store.clone(), Operation::AuctionWinners).unwrap();
        tracker
            .mark_committed(0, vec![RecordKey::Token(1)], &reference("a"), 1)
            .unwrap();
        tracker.mark_finalized(&reference("end")).unwrap();

        let reopened = ProgressTracker::open(store, Operation::AuctionWinners).unwrap();
        assert!(reopened.phase_started());
        assert!(reopened.is_finalized());
        assert_eq!(reopened.last_committed(), Some(0));
        assert!(reopened.committed_keys().contains(&RecordKey::Token(1)));
    }

    #[test]
    fn test_failure_persisted_until_next_commit() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ProgressStore> = Arc::new(FileProgressStore::new(dir.path()));

        let mut tracker = ProgressTracker::open(store.clone(), Operation::SetImages).unwrap();
        tracker.record_failure("batch #0: MoveAbort 2").unwrap();

        let mut reopened = ProgressTracker::open(store, Operation::SetImages).unwrap();
        assert_eq!(
            reopened.snapshot().last_error.as_deref(),
            Some("batch #0: MoveAbort 2")
        );
        assert_eq!(reopened.next_sequence(), 0);

        reopened
            .mark_committed(0, vec![RecordKey::Token(1)], &reference("a"), 1)
            .unwrap();
        assert_eq!(reopened.snapshot().last_error, None);
    }

    struct FailingStore;

    impl ProgressStore for FailingStore {
        fn load(&self, operation: Operation) -> Result<ProgressSnapshot> {
            Ok(ProgressSnapshot::empty(operation))
        }

        fn save(&self, _snapshot: &ProgressSnapshot) -> Result<()> {
            Err(OrchestratorError::Progress("disk full".into()))
        }
    }

    #[test]
    fn test_failed_save_leaves_state_unchanged() {
        let mut tracker = ProgressTracker::open(Arc::new(FailingStore), Operation::SetImages).unwrap();
        assert!(tracker
            .mark_committed(0, vec![RecordKey::Token(1)], &reference("a"), 1)
            .is_err());
        assert!(!tracker.is_committed(0));
        assert_eq!(tracker.next_sequence(), 0);
    }
}
