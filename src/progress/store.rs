//! 进度存储：每个操作一份 JSON 快照
//!
//! 文件存储先写临时文件再 rename，进程在写入中途被杀也不会留下半个快照。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::core::{OrchestratorError, Result};
use crate::ledger::{Operation, TxReference};
use crate::record::RecordKey;

/// 一个已提交批次
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommittedBatch {
    pub keys: Vec<RecordKey>,
    pub reference: TxReference,
    /// 提交成功时的尝试次数（1 表示首次即成功）
    pub attempts: u32,
    /// RFC 3339
    pub committed_at: String,
}

/// 一个操作的全部进度
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub operation: Operation,
    #[serde(default)]
    pub batches: BTreeMap<u64, CommittedBatch>,
    /// 已提交的 End 调用
    #[serde(default)]
    pub finalized: Option<TxReference>,
    /// 最近一次中止运行的错误；之后任何提交都会清除它
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl ProgressSnapshot {
    pub fn empty(operation: Operation) -> Self {
        Self {
            operation,
            batches: BTreeMap::new(),
            finalized: None,
            last_error: None,
            updated_at: None,
        }
    }

    pub fn last_committed(&self) -> Option<u64> {
        self.batches.keys().next_back().copied()
    }

    pub fn committed_record_count(&self) -> usize {
        self.batches.values().map(|b| b.keys.len()).sum()
    }
}

/// 进度存储后端
pub trait ProgressStore: Send + Sync {
    /// 读取快照；从未写过时返回空快照
    fn load(&self, operation: Operation) -> Result<ProgressSnapshot>;

    fn save(&self, snapshot: &ProgressSnapshot) -> Result<()>;
}

/// 内存存储（测试、dry-run）
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    snapshots: Mutex<HashMap<Operation, ProgressSnapshot>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn load(&self, operation: Operation) -> Result<ProgressSnapshot> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&operation)
            .cloned()
            .unwrap_or_else(|| ProgressSnapshot::empty(operation)))
    }

    fn save(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.operation, snapshot.clone());
        Ok(())
    }
}

/// 文件存储：`<dir>/<operation>.json`
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    dir: PathBuf,
}

impl FileProgressStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, operation: Operation) -> PathBuf {
        self.dir.join(format!("{}.json", operation.name()))
    }
}

impl ProgressStore for FileProgressStore {
    fn load(&self, operation: Operation) -> Result<ProgressSnapshot> {
        let path = self.path_for(operation);
        if !path.exists() {
            return Ok(ProgressSnapshot::empty(operation));
        }
        let data = std::fs::read_to_string(&path)?;
        let snapshot: ProgressSnapshot = serde_json::from_str(&data).map_err(|e| {
            OrchestratorError::Progress(format!("corrupt progress file {}: {e}", path.display()))
        })?;
        if snapshot.operation != operation {
            return Err(OrchestratorError::Progress(format!(
                "progress file {} belongs to operation {}, not {}",
                path.display(),
                snapshot.operation,
                operation
            )));
        }
        Ok(snapshot)
    }

    fn save(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(snapshot.operation);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn committed(keys: Vec<RecordKey>) -> CommittedBatch {
        CommittedBatch {
            keys,
            reference: TxReference("digest-a".into()),
            attempts: 1,
            committed_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_missing_file_is_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::new(dir.path().join("nested"));
        let snapshot = store.load(Operation::SetImages).unwrap();
        assert_eq!(snapshot, ProgressSnapshot::empty(Operation::SetImages));
        assert_eq!(snapshot.last_committed(), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let mut snapshot = ProgressSnapshot::empty(Operation::SetBadgeNames);
        snapshot
            .batches
            .insert(0, committed(vec![RecordKey::Badge(1), RecordKey::Badge(2)]));
        snapshot.batches.insert(1, committed(vec![RecordKey::Badge(3)]));

        FileProgressStore::new(dir.path()).save(&snapshot).unwrap();
        let loaded = FileProgressStore::new(dir.path())
            .load(Operation::SetBadgeNames)
            .unwrap();

        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.last_committed(), Some(1));
        assert_eq!(loaded.committed_record_count(), 3);
        assert!(!dir.path().join("set-badge-names.json.tmp").exists());
    }

    #[test]
    fn test_operation_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::new(dir.path());
        store
            .save(&ProgressSnapshot::empty(Operation::SetImages))
            .unwrap();
        std::fs::rename(
            store.path_for(Operation::SetImages),
            store.path_for(Operation::AddEligible),
        )
        .unwrap();

        assert!(matches!(
            store.load(Operation::AddEligible),
            Err(OrchestratorError::Progress(_))
        ));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::new(dir.path());
        std::fs::write(store.path_for(Operation::Raffle), "{not json").unwrap();
        let err = store.load(Operation::Raffle).unwrap_err();
        assert!(err.to_string().contains("corrupt progress file"));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryProgressStore::new();
        let mut snapshot = ProgressSnapshot::empty(Operation::AddEligible);
        snapshot.finalized = Some(TxReference("x".into()));
        store.save(&snapshot).unwrap();
        assert_eq!(store.load(Operation::AddEligible).unwrap(), snapshot);
        assert!(store.load(Operation::SetImages).unwrap().batches.is_empty());
    }
}
