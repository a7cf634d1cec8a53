//! 运行状态与报告投影
//!
//! RunState 只由 RunCoordinator 在一次运行中修改；结束时投影为可序列化的 RunReport。

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::core::PhaseState;
use crate::ledger::{Operation, Outcome, TxReference};
use crate::record::RecordKey;

/// 运行结束方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Completed,
    /// 收到取消信号，进度已保存，可续跑
    Cancelled,
}

/// 单个批次在本次运行中的结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchReport {
    pub sequence: u64,
    pub records: usize,
    pub attempts: u32,
    pub retries: u32,
    pub reference: TxReference,
}

/// 面向调用方的运行报告
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub operation: Operation,
    pub status: RunStatus,
    pub total_records: usize,
    pub records_committed: usize,
    /// 之前的运行已提交、本次跳过的记录数
    pub records_skipped: usize,
    pub batches: Vec<BatchReport>,
    pub final_phase: Option<PhaseState>,
    pub finalized: Option<TxReference>,
    pub started_at: String,
    pub finished_at: String,
}

impl RunReport {
    pub fn batches_committed(&self) -> usize {
        self.batches.len()
    }

    pub fn retries_for(&self, sequence: u64) -> Option<u32> {
        self.batches
            .iter()
            .find(|b| b.sequence == sequence)
            .map(|b| b.retries)
    }

    pub fn total_retries(&self) -> u32 {
        self.batches.iter().map(|b| b.retries).sum()
    }
}

/// 一次运行的内部状态
#[derive(Debug)]
pub struct RunState {
    run_id: String,
    operation: Operation,
    started_at: String,
    pub total_records: usize,
    pub records_skipped: usize,
    /// 本次运行提交的记录
    pub committed_keys: HashSet<RecordKey>,
    pub current_phase: Option<PhaseState>,
    pub last_error: Option<String>,
    attempts: BTreeMap<u64, u32>,
    batches: Vec<BatchReport>,
    finalized: Option<TxReference>,
}

impl RunState {
    pub fn new(operation: Operation, total_records: usize, records_skipped: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            operation,
            started_at: chrono::Utc::now().to_rfc3339(),
            total_records,
            records_skipped,
            committed_keys: HashSet::new(),
            current_phase: None,
            last_error: None,
            attempts: BTreeMap::new(),
            batches: Vec::new(),
            finalized: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn attempts_for(&self, sequence: u64) -> u32 {
        self.attempts.get(&sequence).copied().unwrap_or(0)
    }

    /// 批次的最终结果；`attempts` 为该批次的总尝试次数
    pub fn record_outcome(
        &mut self,
        sequence: u64,
        keys: &[RecordKey],
        attempts: u32,
        outcome: &Outcome,
    ) {
        self.attempts.insert(sequence, attempts);
        match outcome {
            Outcome::Committed(reference) => {
                self.committed_keys.extend(keys.iter().copied());
                self.batches.push(BatchReport {
                    sequence,
                    records: keys.len(),
                    attempts,
                    retries: attempts.saturating_sub(1),
                    reference: reference.clone(),
                });
            }
            Outcome::TransientFailure(reason) | Outcome::FatalFailure(reason) => {
                self.last_error = Some(format!("batch #{sequence}: {reason}"));
            }
        }
    }

    pub fn record_finalized(&mut self, reference: &TxReference) {
        self.finalized = Some(reference.clone());
    }

    pub fn set_phase(&mut self, phase: PhaseState) {
        self.current_phase = Some(phase);
    }

    pub fn project(&self, status: RunStatus) -> RunReport {
        RunReport {
            run_id: self.run_id.clone(),
            operation: self.operation,
            status,
            total_records: self.total_records,
            records_committed: self.committed_keys.len(),
            records_skipped: self.records_skipped,
            batches: self.batches.clone(),
            final_phase: self.current_phase,
            finalized: self.finalized.clone(),
            started_at: self.started_at.clone(),
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
