//! RunCoordinator：一次迁移运行的主控循环
//!
//! 校验 → 跳过已提交记录 → 规划批次 → 逐批（阶段令牌、提交、确认、重试）→ 记录进度 → 报告。
//! 单 worker 顺序提交；取消只在批次之间与等待期间生效，不会打断进行中的提交。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::EnvironmentConfig;
use crate::core::{
    plan_from, validate_and_sort, validate_unique, FailureClass, FinalizeParams,
    OrchestratorError, PhaseMachine, Result, RetryController, RetryDecision, RunReport, RunState,
    RunStatus, SetupOptions, SetupPlan, SetupReport, SetupStep,
};
use crate::ledger::{
    AddressOrdering, CallBuilder, Confirmation, LedgerCall, Operation, Outcome, SubmissionClient,
    TxReference,
};
use crate::progress::ProgressTracker;
use crate::record::{Record, RecordKey};

pub struct RunCoordinator {
    client: Arc<dyn SubmissionClient>,
    calls: CallBuilder,
    retry: RetryController,
    capacity: usize,
    address_capacity: usize,
    min_clearing_price: u64,
    cancel: CancellationToken,
}

impl RunCoordinator {
    pub fn new(client: Arc<dyn SubmissionClient>, config: &EnvironmentConfig) -> Self {
        Self {
            client,
            calls: CallBuilder::new(config.ledger.clone()),
            retry: RetryController::from_config(&config.retry, config.batch.delay_ms),
            capacity: config.batch.capacity,
            address_capacity: config.batch.address_capacity,
            min_clearing_price: config.auction.min_clearing_price,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryController) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_capacities(mut self, capacity: usize, address_capacity: usize) -> Self {
        self.capacity = capacity;
        self.address_capacity = address_capacity;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn calls(&self) -> &CallBuilder {
        &self.calls
    }

    fn capacity_for(&self, operation: Operation) -> usize {
        if operation.uses_address_capacity() {
            self.address_capacity
        } else {
            self.capacity
        }
    }

    /// 地址名单操作的入口：先按操作要求校验（去重 / 排序），再交给 `run`
    pub async fn run_addresses<S: AsRef<str>>(
        &self,
        operation: Operation,
        addresses: &[S],
        finalize: Option<FinalizeParams>,
        tracker: &mut ProgressTracker,
    ) -> Result<RunReport> {
        let parsed = match (operation, operation.address_ordering()) {
            (Operation::AddEligible | Operation::AuctionWinners, AddressOrdering::Sorted) => {
                validate_and_sort(addresses)?
            }
            (Operation::AddEligible | Operation::AuctionWinners, AddressOrdering::Unique) => {
                validate_unique(addresses)?
            }
            _ => {
                return Err(OrchestratorError::Config(format!(
                    "{operation} does not take a plain address list"
                )))
            }
        };
        let records = parsed.into_iter().map(Record::Address).collect();
        self.run(operation, records, finalize, tracker).await
    }

    /// 执行一个批量操作；分阶段操作可带 FinalizeParams，在最后一批之后发送 End
    pub async fn run(
        &self,
        operation: Operation,
        records: Vec<Record>,
        finalize: Option<FinalizeParams>,
        tracker: &mut ProgressTracker,
    ) -> Result<RunReport> {
        // 规划期检查：任何失败都发生在网络调用之前
        if operation.is_single_call() {
            return Err(OrchestratorError::Config(format!(
                "{operation} is a single-call operation, use submit_single"
            )));
        }
        if tracker.operation() != operation {
            return Err(OrchestratorError::Progress(format!(
                "progress tracker belongs to {}, not {}",
                tracker.operation(),
                operation
            )));
        }
        if let Some(params) = &finalize {
            if !operation.is_phased() {
                return Err(OrchestratorError::Config(format!(
                    "{operation} has no finalize phase"
                )));
            }
            params.validate(self.min_clearing_price)?;
        }

        let records = prepare(operation, records)?;
        let total = records.len();
        let committed = tracker.committed_keys();
        let remaining: Vec<Record> = records
            .into_iter()
            .filter(|r| !committed.contains(&r.key()))
            .collect();
        let skipped = total - remaining.len();
        let batches = plan_from(
            remaining,
            self.capacity_for(operation),
            tracker.next_sequence(),
        )?;

        let mut state = RunState::new(operation, total, skipped);
        let mut phase = operation
            .is_phased()
            .then(|| PhaseMachine::resume(tracker.last_committed(), tracker.is_finalized()));
        if let Some(machine) = &phase {
            state.set_phase(machine.state());
        }

        tracing::info!(
            "Run {} started: {} with {} records ({} already committed, {} batches planned from #{})",
            state.run_id(),
            operation,
            total,
            skipped,
            batches.len(),
            tracker.next_sequence()
        );

        let mut status = RunStatus::Completed;
        let mut submitted_any = false;
        for batch in batches {
            if submitted_any {
                if let Err(OrchestratorError::Cancelled) =
                    self.pause(self.retry.inter_batch_delay).await
                {
                    status = RunStatus::Cancelled;
                    break;
                }
            }
            if self.cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }

            let sequence = batch.sequence;
            let token = match &phase {
                Some(machine) => Some(machine.token_for(sequence)?),
                None => None,
            };
            let call = self.calls.batch_call(operation, &batch, token)?;
            let keys: Vec<RecordKey> = batch.records.iter().map(Record::key).collect();
            submitted_any = true;

            let label = format!("batch #{sequence}");
            match self
                .submit_with_retry(&call, &label, tracker.last_committed())
                .await
            {
                Ok((reference, attempts)) => {
                    tracker.mark_committed(sequence, keys.clone(), &reference, attempts)?;
                    if let (Some(machine), Some(token)) = (phase.as_mut(), token) {
                        machine.on_committed(sequence, token)?;
                        state.set_phase(machine.state());
                    }
                    state.record_outcome(
                        sequence,
                        &keys,
                        attempts,
                        &Outcome::Committed(reference.clone()),
                    );
                    tracing::info!(
                        "Batch #{} committed: {} records, {} attempt(s), reference {}",
                        sequence,
                        keys.len(),
                        attempts,
                        reference
                    );
                }
                Err(OrchestratorError::Cancelled) => {
                    status = RunStatus::Cancelled;
                    break;
                }
                Err(e) => {
                    if let Some(machine) = phase.as_mut() {
                        machine.abort();
                        state.set_phase(machine.state());
                    }
                    let outcome = match &e {
                        OrchestratorError::TransientSubmissionFailure { reason, .. } => {
                            Outcome::TransientFailure(reason.clone())
                        }
                        OrchestratorError::FatalSubmissionFailure { reason, .. } => {
                            Outcome::FatalFailure(reason.clone())
                        }
                        other => Outcome::FatalFailure(other.to_string()),
                    };
                    state.record_outcome(sequence, &keys, e.attempts().unwrap_or(1), &outcome);
                    return Err(abort_run(&state, tracker, e));
                }
            }
        }

        if status == RunStatus::Completed {
            if let (Some(params), Some(machine)) = (finalize, phase.as_mut()) {
                if let Some(reference) = tracker.snapshot().finalized.clone() {
                    tracing::info!("{} already finalized ({}), skipping End", operation, reference);
                    state.record_finalized(&reference);
                } else {
                    let paced = if submitted_any {
                        self.pause(self.retry.inter_batch_delay).await
                    } else {
                        Ok(())
                    };
                    let result = match paced {
                        Ok(()) => self.finalize_with(machine, &params, tracker).await,
                        Err(e) => Err(e),
                    };
                    state.set_phase(machine.state());
                    match result {
                        Ok(reference) => state.record_finalized(&reference),
                        Err(OrchestratorError::Cancelled) => status = RunStatus::Cancelled,
                        Err(e) => {
                            tracing::error!("Run {} aborted at End: {}", state.run_id(), e);
                            return Err(e);
                        }
                    }
                }
            }
        }

        let report = state.project(status);
        match report.status {
            RunStatus::Completed => tracing::info!(
                "Run {} completed: {} records committed in {} batches, {} skipped, {} retries",
                report.run_id,
                report.records_committed,
                report.batches_committed(),
                report.records_skipped,
                report.total_retries()
            ),
            RunStatus::Cancelled => tracing::warn!(
                "Run {} cancelled after {} batches; resume from #{}",
                report.run_id,
                report.batches_committed(),
                tracker.next_sequence()
            ),
        }
        Ok(report)
    }

    /// 单独发送 End（批次已在之前的运行中提交）；已结算时直接返回已有引用
    pub async fn finalize(
        &self,
        params: FinalizeParams,
        tracker: &mut ProgressTracker,
    ) -> Result<TxReference> {
        if !tracker.operation().is_phased() {
            return Err(OrchestratorError::Config(format!(
                "{} has no finalize phase",
                tracker.operation()
            )));
        }
        params.validate(self.min_clearing_price)?;
        if let Some(reference) = tracker.snapshot().finalized.clone() {
            tracing::info!("Already finalized ({}), nothing to send", reference);
            return Ok(reference);
        }
        let mut machine = PhaseMachine::resume(tracker.last_committed(), false);
        self.finalize_with(&mut machine, &params, tracker).await
    }

    async fn finalize_with(
        &self,
        machine: &mut PhaseMachine,
        params: &FinalizeParams,
        tracker: &mut ProgressTracker,
    ) -> Result<TxReference> {
        machine.ensure_can_end()?;
        let call = self.calls.finalize_call(params);
        match self
            .submit_with_retry(&call, "finalize_end", tracker.last_committed())
            .await
        {
            Ok((reference, attempts)) => {
                tracker.mark_finalized(&reference)?;
                machine.on_ended()?;
                tracing::info!(
                    "Finalized at clearing price {} with {} discounts: {} ({} attempt(s))",
                    params.clearing_price,
                    params.discounts,
                    reference,
                    attempts
                );
                Ok(reference)
            }
            Err(OrchestratorError::Cancelled) => Err(OrchestratorError::Cancelled),
            Err(e) => {
                machine.abort();
                save_failure(tracker, &e.to_string());
                Err(e)
            }
        }
    }

    /// 无批次的单次调用（抽奖、单 token 徽章设置），走同一套重试与确认
    pub async fn submit_single(&self, call: &LedgerCall) -> Result<TxReference> {
        if call.sequence.is_some() {
            return Err(OrchestratorError::Config(format!(
                "{} is a batch call, use run",
                call.target
            )));
        }
        let (reference, attempts) = self.submit_with_retry(call, &call.target, None).await?;
        tracing::info!("{} committed: {} ({} attempt(s))", call.target, reference, attempts);
        Ok(reference)
    }

    /// 上线设置：按顺序发送预铸（或标记完成）与开放铸造，步骤之间按批次间隔等待
    pub async fn run_setup(&self, options: &SetupOptions) -> Result<SetupReport> {
        let plan = SetupPlan::build(&self.calls, options)?;
        for skipped in &plan.skipped {
            tracing::warn!("Setup step {} skipped as requested", skipped);
        }

        let mut report = SetupReport {
            steps: Vec::with_capacity(plan.calls.len()),
            skipped: plan.skipped.clone(),
        };
        for (i, call) in plan.calls.iter().enumerate() {
            if i > 0 {
                self.pause(self.retry.inter_batch_delay).await?;
            }
            tracing::info!("Setup step {}/{}: {}", i + 1, plan.calls.len(), call.operation);
            let reference = self.submit_single(call).await?;
            report.steps.push(SetupStep {
                operation: call.operation,
                target: call.target.clone(),
                reference,
            });
        }
        tracing::info!(
            "Setup completed: {} step(s) sent, {} skipped",
            report.steps.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// 提交并确认一次调用，瞬时失败按退避重试；返回引用与总尝试次数
    async fn submit_with_retry(
        &self,
        call: &LedgerCall,
        label: &str,
        last_committed: Option<u64>,
    ) -> Result<(TxReference, u32)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match self.client.submit(call).await {
                Ok(reference) => {
                    return match self.await_confirmation(&reference).await {
                        Ok(()) => Ok((reference, attempt)),
                        Err(reason) => Err(OrchestratorError::FatalSubmissionFailure {
                            call: label.to_string(),
                            attempts: attempt,
                            reason,
                            last_committed,
                        }),
                    };
                }
                Err(err) => err,
            };

            match self.retry.decide(&err, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        label,
                        attempt,
                        self.retry.max_attempts,
                        err,
                        delay
                    );
                    self.pause(delay).await?;
                }
                RetryDecision::Abort => {
                    return Err(match self.retry.classify(&err) {
                        FailureClass::Transient => OrchestratorError::TransientSubmissionFailure {
                            call: label.to_string(),
                            attempts: attempt,
                            reason: err.to_string(),
                            last_committed,
                        },
                        FailureClass::Fatal => OrchestratorError::FatalSubmissionFailure {
                            call: label.to_string(),
                            attempts: attempt,
                            reason: err.to_string(),
                            last_committed,
                        },
                    })
                }
            }
        }
    }

    /// 轮询确认；Failed 与超出轮询预算都视为致命（结果未知时重发可能重复生效）
    async fn await_confirmation(&self, reference: &TxReference) -> std::result::Result<(), String> {
        let polls = self.retry.confirm_max_polls.max(1);
        for poll in 1..=polls {
            match self.client.confirm(reference).await {
                Ok(Confirmation::Committed) => return Ok(()),
                Ok(Confirmation::Failed(reason)) => {
                    return Err(format!("transaction {reference} failed: {reason}"))
                }
                Ok(Confirmation::Pending) => {
                    tracing::debug!("Transaction {} pending (poll {}/{})", reference, poll, polls);
                }
                Err(e) if self.retry.classify(&e) == FailureClass::Transient => {
                    tracing::warn!("Confirmation poll {}/{} for {} failed: {}", poll, polls, reference, e);
                }
                Err(e) => return Err(format!("confirmation of {reference} failed: {e}")),
            }
            if poll < polls {
                tokio::time::sleep(self.retry.confirm_interval).await;
            }
        }
        Err(format!("transaction {reference} not confirmed after {polls} polls"))
    }

    /// 可被取消的等待
    async fn pause(&self, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return if self.cancel.is_cancelled() {
                Err(OrchestratorError::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OrchestratorError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// 中止运行：记录日志并把原因写入进度，`status` 与下次运行都能看到
fn abort_run(
    state: &RunState,
    tracker: &mut ProgressTracker,
    error: OrchestratorError,
) -> OrchestratorError {
    tracing::error!("Run {} aborted: {}", state.run_id(), error);
    if let Some(message) = &state.last_error {
        save_failure(tracker, message);
    }
    error
}

fn save_failure(tracker: &mut ProgressTracker, message: &str) {
    if let Err(e) = tracker.record_failure(message) {
        tracing::warn!("Failed to save abort reason for {}: {}", tracker.operation(), e);
    }
}

/// 记录类型与操作匹配、记录键去重；要求排序的操作按键（地址数值）升序
fn prepare(operation: Operation, mut records: Vec<Record>) -> Result<Vec<Record>> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        operation.check_record(record)?;
        let key = record.key();
        if !seen.insert(key) {
            return Err(OrchestratorError::DuplicateIdentifier(key.to_string()));
        }
    }
    if operation.address_ordering() == AddressOrdering::Sorted {
        records.sort_by_key(Record::key);
    }
    Ok(records)
}
