//! 上线设置：预铸（或标记预铸完成）→ 开放铸造
//!
//! 所有调用在发送前一次性构造完毕，缺少对象 ID 或开始时间时不会发出任何调用。

use serde::Serialize;

use crate::config::MintSection;
use crate::core::Result;
use crate::ledger::{CallBuilder, LedgerCall, Operation, TxReference};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetupOptions {
    pub skip_premint: bool,
    pub skip_minting: bool,
    /// 以 set_premint_completed(true) 代替预铸；不受 skip_premint 影响
    pub mark_premint_completed: bool,
    pub mint_start_time_ms: u64,
}

impl SetupOptions {
    pub fn from_config(mint: &MintSection, skip_premint: bool, skip_minting: bool) -> Self {
        Self {
            skip_premint,
            skip_minting,
            mark_premint_completed: mint.mark_premint_completed,
            mint_start_time_ms: mint.start_time_ms,
        }
    }
}

/// 按顺序发送的调用与被跳过的步骤
#[derive(Debug)]
pub struct SetupPlan {
    pub calls: Vec<LedgerCall>,
    pub skipped: Vec<Operation>,
}

impl SetupPlan {
    pub fn build(calls: &CallBuilder, options: &SetupOptions) -> Result<Self> {
        let mut plan = Self {
            calls: Vec::new(),
            skipped: Vec::new(),
        };

        if options.mark_premint_completed {
            plan.calls.push(calls.premint_completed_call(true));
        } else if options.skip_premint {
            plan.skipped.push(Operation::Premint);
        } else {
            plan.calls.push(calls.premint_call()?);
        }

        if options.skip_minting {
            plan.skipped.push(Operation::StartMinting);
        } else {
            plan.calls
                .push(calls.start_minting_call(options.mint_start_time_ms)?);
        }
        Ok(plan)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SetupStep {
    pub operation: Operation,
    pub target: String,
    pub reference: TxReference,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SetupReport {
    pub steps: Vec<SetupStep>,
    pub skipped: Vec<Operation>,
}
