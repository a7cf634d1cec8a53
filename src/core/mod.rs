//! 核心编排层：批次规划、排序校验、阶段状态机、重试策略、运行状态、主控循环与上线设置

pub mod coordinator;
pub mod error;
pub mod ordering;
pub mod phase;
pub mod planner;
pub mod recovery;
pub mod setup;
pub mod shutdown;
pub mod state;

pub use coordinator::RunCoordinator;
pub use error::{OrchestratorError, Result};
pub use ordering::{validate_and_sort, validate_unique};
pub use phase::{FinalizeParams, PhaseMachine, PhaseState, PhaseToken};
pub use planner::{plan, plan_from, Batch};
pub use recovery::{FailureClass, RetryController, RetryDecision};
pub use setup::{SetupOptions, SetupPlan, SetupReport, SetupStep};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{BatchReport, RunReport, RunState, RunStatus};
