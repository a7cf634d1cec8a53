//! 账本层：调用构造、提交客户端抽象与实现（HTTP 中继 / Mock）

pub mod call;
pub mod mock;
pub mod relay;
pub mod traits;

pub use call::{AddressOrdering, CallArg, CallBuilder, LedgerCall, MoveCall, Operation};
pub use mock::MockLedgerClient;
pub use relay::RelayClient;
pub use traits::{
    Confirmation, Outcome, SubmissionClient, SubmitError, SubmitErrorKind, TxReference,
};
