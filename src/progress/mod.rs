//! 可恢复进度：存储后端与跟踪器

pub mod store;
pub mod tracker;

pub use store::{CommittedBatch, FileProgressStore, MemoryProgressStore, ProgressSnapshot, ProgressStore};
pub use tracker::ProgressTracker;
