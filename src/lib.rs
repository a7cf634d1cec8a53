//! ledger-batcher - 批量链上数据迁移编排器
//!
//! 模块划分：
//! - **config**: 环境配置加载（TOML + 环境变量）
//! - **core**: 批次规划、排序校验、阶段状态机、重试策略、运行主控
//! - **ledger**: 链上调用构造与提交客户端（HTTP 中继 / Mock）
//! - **observability**: 日志初始化
//! - **progress**: 可恢复进度（内存 / JSON 文件）
//! - **record**: 记录模型与本地数据加载

pub mod config;
pub mod core;
pub mod ledger;
pub mod observability;
pub mod progress;
pub mod record;
