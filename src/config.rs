//! 环境配置：从 config/default.toml、config/<env>.toml 与环境变量加载
//!
//! 加载顺序：default.toml → <env>.toml → `--config` 指定文件 → 环境变量 `LEDGER__*`
//! （双下划线表示嵌套，如 `LEDGER__BATCH__DELAY_MS=5000`）。
//! 加载结果是一次运行的不可变输入，直接传给 RunCoordinator，不存在进程级的环境表。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::OrchestratorError;

/// 一个环境的完整配置（对应 config/<env>.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// 环境名（test / local / production），由加载方填入
    pub environment: String,
    pub ledger: LedgerSection,
    pub batch: BatchSection,
    pub retry: RetrySection,
    pub auction: AuctionSection,
    pub mint: MintSection,
    pub progress: ProgressSection,
}

/// [ledger] 段：中继地址与合约对象 ID
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub relay_url: String,
    /// 中继单次请求超时（秒）
    pub request_timeout_secs: u64,
    pub package_id: String,
    pub module: String,
    pub auction_module: String,
    pub admin_cap: String,
    pub collection_id: String,
    pub auction_id: String,
    pub clock_id: String,
    pub random_id: String,
    pub transfer_policy_id: String,
    pub kiosk_id: String,
    pub kiosk_cap: String,
    /// NFT 类型的 Display 对象
    pub display_id: String,
    /// NFT 结构体名，类型参数为 `{package_id}::{module}::{nft_struct}`
    pub nft_struct: String,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:9000".to_string(),
            request_timeout_secs: 60,
            package_id: String::new(),
            module: "mint".to_string(),
            auction_module: "auction".to_string(),
            admin_cap: String::new(),
            collection_id: String::new(),
            auction_id: String::new(),
            clock_id: "0x6".to_string(),
            random_id: "0x8".to_string(),
            transfer_policy_id: String::new(),
            kiosk_id: String::new(),
            kiosk_cap: String::new(),
            display_id: String::new(),
            nft_struct: "BeelieverNFT".to_string(),
        }
    }
}

/// [batch] 段：批次容量与批次间隔
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    /// 元数据类操作（属性、图片、徽章）每批记录数
    pub capacity: usize,
    /// 地址类操作（资格名单、拍卖赢家）每批地址数
    pub address_capacity: usize,
    /// 批次间隔（毫秒）
    pub delay_ms: u64,
    /// 集合总量
    pub total_records: u64,
    /// 缩减环境只处理前 N 个 token
    pub record_limit: Option<u64>,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            capacity: 200,
            address_capacity: 500,
            delay_ms: 2000,
            total_records: 6021,
            record_limit: None,
        }
    }
}

impl BatchSection {
    /// 实际处理的 token 上限
    pub fn effective_limit(&self) -> u64 {
        self.record_limit
            .map(|limit| limit.min(self.total_records))
            .unwrap_or(self.total_records)
    }
}

/// [retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// 单批次总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub confirm_interval_ms: u64,
    pub confirm_max_polls: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            confirm_interval_ms: 1000,
            confirm_max_polls: 30,
        }
    }
}

/// [auction] 段：结算参数与抽奖规模
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuctionSection {
    pub clearing_price: u64,
    pub discounts: i64,
    pub min_clearing_price: u64,
    pub raffle_size: u32,
}

impl Default for AuctionSection {
    fn default() -> Self {
        Self {
            clearing_price: 0,
            discounts: 0,
            min_clearing_price: 1_000_000_000,
            raffle_size: 0,
        }
    }
}

/// [mint] 段：预铸与开放铸造
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MintSection {
    /// 开放铸造时间（毫秒时间戳），`start_minting` 的参数
    pub start_time_ms: u64,
    /// 不执行预铸，只把 premint_completed 置为 true（测试网）
    pub mark_premint_completed: bool,
}

/// [progress] 段：进度文件目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgressSection {
    pub dir: PathBuf,
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("progress"),
        }
    }
}

impl EnvironmentConfig {
    /// 运行前检查；只检查编排器自身依赖的数值
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.batch.capacity == 0 {
            return Err(OrchestratorError::InvalidCapacity(self.batch.capacity));
        }
        if self.batch.address_capacity == 0 {
            return Err(OrchestratorError::InvalidCapacity(self.batch.address_capacity));
        }
        if self.retry.max_attempts == 0 {
            return Err(OrchestratorError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// 上链需要的对象 ID 是否齐全（dry-run 不需要）
    pub fn require_ledger_ids(&self) -> Result<(), OrchestratorError> {
        let missing: Vec<&str> = [
            ("ledger.package_id", &self.ledger.package_id),
            ("ledger.admin_cap", &self.ledger.admin_cap),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Config(format!(
                "missing required settings for environment {}: {}",
                self.environment,
                missing.join(", ")
            )))
        }
    }
}

/// 加载环境配置
///
/// 1. 在 config/、../config/ 中找 default.toml 作为第一源
/// 2. 同目录下的 `<environment>.toml` 覆盖前者
/// 3. 若传入 config_path 且文件存在，则追加该文件
/// 4. 最后叠加环境变量 LEDGER__*
pub fn load_config(
    environment: &str,
    config_path: Option<PathBuf>,
) -> Result<EnvironmentConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let roots = ["config", "../config"];
    if let Some(root) = roots
        .iter()
        .find(|root| Path::new(&format!("{root}/default.toml")).exists())
    {
        builder = builder
            .add_source(config::File::with_name(&format!("{root}/default")).required(false))
            .add_source(config::File::with_name(&format!("{root}/{environment}")).required(false));
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LEDGER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let mut cfg: EnvironmentConfig = c.try_deserialize()?;
    cfg.environment = environment.to_string();
    Ok(cfg)
}
