//! 链上调用构造：操作定义与 Batch → LedgerCall 的映射
//!
//! 每种操作对应合约上的一个入口函数；参数分为对象引用（AdminCap、Collection 等）与纯值。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::LedgerSection;
use crate::core::{Batch, FinalizeParams, OrchestratorError, PhaseToken, Result};
use crate::record::Record;

/// 支持的迁移操作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// 神话资格名单
    AddEligible,
    SetAttributes,
    SetImages,
    SetBadgeNames,
    SetPresetBadges,
    /// 拍卖赢家：finalize_start → finalize_continue* → finalize_end
    AuctionWinners,
    Raffle,
    SetFutureBadges,
    /// 预铸到原生 kiosk
    Premint,
    /// 跳过预铸，直接标记 premint_completed
    MarkPremintCompleted,
    StartMinting,
    /// display::edit + display::update_version
    UpdateDisplay,
}

/// 地址类操作的校验方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressOrdering {
    /// 非地址操作
    NotApplicable,
    /// 校验 + 去重，保留输入顺序
    Unique,
    /// 校验 + 去重 + 数值升序
    Sorted,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Self::AddEligible,
        Self::SetAttributes,
        Self::SetImages,
        Self::SetBadgeNames,
        Self::SetPresetBadges,
        Self::AuctionWinners,
        Self::Raffle,
        Self::SetFutureBadges,
        Self::Premint,
        Self::MarkPremintCompleted,
        Self::StartMinting,
        Self::UpdateDisplay,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::AddEligible => "add-eligible",
            Self::SetAttributes => "set-attributes",
            Self::SetImages => "set-images",
            Self::SetBadgeNames => "set-badge-names",
            Self::SetPresetBadges => "set-preset-badges",
            Self::AuctionWinners => "auction-winners",
            Self::Raffle => "raffle",
            Self::SetFutureBadges => "set-future-badges",
            Self::Premint => "premint",
            Self::MarkPremintCompleted => "mark-premint-completed",
            Self::StartMinting => "start-minting",
            Self::UpdateDisplay => "update-display",
        }
    }

    pub fn is_phased(&self) -> bool {
        matches!(self, Self::AuctionWinners)
    }

    /// 没有记录批次、只发一次调用的操作
    pub fn is_single_call(&self) -> bool {
        matches!(
            self,
            Self::Raffle
                | Self::SetFutureBadges
                | Self::Premint
                | Self::MarkPremintCompleted
                | Self::StartMinting
                | Self::UpdateDisplay
        )
    }

    /// 记录类型必须与操作对应；在规划前对整份输入检查
    pub fn check_record(&self, record: &Record) -> Result<()> {
        let fits = match self {
            Self::AddEligible | Self::AuctionWinners => matches!(record, Record::Address(_)),
            Self::SetAttributes => matches!(record, Record::Attributes { .. }),
            Self::SetImages => matches!(record, Record::ImageUrl { .. }),
            Self::SetBadgeNames => matches!(record, Record::BadgeName { .. }),
            Self::SetPresetBadges => matches!(record, Record::PresetBadges { .. }),
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(mismatch(*self, record))
        }
    }

    pub fn address_ordering(&self) -> AddressOrdering {
        match self {
            Self::AuctionWinners => AddressOrdering::Sorted,
            Self::AddEligible | Self::SetPresetBadges => AddressOrdering::Unique,
            _ => AddressOrdering::NotApplicable,
        }
    }

    /// 一次调用携带整个 vector<address> 的操作用地址容量，其余用元数据容量
    pub fn uses_address_capacity(&self) -> bool {
        matches!(self, Self::AddEligible | Self::AuctionWinners)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| OrchestratorError::Config(format!("unknown operation: {s}")))
    }
}

/// 调用参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallArg {
    Object { id: String },
    Pure { ty: String, value: Value },
}

impl CallArg {
    fn object(id: &str) -> Self {
        Self::Object { id: id.to_string() }
    }

    fn pure(ty: &str, value: Value) -> Self {
        Self::Pure {
            ty: ty.to_string(),
            value,
        }
    }
}

/// 同一交易里紧随主调用执行的 moveCall
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveCall {
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_arguments: Vec<String>,
    pub arguments: Vec<CallArg>,
}

/// 一次链上交易：一个主 moveCall，可附带同交易的后续调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerCall {
    pub operation: Operation,
    /// 批次序号；结算、抽奖等单次调用为 None
    pub sequence: Option<u64>,
    pub phase: Option<PhaseToken>,
    /// `{package}::{module}::{function}`
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_arguments: Vec<String>,
    pub arguments: Vec<CallArg>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub then: Vec<MoveCall>,
    pub record_count: usize,
}

impl LedgerCall {
    fn single(operation: Operation, target: String, arguments: Vec<CallArg>) -> Self {
        Self {
            operation,
            sequence: None,
            phase: None,
            target,
            type_arguments: Vec::new(),
            arguments,
            then: Vec::new(),
            record_count: 0,
        }
    }
}

/// 根据环境配置把批次翻译成链上调用
#[derive(Debug, Clone)]
pub struct CallBuilder {
    ledger: LedgerSection,
}

impl CallBuilder {
    pub fn new(ledger: LedgerSection) -> Self {
        Self { ledger }
    }

    fn target(&self, module: &str, function: &str) -> String {
        format!("{}::{}::{}", self.ledger.package_id, module, function)
    }

    fn admin_and_collection(&self) -> Vec<CallArg> {
        vec![
            CallArg::object(&self.ledger.admin_cap),
            CallArg::object(&self.ledger.collection_id),
        ]
    }

    /// 批次调用；分阶段操作必须带 Start / Continue
    pub fn batch_call(
        &self,
        operation: Operation,
        batch: &Batch<Record>,
        phase: Option<PhaseToken>,
    ) -> Result<LedgerCall> {
        let module = self.ledger.module.as_str();
        let (target, arguments) = match operation {
            Operation::AddEligible => {
                let addrs = addresses(operation, &batch.records)?;
                let mut args = self.admin_and_collection();
                args.push(CallArg::pure("vector<address>", json!(addrs)));
                (self.target(module, "add_mythic_eligible"), args)
            }
            Operation::AuctionWinners => {
                let function = match phase {
                    Some(PhaseToken::Start) => "finalize_start",
                    Some(PhaseToken::Continue) => "finalize_continue",
                    other => {
                        return Err(OrchestratorError::PhaseSequenceViolation(format!(
                            "winner batch #{} built with phase {other:?}",
                            batch.sequence
                        )))
                    }
                };
                let addrs = addresses(operation, &batch.records)?;
                let args = vec![
                    CallArg::object(&self.ledger.admin_cap),
                    CallArg::object(&self.ledger.auction_id),
                    CallArg::pure("vector<address>", json!(addrs)),
                    CallArg::object(&self.ledger.clock_id),
                ];
                (self.target(&self.ledger.auction_module, function), args)
            }
            Operation::SetAttributes => {
                let mut ids = Vec::with_capacity(batch.len());
                let mut keys = Vec::with_capacity(batch.len());
                let mut values = Vec::with_capacity(batch.len());
                for record in &batch.records {
                    let Record::Attributes {
                        token_id,
                        attributes,
                    } = record
                    else {
                        return Err(mismatch(operation, record));
                    };
                    ids.push(*token_id);
                    keys.push(attributes.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>());
                    values.push(attributes.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>());
                }
                let mut args = self.admin_and_collection();
                args.push(CallArg::pure("vector<u64>", json!(ids)));
                args.push(CallArg::pure("vector<vector<String>>", json!(keys)));
                args.push(CallArg::pure("vector<vector<String>>", json!(values)));
                (self.target(module, "set_bulk_nft_attributes"), args)
            }
            Operation::SetImages => {
                let mut ids = Vec::with_capacity(batch.len());
                let mut urls = Vec::with_capacity(batch.len());
                for record in &batch.records {
                    let Record::ImageUrl { token_id, url } = record else {
                        return Err(mismatch(operation, record));
                    };
                    ids.push(*token_id);
                    urls.push(url.as_bytes().to_vec());
                }
                let mut args = self.admin_and_collection();
                args.push(CallArg::pure("vector<u64>", json!(ids)));
                args.push(CallArg::pure("vector<vector<u8>>", json!(urls)));
                (self.target(module, "set_bulk_nft_images"), args)
            }
            Operation::SetBadgeNames => {
                let mut ids = Vec::with_capacity(batch.len());
                let mut names = Vec::with_capacity(batch.len());
                for record in &batch.records {
                    let Record::BadgeName { badge_id, name } = record else {
                        return Err(mismatch(operation, record));
                    };
                    ids.push(*badge_id);
                    names.push(name.clone());
                }
                let mut args = self.admin_and_collection();
                args.push(CallArg::pure("vector<u16>", json!(ids)));
                args.push(CallArg::pure("vector<String>", json!(names)));
                (self.target(module, "set_bulk_badge_names"), args)
            }
            Operation::SetPresetBadges => {
                let mut addrs = Vec::with_capacity(batch.len());
                let mut badges = Vec::with_capacity(batch.len());
                for record in &batch.records {
                    let Record::PresetBadges {
                        address,
                        badges: list,
                    } = record
                    else {
                        return Err(mismatch(operation, record));
                    };
                    addrs.push(address.to_string());
                    badges.push(list.clone());
                }
                let mut args = self.admin_and_collection();
                args.push(CallArg::pure("vector<address>", json!(addrs)));
                args.push(CallArg::pure("vector<vector<u16>>", json!(badges)));
                (self.target(module, "set_bulk_preset_badges"), args)
            }
            Operation::Raffle
            | Operation::SetFutureBadges
            | Operation::Premint
            | Operation::MarkPremintCompleted
            | Operation::StartMinting
            | Operation::UpdateDisplay => {
                return Err(OrchestratorError::Config(format!(
                    "{operation} is a single-call operation and cannot be batched"
                )))
            }
        };

        Ok(LedgerCall {
            operation,
            sequence: Some(batch.sequence),
            phase,
            target,
            type_arguments: Vec::new(),
            arguments,
            then: Vec::new(),
            record_count: batch.len(),
        })
    }

    /// 拍卖结算的 End 调用
    pub fn finalize_call(&self, params: &FinalizeParams) -> LedgerCall {
        let mut call = LedgerCall::single(
            Operation::AuctionWinners,
            self.target(&self.ledger.auction_module, "finalize_end"),
            vec![
                CallArg::object(&self.ledger.admin_cap),
                CallArg::object(&self.ledger.auction_id),
                CallArg::pure("u64", json!(params.clearing_price)),
                CallArg::pure("u64", json!(params.discounts)),
            ],
        );
        call.phase = Some(PhaseToken::End);
        call
    }

    pub fn raffle_call(&self, raffle_size: u32) -> LedgerCall {
        LedgerCall::single(
            Operation::Raffle,
            self.target(&self.ledger.auction_module, "run_raffle"),
            vec![
                CallArg::object(&self.ledger.auction_id),
                CallArg::object(&self.ledger.admin_cap),
                CallArg::pure("u32", json!(raffle_size)),
                CallArg::object(&self.ledger.random_id),
            ],
        )
    }

    pub fn future_badges_call(&self, token_id: u16, badge_ids: &[u16]) -> LedgerCall {
        let mut arguments = self.admin_and_collection();
        arguments.push(CallArg::pure("u16", json!(token_id)));
        arguments.push(CallArg::pure("vector<u16>", json!(badge_ids)));
        let mut call = LedgerCall::single(
            Operation::SetFutureBadges,
            self.target(&self.ledger.module, "set_future_badges"),
            arguments,
        );
        call.record_count = 1;
        call
    }

    /// 预铸到原生 kiosk；需要 transfer policy 与 kiosk 对象
    pub fn premint_call(&self) -> Result<LedgerCall> {
        require(&[
            ("ledger.transfer_policy_id", &self.ledger.transfer_policy_id),
            ("ledger.kiosk_id", &self.ledger.kiosk_id),
            ("ledger.kiosk_cap", &self.ledger.kiosk_cap),
        ])?;
        let mut arguments = self.admin_and_collection();
        arguments.extend([
            CallArg::object(&self.ledger.transfer_policy_id),
            CallArg::object(&self.ledger.kiosk_id),
            CallArg::object(&self.ledger.kiosk_cap),
            CallArg::object(&self.ledger.random_id),
        ]);
        Ok(LedgerCall::single(
            Operation::Premint,
            self.target(&self.ledger.module, "premint_to_native"),
            arguments,
        ))
    }

    pub fn premint_completed_call(&self, completed: bool) -> LedgerCall {
        let mut arguments = self.admin_and_collection();
        arguments.push(CallArg::pure("bool", json!(completed)));
        LedgerCall::single(
            Operation::MarkPremintCompleted,
            self.target(&self.ledger.module, "set_premint_completed"),
            arguments,
        )
    }

    /// 开放铸造；开始时间为毫秒时间戳
    pub fn start_minting_call(&self, start_time_ms: u64) -> Result<LedgerCall> {
        if start_time_ms == 0 {
            return Err(OrchestratorError::Config(
                "mint.start_time_ms must be set to start minting".to_string(),
            ));
        }
        let mut arguments = self.admin_and_collection();
        arguments.push(CallArg::pure("u64", json!(start_time_ms)));
        Ok(LedgerCall::single(
            Operation::StartMinting,
            self.target(&self.ledger.module, "start_minting"),
            arguments,
        ))
    }

    /// 修改 NFT Display 的一个字段并提升版本号，两步在同一交易内
    pub fn update_display_call(&self, field: &str, value: &str) -> Result<LedgerCall> {
        require(&[
            ("ledger.display_id", &self.ledger.display_id),
            ("ledger.nft_struct", &self.ledger.nft_struct),
        ])?;
        if field.trim().is_empty() || value.trim().is_empty() {
            return Err(OrchestratorError::Config(
                "display field and new value must both be non-empty".to_string(),
            ));
        }
        let nft_type = self.target(&self.ledger.module, &self.ledger.nft_struct);
        let mut call = LedgerCall::single(
            Operation::UpdateDisplay,
            format!("{SUI_FRAMEWORK}::display::edit"),
            vec![
                CallArg::object(&self.ledger.display_id),
                CallArg::pure("String", json!(field)),
                CallArg::pure("String", json!(value)),
            ],
        );
        call.type_arguments = vec![nft_type.clone()];
        call.then.push(MoveCall {
            target: format!("{SUI_FRAMEWORK}::display::update_version"),
            type_arguments: vec![nft_type],
            arguments: vec![CallArg::object(&self.ledger.display_id)],
        });
        Ok(call)
    }
}

const SUI_FRAMEWORK: &str = "0x2";

fn require(settings: &[(&str, &String)]) -> Result<()> {
    let missing: Vec<&str> = settings
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| *k)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(OrchestratorError::Config(format!(
            "missing required settings: {}",
            missing.join(", ")
        )))
    }
}

fn addresses(operation: Operation, records: &[Record]) -> Result<Vec<String>> {
    records
        .iter()
        .map(|record| match record {
            Record::Address(a) => Ok(a.to_string()),
            other => Err(mismatch(operation, other)),
        })
        .collect()
}

fn mismatch(operation: Operation, record: &Record) -> OrchestratorError {
    OrchestratorError::Loader(format!(
        "record {} is not valid for operation {operation}",
        record.key()
    ))
}
