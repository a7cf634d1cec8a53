//! 记录模型：地址、记录键与各类待上链记录
//!
//! Record 由外部加载器产出，加载后不可变；RecordKey 是进度存储里持久化的稳定标识。

pub mod loader;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::OrchestratorError;

/// 地址字节长度
pub const ADDRESS_LENGTH: usize = 32;

/// 32 字节账本地址；Ord 即大端整数序
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = OrchestratorError;

    /// 接受可选 `0x`/`0X` 前缀 + 恰好 64 位十六进制
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || OrchestratorError::MalformedIdentifier(s.to_string());
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != ADDRESS_LENGTH * 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }

        let mut bytes = [0u8; ADDRESS_LENGTH];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).map_err(|_| malformed())?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 记录的稳定标识
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RecordKey {
    Address(Address),
    Token(u64),
    Badge(u16),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(a) => write!(f, "{a}"),
            Self::Token(id) => write!(f, "token #{id}"),
            Self::Badge(id) => write!(f, "badge #{id}"),
        }
    }
}

/// 一条待上链记录
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    /// 准入地址（资格名单、拍卖赢家）
    Address(Address),
    /// NFT 属性集：(trait_type, value)
    Attributes {
        token_id: u64,
        attributes: Vec<(String, String)>,
    },
    /// NFT 图片链接
    ImageUrl { token_id: u64, url: String },
    /// 徽章名称
    BadgeName { badge_id: u16, name: String },
    /// 地址的预设徽章
    PresetBadges { address: Address, badges: Vec<u16> },
}

impl Record {
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Address(a) => RecordKey::Address(*a),
            Self::Attributes { token_id, .. } | Self::ImageUrl { token_id, .. } => {
                RecordKey::Token(*token_id)
            }
            Self::BadgeName { badge_id, .. } => RecordKey::Badge(*badge_id),
            Self::PresetBadges { address, .. } => RecordKey::Address(*address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "0x8a80d50ac4e36b3b6257f8e9a3afb429e717c08db9e2cc7643c0fd414767f7de";

    #[test]
    fn test_address_parse_and_display() {
        let addr: Address = A.parse().unwrap();
        assert_eq!(addr.to_string(), A);

        let upper: Address = A.trim_start_matches("0x").to_uppercase().parse().unwrap();
        assert_eq!(addr, upper);
    }

    #[test]
    fn test_address_rejects_malformed() {
        let bad_inputs = vec![
            String::new(),
            "0x".to_string(),
            "0x1234".to_string(),
            A[..65].to_string(),
            format!("{A}00"),
            A.replace('a', "g"),
            format!("0x+{}", "a".repeat(63)),
        ];
        for bad in &bad_inputs {
            let err = bad.parse::<Address>().unwrap_err();
            assert!(matches!(err, OrchestratorError::MalformedIdentifier(_)), "{bad}");
        }
        // 多字节字符不能让切片越界
        let unicode = format!("0x{}é", "a".repeat(62));
        assert!(unicode.parse::<Address>().is_err());
    }

    #[test]
    fn test_address_order_is_numeric() {
        let small: Address = format!("0x{}01", "0".repeat(62)).parse().unwrap();
        let large: Address = format!("0x01{}", "0".repeat(62)).parse().unwrap();
        assert!(small < large);
    }

    #[test]
    fn test_record_key_serde() {
        let key = RecordKey::Address(A.parse().unwrap());
        let json = serde_json::to_string(&key).unwrap();
        assert!(json.contains(A));
        let back: RecordKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);

        let token: RecordKey = serde_json::from_str(r#"{"kind":"token","id":7}"#).unwrap();
        assert_eq!(token, RecordKey::Token(7));
    }

    #[test]
    fn test_record_key() {
        let rec = Record::ImageUrl {
            token_id: 9,
            url: "https://walrus/9.png".into(),
        };
        assert_eq!(rec.key(), RecordKey::Token(9));
    }
}
