//! 记录加载器：从本地文本 / JSON 文件读出有序记录
//!
//! 相同输入必须产出相同序列（断点续传依赖这一点），因此所有按 ID 的数据都按 ID 升序输出。

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::{OrchestratorError, Result};
use crate::record::{Address, Record};

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| OrchestratorError::Loader(format!("{}: {e}", path.display())))
}

fn parse_json<T: for<'de> Deserialize<'de>>(path: &Path, content: &str) -> Result<T> {
    serde_json::from_str(content)
        .map_err(|e| OrchestratorError::Loader(format!("{}: {e}", path.display())))
}

/// 同一 ID 的不同写法（如 "1" 与 "01"）算重复，不允许后者静默覆盖前者
fn insert_unique<K: Ord + Copy + std::fmt::Display, V>(
    by_id: &mut BTreeMap<K, V>,
    id: K,
    value: V,
    what: &str,
) -> Result<()> {
    if by_id.insert(id, value).is_some() {
        return Err(OrchestratorError::DuplicateIdentifier(format!("{what} #{id}")));
    }
    Ok(())
}

/// 每行一个地址；去空白、跳过空行，缺少 `0x` 前缀时补齐。地址本身不在此校验。
pub fn read_addresses(path: &Path) -> Result<Vec<String>> {
    let content = read_file(path)?;
    let addresses: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|addr| {
            if addr.starts_with("0x") || addr.starts_with("0X") {
                addr.to_string()
            } else {
                format!("0x{addr}")
            }
        })
        .collect();

    if addresses.is_empty() {
        return Err(OrchestratorError::Loader(format!(
            "no addresses found in {}",
            path.display()
        )));
    }
    tracing::info!("Read {} addresses from {}", addresses.len(), path.display());
    Ok(addresses)
}

#[derive(Deserialize)]
struct TokenMetadata {
    attributes: Option<Vec<TokenAttribute>>,
}

#[derive(Deserialize)]
struct TokenAttribute {
    trait_type: String,
    value: serde_json::Value,
}

/// 读取 `dir/<id>.json`（id 取 1..=limit）中的 attributes；读不到或格式不对的文件跳过并告警
pub fn load_attributes(dir: &Path, limit: u64) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for token_id in 1..=limit {
        let path = dir.join(format!("{token_id}.json"));
        let metadata: TokenMetadata = match read_file(&path).and_then(|c| parse_json(&path, &c)) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Skipping attributes for NFT #{}: {}", token_id, e);
                continue;
            }
        };
        let Some(attributes) = metadata.attributes else {
            continue;
        };
        let attributes = attributes
            .into_iter()
            .map(|a| {
                let value = match a.value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (a.trait_type, value)
            })
            .collect();
        records.push(Record::Attributes {
            token_id,
            attributes,
        });
    }
    tracing::info!(
        "Loaded attributes for {} of {} NFTs from {}",
        records.len(),
        limit,
        dir.display()
    );
    Ok(records)
}

/// `{ "<id>": "<url>" }`，只取 1..=limit 范围内存在的 ID
pub fn load_image_links(path: &Path, limit: u64) -> Result<Vec<Record>> {
    let links: BTreeMap<String, String> = parse_json(path, &read_file(path)?)?;
    let mut by_id: BTreeMap<u64, String> = BTreeMap::new();
    for (id, url) in links {
        match id.trim().parse::<u64>() {
            Ok(token_id) => insert_unique(&mut by_id, token_id, url, "token")?,
            Err(_) => tracing::warn!("Ignoring non-numeric image link key {:?}", id),
        }
    }

    let records: Vec<Record> = by_id
        .range(1..=limit)
        .map(|(id, url)| Record::ImageUrl {
            token_id: *id,
            url: url.clone(),
        })
        .collect();
    tracing::info!("Loaded {} image links from {}", records.len(), path.display());
    Ok(records)
}

#[derive(Deserialize)]
struct BadgeNamesFile {
    badge_names: Option<BTreeMap<String, String>>,
}

/// `{ "badge_names": { "<id>": "<name>" } }`
pub fn load_badge_names(path: &Path) -> Result<Vec<Record>> {
    let file: BadgeNamesFile = parse_json(path, &read_file(path)?)?;
    let names = file.badge_names.ok_or_else(|| {
        OrchestratorError::Loader(format!("no badge_names found in {}", path.display()))
    })?;

    let mut by_id = BTreeMap::new();
    for (id, name) in names {
        let badge_id = id
            .trim()
            .parse::<u16>()
            .map_err(|_| OrchestratorError::Loader(format!("invalid badge id {id:?}")))?;
        insert_unique(&mut by_id, badge_id, name, "badge")?;
    }
    Ok(by_id
        .into_iter()
        .map(|(badge_id, name)| Record::BadgeName { badge_id, name })
        .collect())
}

/// `{ "<address>": [badge, ...] }`；空徽章列表的地址被丢弃
pub fn load_preset_badges(path: &Path) -> Result<Vec<Record>> {
    let entries: BTreeMap<String, Vec<u16>> = parse_json(path, &read_file(path)?)?;
    let mut records = Vec::with_capacity(entries.len());
    let mut dropped = 0usize;
    for (addr, badges) in entries {
        let address: Address = addr.trim().parse()?;
        if badges.is_empty() {
            dropped += 1;
            continue;
        }
        records.push(Record::PresetBadges { address, badges });
    }
    if dropped > 0 {
        tracing::warn!("Dropped {} addresses with empty badge lists", dropped);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const A: &str = "8a80d50ac4e36b3b6257f8e9a3afb429e717c08db9e2cc7643c0fd414767f7de";
    const B: &str = "0x1d62d59890e0e8adeace350653d05027846004887ed17b92abb3fdc803ffefa6";

    #[test]
    fn test_read_addresses_normalizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eligible.txt");
        std::fs::write(&path, format!("  {A}\n\n{B}  \n")).unwrap();

        let addrs = read_addresses(&path).unwrap();
        assert_eq!(addrs, vec![format!("0x{A}"), B.to_string()]);
    }

    #[test]
    fn test_read_addresses_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "\n \n").unwrap();
        assert!(matches!(
            read_addresses(&path),
            Err(OrchestratorError::Loader(_))
        ));
    }

    #[test]
    fn test_load_attributes_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("1.json"),
            r#"{"attributes":[{"trait_type":"Background","value":"Gold"},{"trait_type":"Level","value":3}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("2.json"), "not json").unwrap();
        std::fs::write(dir.path().join("4.json"), r#"{"name":"no attributes"}"#).unwrap();
        std::fs::write(
            dir.path().join("5.json"),
            r#"{"attributes":[{"trait_type":"Eyes","value":"Laser"}]}"#,
        )
        .unwrap();

        let records = load_attributes(dir.path(), 4).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0],
            Record::Attributes {
                token_id: 1,
                attributes: vec![
                    ("Background".into(), "Gold".into()),
                    ("Level".into(), "3".into()),
                ],
            }
        );
    }

    #[test]
    fn test_load_image_links_sorted_and_limited() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("imagelinks.json");
        std::fs::write(
            &path,
            r#"{"10":"https://x/10.png","2":"https://x/2.png","1":"https://x/1.png","0":"https://x/0.png"}"#,
        )
        .unwrap();

        let records = load_image_links(&path, 5).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.key()).collect();
        assert_eq!(
            ids,
            vec![crate::record::RecordKey::Token(1), crate::record::RecordKey::Token(2)]
        );
    }

    #[test]
    fn test_image_link_ids_written_twice_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("imagelinks.json");
        std::fs::write(&path, r#"{"1":"https://x/a.png","01":"https://x/b.png"}"#).unwrap();

        let err = load_image_links(&path, 5).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateIdentifier(ref id) if id == "token #1"));
    }

    #[test]
    fn test_load_badge_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("badge_names.json");
        std::fs::write(&path, r#"{"badge_names":{"12":"Hive","3":"Queen"}}"#).unwrap();
        let records = load_badge_names(&path).unwrap();
        assert_eq!(
            records[0],
            Record::BadgeName {
                badge_id: 3,
                name: "Queen".into()
            }
        );

        std::fs::write(&path, r#"{"badge_names":{"3":"Queen","003":"Drone"}}"#).unwrap();
        assert!(matches!(
            load_badge_names(&path),
            Err(OrchestratorError::DuplicateIdentifier(_))
        ));

        std::fs::write(&path, r#"{"other":{}}"#).unwrap();
        assert!(load_badge_names(&path).is_err());
    }

    #[test]
    fn test_load_preset_badges() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("badges.json");
        std::fs::write(&path, format!(r#"{{"{B}":[1,2],"0x{A}":[]}}"#)).unwrap();
        let records = load_preset_badges(&path).unwrap();
        assert_eq!(records.len(), 1);

        std::fs::write(&path, r#"{"0xnope":[1]}"#).unwrap();
        assert!(matches!(
            load_preset_badges(&path),
            Err(OrchestratorError::MalformedIdentifier(_))
        ));
    }
}
