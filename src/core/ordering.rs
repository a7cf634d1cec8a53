//! 地址排序前置条件
//!
//! 部分链上操作（拍卖赢家结算）要求地址按数值严格升序提交；重复或格式错误的地址一律拒绝。

use std::collections::HashSet;

use crate::core::{OrchestratorError, Result};
use crate::record::Address;

/// 校验并去重检查，保留输入顺序
pub fn validate_unique<S: AsRef<str>>(addresses: &[S]) -> Result<Vec<Address>> {
    let mut seen = HashSet::with_capacity(addresses.len());
    let mut parsed = Vec::with_capacity(addresses.len());
    for raw in addresses {
        let address: Address = raw.as_ref().trim().parse()?;
        if !seen.insert(address) {
            return Err(OrchestratorError::DuplicateIdentifier(address.to_string()));
        }
        parsed.push(address);
    }
    Ok(parsed)
}

/// 校验后按大整数值升序排列
pub fn validate_and_sort<S: AsRef<str>>(addresses: &[S]) -> Result<Vec<Address>> {
    let mut parsed = validate_unique(addresses)?;
    parsed.sort_unstable();
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(n: u64) -> String {
        format!("0x{:064x}", n)
    }

    #[test]
    fn test_sort_numeric_not_lexical() {
        let input = vec![addr(0x100), addr(0x20), addr(3)];
        let sorted = validate_and_sort(&input).unwrap();
        assert_eq!(
            sorted.iter().map(Address::to_string).collect::<Vec<_>>(),
            vec![addr(3), addr(0x20), addr(0x100)]
        );
    }

    #[test]
    fn test_duplicate_detected_across_case_and_prefix() {
        let lower = format!("0x{}", "ab".repeat(32));
        let upper = "AB".repeat(32);
        let err = validate_and_sort(&[lower, upper]).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateIdentifier(_)));
    }

    #[test]
    fn test_malformed_rejected() {
        let err = validate_and_sort(&[addr(1), "0xdeadbeef".to_string()]).unwrap_err();
        assert!(matches!(err, OrchestratorError::MalformedIdentifier(ref s) if s == "0xdeadbeef"));
    }

    #[test]
    fn test_validate_unique_keeps_order() {
        let input = vec![addr(9), addr(1)];
        let parsed = validate_unique(&input).unwrap();
        assert_eq!(parsed[0].to_string(), addr(9));
    }

    proptest! {
        #[test]
        fn prop_sorted_strictly_ascending_permutation(
            values in proptest::collection::hash_set(any::<[u8; 32]>(), 0..200)
        ) {
            let input: Vec<String> = values
                .iter()
                .map(|b| Address::from_bytes(*b).to_string())
                .collect();
            let sorted = validate_and_sort(&input).unwrap();

            prop_assert_eq!(sorted.len(), input.len());
            for pair in sorted.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
            let out: HashSet<[u8; 32]> = sorted.iter().map(|a| *a.as_bytes()).collect();
            prop_assert_eq!(out, values);
        }
    }
}
