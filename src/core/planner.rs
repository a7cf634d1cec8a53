//! 批次规划：将有序记录切分为定长批次
//!
//! 纯函数，无副作用；批次成员是输入的一个划分，批次顺序即输入顺序。

use serde::Serialize;

use crate::core::{OrchestratorError, Result};

/// 一次链上调用承载的有序记录
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Batch<R> {
    /// 单调递增的批次序号
    pub sequence: u64,
    pub records: Vec<R>,
}

impl<R> Batch<R> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// 从序号 0 开始规划
pub fn plan<R>(records: Vec<R>, capacity: usize) -> Result<Vec<Batch<R>>> {
    plan_from(records, capacity, 0)
}

/// 从 `first_sequence` 开始编号（断点续传时接在已提交批次之后）
pub fn plan_from<R>(records: Vec<R>, capacity: usize, first_sequence: u64) -> Result<Vec<Batch<R>>> {
    if capacity == 0 {
        return Err(OrchestratorError::InvalidCapacity(capacity));
    }

    let mut batches = Vec::with_capacity(records.len().div_ceil(capacity));
    let mut iter = records.into_iter().peekable();
    let mut sequence = first_sequence;
    while iter.peek().is_some() {
        let chunk: Vec<R> = iter.by_ref().take(capacity).collect();
        batches.push(Batch {
            sequence,
            records: chunk,
        });
        sequence += 1;
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plan_sizes() {
        let batches = plan((0..1050).collect::<Vec<u32>>(), 500).unwrap();
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![500, 500, 50]);
        assert_eq!(
            batches.iter().map(|b| b.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_plan_zero_capacity() {
        let err = plan(vec![1, 2, 3], 0).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidCapacity(0)));
    }

    #[test]
    fn test_plan_empty() {
        assert!(plan(Vec::<u8>::new(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_plan_from_offset() {
        let batches = plan_from(vec!['a', 'b', 'c'], 2, 7).unwrap();
        assert_eq!(batches[0].sequence, 7);
        assert_eq!(batches[1].sequence, 8);
        assert_eq!(batches[1].records, vec!['c']);
    }

    proptest! {
        #[test]
        fn prop_plan_is_ordered_partition(len in 0usize..2000, capacity in 1usize..600) {
            let records: Vec<usize> = (0..len).collect();
            let batches = plan(records.clone(), capacity).unwrap();

            prop_assert_eq!(batches.len(), len.div_ceil(capacity));
            for (i, batch) in batches.iter().enumerate() {
                prop_assert!(batch.len() <= capacity);
                if i + 1 < batches.len() {
                    prop_assert_eq!(batch.len(), capacity);
                }
                prop_assert_eq!(batch.sequence, i as u64);
            }

            let flattened: Vec<usize> = batches.into_iter().flat_map(|b| b.records).collect();
            prop_assert_eq!(flattened, records);
        }
    }
}
