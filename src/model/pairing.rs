//! Partition pairings and persisted result handles

use serde::{Deserialize, Serialize};

/// Descriptor record pinning a completed result tree into the package
///
/// File names are relative to the package directory. The root offset and
/// entry count mirror the tree's directory-file header so a consumer can
/// sanity-check the files before descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeHandle {
    /// Directory file (interior + leaf nodes)
    pub directory_file: String,

    /// Data file (out-of-line payloads)
    pub data_file: String,

    /// Offset of the root node in the directory file
    pub root_offset: u64,

    /// Number of distinct keys stored
    pub entry_count: u64,
}

/// An ordered pair of partitions whose cross product must be scored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionPairing {
    /// Left partition id
    pub left: u32,

    /// Right partition id
    pub right: u32,

    /// Upper bound on the number of distinct left-side ids in the result;
    /// a tree-sizing hint only
    pub estimated_unique_ids: u64,

    /// Set exactly once, by a successful worker
    pub result: Option<TreeHandle>,
}

impl PartitionPairing {
    pub fn new(left: u32, right: u32, estimated_unique_ids: u64) -> Self {
        Self {
            left,
            right,
            estimated_unique_ids,
            result: None,
        }
    }

    /// True iff both sides refer to the same partition; processed in a
    /// single pass
    pub fn is_self_pairing(&self) -> bool {
        self.left == self.right
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_pairing() {
        assert!(PartitionPairing::new(2, 2, 10).is_self_pairing());
        assert!(!PartitionPairing::new(1, 2, 10).is_self_pairing());
    }

    #[test]
    fn test_has_result() {
        let mut pairing = PartitionPairing::new(0, 1, 4);
        assert!(!pairing.has_result());
        pairing.result = Some(TreeHandle {
            directory_file: "pairing00000.dir".into(),
            data_file: "pairing00000.dat".into(),
            root_offset: 32,
            entry_count: 4,
        });
        assert!(pairing.has_result());
    }
}
