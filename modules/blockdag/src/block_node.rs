//! Block representation within the block index.

use crate::ghostdag::GhostdagData;
use braid_common::{BlockHash, BlockStatus};
use serde::{Deserialize, Serialize};

/// A block registered in the DAG.
///
/// Children and merging blocks are back-references maintained by the index;
/// a node never owns its neighbours. Everything except `status`, `children`
/// and `merged_by` is fixed once the node is inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNode {
    /// Block hash (identity key).
    pub hash: BlockHash,
    /// Parent hashes, sorted.
    pub parents: Vec<BlockHash>,
    /// Child hashes.
    pub children: Vec<BlockHash>,
    /// Blocks that merged this one without selecting it
    pub merged_by: Vec<BlockHash>,
    /// Selected parent, blue score and mergeset colouring.
    pub ghostdag: GhostdagData,
    /// Longest parent path back to genesis.
    pub height: u64,
    /// Depth on the selected-parent tree.
    pub chain_height: u64,
    /// `skips[i]` is the selected-chain ancestor `2^i` levels down.
    pub skips: Vec<BlockHash>,
    /// Header timestamp, Unix milliseconds.
    pub timestamp: i64,
    pub status: BlockStatus,
}

impl BlockNode {
    pub fn genesis(hash: BlockHash, timestamp: i64) -> Self {
        Self {
            hash,
            parents: Vec::new(),
            children: Vec::new(),
            merged_by: Vec::new(),
            ghostdag: GhostdagData::default(),
            height: 0,
            chain_height: 0,
            skips: Vec::new(),
            timestamp,
            status: BlockStatus::Valid,
        }
    }

    pub fn blue_score(&self) -> u64 {
        self.ghostdag.blue_score
    }

    pub fn selected_parent(&self) -> Option<BlockHash> {
        self.ghostdag.selected_parent
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }

    /// Blocks merged by this block (blue or red), excluding the selected
    /// parent
    pub fn merged(&self) -> impl Iterator<Item = &BlockHash> {
        self.ghostdag.mergeset_blues.iter().skip(1).chain(self.ghostdag.mergeset_reds.iter())
    }
}
