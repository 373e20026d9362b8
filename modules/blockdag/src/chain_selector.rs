//! Selected-parent choice and the selected-parent chain.

use crate::block_index::BlockIndex;
use crate::block_node::BlockNode;
use crate::dag_error::DAGError;
use braid_common::events::ChainChangedEvent;
use braid_common::BlockHash;

/// Total order used for every selected-parent decision: blue score, then hash
pub fn ordering_key(node: &BlockNode) -> (u64, BlockHash) {
    (node.blue_score(), node.hash)
}

/// The candidate with the highest blue score, ties to the higher hash
pub fn select_parent(
    index: &BlockIndex,
    candidates: &[BlockHash],
) -> Result<Option<BlockHash>, DAGError> {
    let mut best: Option<&BlockNode> = None;
    for candidate in candidates {
        let node = index.node(candidate)?;
        let better = match best {
            None => true,
            Some(current) => ordering_key(node) > ordering_key(current),
        };
        if better {
            best = Some(node);
        }
    }
    Ok(best.map(|node| node.hash))
}

/// Blocks leaving and joining the selected chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainChange {
    /// From the old tip down to just above the fork point
    pub removed: Vec<BlockHash>,
    /// From just above the fork point up to the new tip
    pub added: Vec<BlockHash>,
}

impl ChainChange {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    pub fn to_event(&self) -> ChainChangedEvent {
        ChainChangedEvent {
            removed_chain_block_hashes: self.removed.clone(),
            added_chain_block_hashes: self.added.clone(),
        }
    }
}

/// Changes between the chains ending at `old_tip` and `new_tip`; cost is
/// proportional to the divergence
pub fn reorg(
    index: &BlockIndex,
    old_tip: &BlockHash,
    new_tip: &BlockHash,
) -> Result<ChainChange, DAGError> {
    let fork = index
        .selected_tree_lca(old_tip, new_tip)
        .ok_or(DAGError::BlockNotInDAG { hash: *new_tip })?;
    Ok(ChainChange {
        removed: chain_down_to(index, old_tip, &fork)?,
        added: chain_down_to(index, new_tip, &fork)?.into_iter().rev().collect(),
    })
}

/// Selected-chain blocks from `from` down to, but excluding, `ancestor`
pub fn chain_down_to(
    index: &BlockIndex,
    from: &BlockHash,
    ancestor: &BlockHash,
) -> Result<Vec<BlockHash>, DAGError> {
    let mut blocks = Vec::new();
    let mut current = *from;
    while current != *ancestor {
        blocks.push(current);
        current = index
            .node(&current)?
            .selected_parent()
            .ok_or(DAGError::BlockNotInDAG { hash: *ancestor })?;
    }
    Ok(blocks)
}

/// The selected-parent chain from genesis to the virtual's selected parent,
/// indexed by chain height
#[derive(Debug, Clone)]
pub struct SelectedChain {
    blocks: Vec<BlockHash>,
}

impl SelectedChain {
    pub fn new(genesis: BlockHash) -> Self {
        Self {
            blocks: vec![genesis],
        }
    }

    pub fn tip(&self) -> BlockHash {
        // Never empty: genesis is always the first block
        self.blocks[self.blocks.len() - 1]
    }

    pub fn blocks(&self) -> &[BlockHash] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block_at(&self, chain_height: u64) -> Option<BlockHash> {
        self.blocks.get(chain_height as usize).copied()
    }

    /// O(1) membership through the node's chain height
    pub fn contains(&self, index: &BlockIndex, hash: &BlockHash) -> bool {
        index
            .lookup_node(hash)
            .and_then(|node| self.block_at(node.chain_height))
            .is_some_and(|at_height| at_height == *hash)
    }

    /// Move the tip to `new_tip`, returning what changed
    pub fn set_tip(&mut self, index: &BlockIndex, new_tip: &BlockHash) -> Result<ChainChange, DAGError> {
        let change = reorg(index, &self.tip(), new_tip)?;
        let kept = self.blocks.len() - change.removed.len();
        self.blocks.truncate(kept);
        self.blocks.extend_from_slice(&change.added);
        Ok(change)
    }
}
