//! Finality point tracking and finality conflict bookkeeping.

use crate::block_index::BlockIndex;
use crate::chain_selector::SelectedChain;
use braid_common::BlockHash;
use tracing::info;

#[derive(Debug, Clone)]
pub struct FinalityManager {
    /// No accepted selected chain may leave this block out.
    finality_point: BlockHash,
    /// Chain blocks a tip must be above the point before it moves.
    finality_depth: u64,
    /// Blocks disqualified since the last resolution, oldest first.
    pending_conflicts: Vec<BlockHash>,
}

impl FinalityManager {
    pub fn new(genesis: BlockHash, finality_depth: u64) -> Self {
        Self {
            finality_point: genesis,
            finality_depth,
            pending_conflicts: Vec::new(),
        }
    }

    pub fn finality_point(&self) -> BlockHash {
        self.finality_point
    }

    pub fn finality_depth(&self) -> u64 {
        self.finality_depth
    }

    /// Whether the selected chain ending at `tip` keeps the finality point
    pub fn chain_contains_finality_point(&self, index: &BlockIndex, tip: &BlockHash) -> bool {
        index.is_in_selected_chain_of(&self.finality_point, tip)
    }

    /// Move the point up the chain once the tip is more than the finality
    /// depth above it. Returns the new point if it moved.
    pub fn advance(&mut self, index: &BlockIndex, chain: &SelectedChain) -> Option<BlockHash> {
        let tip_height = index.lookup_node(&chain.tip())?.chain_height;
        let point_height = index.lookup_node(&self.finality_point)?.chain_height;
        if tip_height <= point_height + self.finality_depth {
            return None;
        }
        let candidate = chain.block_at(tip_height - self.finality_depth)?;
        if !chain.contains(index, &self.finality_point) {
            return None;
        }
        info!(finality_point = %candidate, chain_height = tip_height - self.finality_depth,
              "Finality point advanced");
        self.finality_point = candidate;
        Some(candidate)
    }

    pub fn record_conflict(&mut self, violating: BlockHash) {
        if !self.pending_conflicts.contains(&violating) {
            self.pending_conflicts.push(violating);
        }
    }

    pub fn pending_conflicts(&self) -> &[BlockHash] {
        &self.pending_conflicts
    }

    pub fn has_pending_conflicts(&self) -> bool {
        !self.pending_conflicts.is_empty()
    }

    /// Adopt `winner` as the finality point and clear pending conflicts
    pub fn resolve(&mut self, winner: BlockHash) {
        info!(finality_point = %winner, conflicts = self.pending_conflicts.len(),
              "Finality conflict resolved");
        self.finality_point = winner;
        self.pending_conflicts.clear();
    }
}
