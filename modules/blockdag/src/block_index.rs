//! Block index: every accepted block node keyed by hash, with parent/child
//! adjacency and ancestry queries.
//!
//! Ancestry on the selected-parent tree uses binary-lifting skip pointers, so
//! selected-chain membership and lowest common ancestors are O(log N). Every
//! block in `b`'s past is either on `b`'s selected chain or merged by a block
//! on it, so general DAG ancestry checks the blocks that merged the ancestor
//! against `b`'s chain, each in O(log N).

use crate::block_node::BlockNode;
use crate::dag_error::{DAGError, ViolationKind};
use crate::ghostdag::ghostdag;
use braid_common::{BlockHash, BlockStatus};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub struct BlockIndex {
    /// All nodes, keyed by hash.
    nodes: HashMap<BlockHash, BlockNode>,
    /// Genesis hash, set by the first insertion.
    genesis: Option<BlockHash>,
    /// GHOSTDAG anticone bound.
    k: u64,
}

impl BlockIndex {
    pub fn new(k: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            genesis: None,
            k,
        }
    }

    pub fn k(&self) -> u64 {
        self.k
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn genesis(&self) -> Option<BlockHash> {
        self.genesis
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn lookup_node(&self, hash: &BlockHash) -> Option<&BlockNode> {
        self.nodes.get(hash)
    }

    /// Node that must exist
    pub fn node(&self, hash: &BlockHash) -> Result<&BlockNode, DAGError> {
        self.nodes.get(hash).ok_or(DAGError::BlockNotInDAG { hash: *hash })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BlockNode> {
        self.nodes.values()
    }

    // ── Insertion ────────────────────────────────────────────────────

    /// Build a node for `hash` without inserting it. Checks the parent set and
    /// computes colouring, heights and skip pointers.
    pub fn prepare_node(
        &self,
        hash: BlockHash,
        parents: &[BlockHash],
        timestamp: i64,
    ) -> Result<BlockNode, DAGError> {
        if self.nodes.contains_key(&hash) {
            return Err(DAGError::violation(hash, ViolationKind::DuplicateBlock));
        }

        if parents.is_empty() {
            if !self.nodes.is_empty() {
                return Err(DAGError::violation(hash, ViolationKind::MisplacedGenesis));
            }
            return Ok(BlockNode::genesis(hash, timestamp));
        }
        if self.nodes.is_empty() {
            return Err(DAGError::violation(hash, ViolationKind::MisplacedGenesis));
        }

        let mut seen = HashSet::with_capacity(parents.len());
        for parent in parents {
            if !seen.insert(*parent) {
                return Err(DAGError::violation(hash, ViolationKind::DuplicateParent(*parent)));
            }
            match self.nodes.get(parent) {
                None => return Err(DAGError::violation(hash, ViolationKind::UnknownParent(*parent))),
                Some(node) if node.status == BlockStatus::Invalid => {
                    return Err(DAGError::violation(hash, ViolationKind::InvalidParent(*parent)))
                }
                Some(_) => {}
            }
        }

        let mut sorted_parents = parents.to_vec();
        sorted_parents.sort();

        let ghostdag = ghostdag(self, hash, &sorted_parents, self.k)?;
        let height = 1 + sorted_parents
            .iter()
            .map(|parent| self.node(parent).map(|node| node.height))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .max()
            .unwrap_or(0);

        let (chain_height, skips) = match ghostdag.selected_parent {
            Some(selected) => (self.node(&selected)?.chain_height + 1, self.skip_pointers(selected)?),
            None => (0, Vec::new()),
        };

        Ok(BlockNode {
            hash,
            parents: sorted_parents,
            children: Vec::new(),
            merged_by: Vec::new(),
            ghostdag,
            height,
            chain_height,
            skips,
            timestamp,
            status: BlockStatus::Valid,
        })
    }

    fn skip_pointers(&self, selected_parent: BlockHash) -> Result<Vec<BlockHash>, DAGError> {
        let mut skips = vec![selected_parent];
        loop {
            let level = skips.len() - 1;
            let next = self.node(&skips[level])?.skips.get(level).copied();
            match next {
                Some(next) => skips.push(next),
                None => return Ok(skips),
            }
        }
    }

    /// Insert a prepared node and link it into its parents' children
    pub fn insert_node(&mut self, node: BlockNode) -> Result<(), DAGError> {
        if self.nodes.contains_key(&node.hash) {
            return Err(DAGError::violation(node.hash, ViolationKind::DuplicateBlock));
        }
        for parent in &node.parents {
            let parent_node = self
                .nodes
                .get_mut(parent)
                .ok_or(DAGError::violation(node.hash, ViolationKind::UnknownParent(*parent)))?;
            parent_node.children.push(node.hash);
        }
        for merged in node.merged() {
            if let Some(merged_node) = self.nodes.get_mut(merged) {
                merged_node.merged_by.push(node.hash);
            }
        }
        if node.is_genesis() {
            self.genesis = Some(node.hash);
        }
        debug!(hash = %node.hash, blue_score = node.blue_score(), "Inserted block node");
        self.nodes.insert(node.hash, node);
        Ok(())
    }

    /// Construct and insert a node in one step
    pub fn add_node(
        &mut self,
        hash: BlockHash,
        parents: &[BlockHash],
        timestamp: i64,
    ) -> Result<&BlockNode, DAGError> {
        let node = self.prepare_node(hash, parents, timestamp)?;
        self.insert_node(node)?;
        self.node(&hash)
    }

    /// Undo an insertion. Only leaves can be removed.
    pub fn remove_leaf(&mut self, hash: &BlockHash) -> Result<BlockNode, DAGError> {
        let node = self.node(hash)?;
        if !node.children.is_empty() {
            return Err(DAGError::violation(*hash, ViolationKind::HasChildren(*hash)));
        }
        let parents = node.parents.clone();
        let merged: Vec<BlockHash> = node.merged().copied().collect();
        for parent in &parents {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.retain(|child| child != hash);
            }
        }
        for block in &merged {
            if let Some(merged_node) = self.nodes.get_mut(block) {
                merged_node.merged_by.retain(|merger| merger != hash);
            }
        }
        if self.genesis == Some(*hash) {
            self.genesis = None;
        }
        self.nodes.remove(hash).ok_or(DAGError::BlockNotInDAG { hash: *hash })
    }

    pub fn set_status(&mut self, hash: &BlockHash, status: BlockStatus) -> Result<(), DAGError> {
        let node = self.nodes.get_mut(hash).ok_or(DAGError::BlockNotInDAG { hash: *hash })?;
        node.status = status;
        Ok(())
    }

    // ── Ancestry ─────────────────────────────────────────────────────

    /// Selected-chain ancestor of `hash` at `chain_height`
    pub fn chain_ancestor_at(&self, hash: &BlockHash, chain_height: u64) -> Option<BlockHash> {
        let mut node = self.nodes.get(hash)?;
        if node.chain_height < chain_height {
            return None;
        }
        while node.chain_height > chain_height {
            let distance = node.chain_height - chain_height;
            let level = (63 - distance.leading_zeros()) as usize;
            let level = level.min(node.skips.len().checked_sub(1)?);
            node = self.nodes.get(&node.skips[level])?;
        }
        Some(node.hash)
    }

    /// Whether `ancestor` is `hash` or on its selected chain
    pub fn is_in_selected_chain_of(&self, ancestor: &BlockHash, hash: &BlockHash) -> bool {
        match self.nodes.get(ancestor) {
            Some(node) => self.chain_ancestor_at(hash, node.chain_height) == Some(*ancestor),
            None => false,
        }
    }

    /// Lowest common ancestor of two blocks on the selected-parent tree
    pub fn selected_tree_lca(&self, a: &BlockHash, b: &BlockHash) -> Option<BlockHash> {
        let height = self.nodes.get(a)?.chain_height.min(self.nodes.get(b)?.chain_height);
        let mut x = self.nodes.get(&self.chain_ancestor_at(a, height)?)?;
        let mut y = self.nodes.get(&self.chain_ancestor_at(b, height)?)?;
        if x.hash == y.hash {
            return Some(x.hash);
        }
        for level in (0..x.skips.len()).rev() {
            // Heights stay equal, so both nodes have the same number of skips
            if level < x.skips.len() && x.skips[level] != y.skips[level] {
                x = self.nodes.get(&x.skips[level])?;
                y = self.nodes.get(&y.skips[level])?;
            }
        }
        x.selected_parent()
    }

    /// Whether `a` is in the past of `b` (strictly)
    pub fn is_ancestor_of(&self, a: &BlockHash, b: &BlockHash) -> bool {
        let (Some(node_a), Some(node_b)) = (self.nodes.get(a), self.nodes.get(b)) else {
            return false;
        };
        if a == b || node_a.height >= node_b.height {
            return false;
        }
        if self.is_in_selected_chain_of(a, b) {
            return true;
        }
        node_a
            .merged_by
            .iter()
            .any(|merger| self.is_in_selected_chain_of(merger, b))
    }

    pub fn is_in_past_or_self(&self, a: &BlockHash, b: &BlockHash) -> bool {
        a == b || self.is_ancestor_of(a, b)
    }
}
