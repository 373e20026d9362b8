//! GHOSTDAG colouring: selected parent, mergeset blues/reds and blue score.
//!
//! The selected parent is the parent with the highest `(blue_score, hash)`.
//! The mergeset (blocks in the new block's past but outside its selected
//! parent's past) is visited in ascending `(blue_score, hash)` order and each
//! candidate is coloured blue while the blue set stays a k-cluster. The result
//! depends only on the DAG shape, never on arrival order.

use crate::block_index::BlockIndex;
use crate::chain_selector::{ordering_key, select_parent};
use crate::dag_error::{DAGError, ViolationKind};
use braid_common::BlockHash;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostdagData {
    /// `None` only for genesis
    pub selected_parent: Option<BlockHash>,
    pub blue_score: u64,
    /// Blue blocks merged by this block, selected parent first
    pub mergeset_blues: Vec<BlockHash>,
    pub mergeset_reds: Vec<BlockHash>,
    /// For each blue in this block's view, the number of blues in its anticone
    pub blues_anticone_sizes: HashMap<BlockHash, u64>,
}

/// Colour the mergeset of a block with the given parents
pub fn ghostdag(
    index: &BlockIndex,
    hash: BlockHash,
    parents: &[BlockHash],
    k: u64,
) -> Result<GhostdagData, DAGError> {
    let Some(selected_parent) = select_parent(index, parents)? else {
        return Ok(GhostdagData::default());
    };

    let mut data = GhostdagData {
        selected_parent: Some(selected_parent),
        blue_score: 0,
        mergeset_blues: vec![selected_parent],
        mergeset_reds: Vec::new(),
        blues_anticone_sizes: HashMap::from([(selected_parent, 0)]),
    };

    let mut candidates = selected_parent_anticone(index, parents, selected_parent)?;
    candidates.sort_by_key(|hash| {
        index.lookup_node(hash).map(ordering_key).unwrap_or((0, *hash))
    });

    for (position, candidate) in candidates.iter().enumerate() {
        match check_blue_candidate(index, hash, &data, *candidate, k)? {
            Some(candidate_sizes) => {
                data.mergeset_blues.push(*candidate);
                data.blues_anticone_sizes.insert(*candidate, candidate_sizes.len() as u64);
                for (blue, size) in candidate_sizes {
                    data.blues_anticone_sizes.insert(blue, size + 1);
                }
                if data.mergeset_blues.len() as u64 == k + 1 {
                    data.mergeset_reds.extend_from_slice(&candidates[position + 1..]);
                    break;
                }
            }
            None => data.mergeset_reds.push(*candidate),
        }
    }

    let selected = index.node(&selected_parent)?;
    data.blue_score = selected.blue_score() + data.mergeset_blues.len() as u64;
    Ok(data)
}

/// Blocks in the past of `parents` that are neither the selected parent nor
/// in its past
fn selected_parent_anticone(
    index: &BlockIndex,
    parents: &[BlockHash],
    selected_parent: BlockHash,
) -> Result<Vec<BlockHash>, DAGError> {
    let mut anticone = HashSet::new();
    let mut past = HashSet::new();
    let mut queue = VecDeque::new();

    for parent in parents.iter().filter(|p| **p != selected_parent) {
        if anticone.insert(*parent) {
            queue.push_back(*parent);
        }
    }

    while let Some(current) = queue.pop_front() {
        for parent in &index.node(&current)?.parents {
            if anticone.contains(parent) || past.contains(parent) {
                continue;
            }
            if index.is_in_past_or_self(parent, &selected_parent) {
                past.insert(*parent);
                continue;
            }
            anticone.insert(*parent);
            queue.push_back(*parent);
        }
    }

    Ok(anticone.into_iter().collect())
}

/// Walk the new block and then its selected chain, counting blues in the
/// candidate's anticone. Returns the anticone blues with their current
/// anticone sizes if the candidate can be blue.
fn check_blue_candidate(
    index: &BlockIndex,
    hash: BlockHash,
    data: &GhostdagData,
    candidate: BlockHash,
    k: u64,
) -> Result<Option<HashMap<BlockHash, u64>>, DAGError> {
    let mut candidate_sizes = HashMap::new();
    let mut anticone_size = 0u64;

    // The new block itself comes first, then its selected chain
    let mut chain_block: Option<BlockHash> = None;
    loop {
        let blues = match chain_block {
            None => &data.mergeset_blues,
            Some(chain_hash) => {
                if index.is_in_past_or_self(&chain_hash, &candidate) {
                    break;
                }
                &index.node(&chain_hash)?.ghostdag.mergeset_blues
            }
        };

        for blue in blues {
            if index.is_in_past_or_self(blue, &candidate) {
                continue;
            }
            let size = blue_anticone_size(index, data, blue)?;
            if size > k {
                return Err(DAGError::violation(hash, ViolationKind::BlueAnticoneOverflow(*blue)));
            }
            candidate_sizes.insert(*blue, size);
            anticone_size += 1;
            if anticone_size > k || size == k {
                return Ok(None);
            }
        }

        let next = match chain_block {
            None => data.selected_parent,
            Some(chain_hash) => index.node(&chain_hash)?.selected_parent(),
        };
        match next {
            Some(next) => chain_block = Some(next),
            None => break,
        }
    }

    Ok(Some(candidate_sizes))
}

/// Blue anticone size of `blue` as seen from the new block: the first record
/// found walking the new block and then its selected chain
fn blue_anticone_size(
    index: &BlockIndex,
    data: &GhostdagData,
    blue: &BlockHash,
) -> Result<u64, DAGError> {
    if let Some(size) = data.blues_anticone_sizes.get(blue) {
        return Ok(*size);
    }
    let mut current = data.selected_parent;
    while let Some(chain_hash) = current {
        let node = index.node(&chain_hash)?;
        if let Some(size) = node.ghostdag.blues_anticone_sizes.get(blue) {
            return Ok(*size);
        }
        current = node.selected_parent();
    }
    Err(DAGError::violation(*blue, ViolationKind::MissingAnticoneSize(*blue)))
}
