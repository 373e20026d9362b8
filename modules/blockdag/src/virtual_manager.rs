//! Virtual block: the synthetic node whose parents are the DAG tips, and
//! whose past UTXO view is the live ledger state held in the shared base.
//!
//! Any block's past UTXO view is composed from the base by undoing the
//! virtual's acceptance diff, undoing selected-chain diffs down to the fork
//! point, and redoing diffs up to the block. Each phase is its own layer, so
//! the cost follows the divergence rather than the chain length. Within a
//! phase, a diff that replaces an entry an earlier diff changed goes on a
//! fresh layer.

use crate::block_index::BlockIndex;
use crate::chain_selector::{chain_down_to, ChainChange, SelectedChain};
use crate::dag_error::{DAGError, UTXOError};
use crate::finality::FinalityManager;
use crate::ghostdag::{ghostdag, GhostdagData};
use crate::utxo_diff::UTXODiff;
use crate::utxo_set::{SharedUTXOBase, UTXOSet};
use braid_common::{Address, Block, BlockHash, BlockStatus, TxId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Block body together with its diff against its selected parent's past UTXO
#[derive(Debug, Clone)]
pub struct BlockData {
    pub block: Arc<Block>,
    pub utxo_diff: UTXODiff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// Spends an outpoint that is not in the view
    MissingInput,
    /// Spends an outpoint an earlier-ordered transaction already spent
    AlreadySpent,
    /// Creates an outpoint that already exists
    DuplicateOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOutcome {
    Accepted,
    Rejected(RejectionReason),
}

/// Acceptance of one merged transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAcceptance {
    pub block_hash: BlockHash,
    pub tx_id: TxId,
    pub outcome: TxOutcome,
}

#[derive(Debug, Clone)]
pub struct VirtualBlock {
    pub parents: Vec<BlockHash>,
    pub selected_parent: BlockHash,
    pub ghostdag: GhostdagData,
    /// Diff from the selected parent's past UTXO to the virtual's
    pub utxo_diff: UTXODiff,
    pub acceptance: Vec<TxAcceptance>,
}

impl VirtualBlock {
    /// Virtual before anything is accepted: its past UTXO is genesis's, empty
    fn initial(genesis: BlockHash) -> Self {
        Self {
            parents: vec![genesis],
            selected_parent: genesis,
            ghostdag: GhostdagData::default(),
            utxo_diff: UTXODiff::new(),
            acceptance: Vec::new(),
        }
    }
}

/// Outcome of a virtual recomputation
#[derive(Debug, Clone, Default)]
pub struct VirtualUpdate {
    pub chain_change: ChainChange,
    /// Tips excluded because their chain misses the finality point
    pub disqualified: Vec<BlockHash>,
    pub changed_addresses: Vec<Address>,
    pub finality_point_moved: Option<BlockHash>,
}

pub struct VirtualManager {
    tips: BTreeSet<BlockHash>,
    virtual_block: VirtualBlock,
}

impl VirtualManager {
    pub fn new(genesis: BlockHash) -> Self {
        Self {
            tips: BTreeSet::new(),
            virtual_block: VirtualBlock::initial(genesis),
        }
    }

    pub fn tips(&self) -> &BTreeSet<BlockHash> {
        &self.tips
    }

    pub fn virtual_block(&self) -> &VirtualBlock {
        &self.virtual_block
    }

    pub fn selected_parent(&self) -> BlockHash {
        self.virtual_block.selected_parent
    }

    /// A newly inserted block replaces its parents in the tip set
    pub fn add_tip(&mut self, hash: BlockHash, parents: &[BlockHash]) {
        for parent in parents {
            self.tips.remove(parent);
        }
        self.tips.insert(hash);
    }

    /// Undo [`add_tip`](Self::add_tip) after the block left the index
    pub fn remove_tip(&mut self, index: &BlockIndex, hash: &BlockHash, parents: &[BlockHash]) {
        self.tips.remove(hash);
        for parent in parents {
            if index.lookup_node(parent).is_some_and(|node| node.children.is_empty()) {
                self.tips.insert(*parent);
            }
        }
    }

    // ── UTXO views ───────────────────────────────────────────────────

    /// View of the past UTXO of `target` including its own diff, layered
    /// over the shared base
    pub fn past_utxo_view(
        &self,
        index: &BlockIndex,
        block_data: &HashMap<BlockHash, BlockData>,
        base: &SharedUTXOBase,
        target: &BlockHash,
    ) -> Result<UTXOSet, DAGError> {
        let current = self.virtual_block.selected_parent;
        let fork = index
            .selected_tree_lca(&current, target)
            .ok_or(DAGError::BlockNotInDAG { hash: *target })?;

        let mut undo = base.diff_view().push_diff(&self.virtual_block.utxo_diff.inverse())?;
        for hash in chain_down_to(index, &current, &fork)? {
            undo = undo.push_diff(&stored_diff(block_data, &hash)?.inverse())?;
        }

        let mut redo = undo.into_layer();
        for hash in chain_down_to(index, target, &fork)?.iter().rev() {
            redo = redo.push_diff(stored_diff(block_data, hash)?)?;
        }
        Ok(redo)
    }

    /// Apply the transactions of `blues` in order on a new layer over `view`.
    /// Conflicting transactions are skipped and reported, not failed.
    pub fn accept_blues(
        view: UTXOSet,
        blues: &[BlockHash],
        index: &BlockIndex,
        block_data: &HashMap<BlockHash, BlockData>,
    ) -> Result<(UTXOSet, Vec<TxAcceptance>), DAGError> {
        let mut layer = view.into_layer();
        let mut acceptance = Vec::new();
        for blue in blues {
            let blue_score = index.node(blue)?.blue_score();
            let data = block_data.get(blue).ok_or(DAGError::BlockNotInDAG { hash: *blue })?;
            for tx in &data.block.transactions {
                let outcome = match layer.add_transaction(tx, blue_score) {
                    Ok(()) => TxOutcome::Accepted,
                    Err(error) if error.is_transaction_rejection() => {
                        debug!(block = %blue, tx = %tx.id(), "Transaction not accepted: {error}");
                        TxOutcome::Rejected(match error {
                            UTXOError::DoubleSpend { .. } => RejectionReason::AlreadySpent,
                            UTXOError::OutputAlreadyExists { .. } => RejectionReason::DuplicateOutput,
                            _ => RejectionReason::MissingInput,
                        })
                    }
                    Err(error) => return Err(error.into()),
                };
                acceptance.push(TxAcceptance {
                    block_hash: *blue,
                    tx_id: tx.id(),
                    outcome,
                });
            }
        }
        Ok((layer, acceptance))
    }

    // ── Virtual recomputation ────────────────────────────────────────

    /// Recompute the virtual from the valid tips and meld its past UTXO into
    /// the shared base. Nothing is modified unless the meld succeeds.
    pub fn update_virtual(
        &mut self,
        index: &mut BlockIndex,
        chain: &mut SelectedChain,
        finality: &mut FinalityManager,
        block_data: &HashMap<BlockHash, BlockData>,
        base: &SharedUTXOBase,
    ) -> Result<VirtualUpdate, DAGError> {
        let mut candidates: Vec<BlockHash> = self
            .tips
            .iter()
            .filter(|tip| {
                index.lookup_node(tip).is_some_and(|node| node.status == BlockStatus::Valid)
            })
            .copied()
            .collect();
        let mut disqualified = Vec::new();

        let (parents, data) = loop {
            if candidates.is_empty() {
                let point = finality.finality_point();
                warn!(finality_point = %point, "No eligible tips, virtual falls back to the finality point");
                let data = ghostdag(index, BlockHash::default(), &[point], index.k())?;
                break (vec![point], data);
            }
            let data = ghostdag(index, BlockHash::default(), &candidates, index.k())?;
            let Some(selected) = data.selected_parent else {
                return Err(DAGError::BlockNotInDAG { hash: BlockHash::default() });
            };
            if finality.chain_contains_finality_point(index, &selected) {
                break (candidates, data);
            }
            warn!(block = %selected, finality_point = %finality.finality_point(),
                  "Selected chain misses the finality point, disqualifying");
            disqualified.push(selected);
            candidates.retain(|candidate| *candidate != selected);
        };
        let selected_parent = data
            .selected_parent
            .ok_or(DAGError::BlockNotInDAG { hash: BlockHash::default() })?;

        let past = self.past_utxo_view(index, block_data, base, &selected_parent)?;
        let (view, acceptance) =
            Self::accept_blues(past, &data.mergeset_blues, index, block_data)?;
        let utxo_diff = view.diff().cloned().unwrap_or_default();

        // Meld the net change when it is expressible as one diff, otherwise
        // the layers themselves
        let committed = base.view();
        let changed_addresses = match committed.diff_to(&view) {
            Ok(net) => {
                let addresses = net.addresses();
                base.meld(base.diff_view_with(net))?;
                addresses
            }
            Err(UTXOError::ConflictingEntries { outpoint }) => {
                debug!(%outpoint, "Replaced entry in virtual update, melding layered view");
                let addresses = changed_addresses(&committed, &view)?;
                base.meld(view)?;
                addresses
            }
            Err(error) => return Err(error.into()),
        };

        // Committed; bring the in-memory state in line
        for hash in &disqualified {
            index.set_status(hash, BlockStatus::Disqualified)?;
            finality.record_conflict(*hash);
        }
        let chain_change = chain.set_tip(index, &selected_parent)?;
        let finality_point_moved = finality.advance(index, chain);

        if tracing::enabled!(tracing::Level::DEBUG) {
            let accepted =
                acceptance.iter().filter(|a| a.outcome == TxOutcome::Accepted).count();
            debug!(
                selected_parent = %selected_parent,
                parents = parents.len(),
                blue_score = data.blue_score,
                accepted,
                rejected = acceptance.len() - accepted,
                "Virtual updated"
            );
        }

        self.virtual_block = VirtualBlock {
            parents,
            selected_parent,
            ghostdag: data,
            utxo_diff,
            acceptance,
        };

        Ok(VirtualUpdate {
            chain_change,
            disqualified,
            changed_addresses: changed_addresses.into_iter().collect(),
            finality_point_moved,
        })
    }
}

fn stored_diff<'a>(
    block_data: &'a HashMap<BlockHash, BlockData>,
    hash: &BlockHash,
) -> Result<&'a UTXODiff, DAGError> {
    block_data
        .get(hash)
        .map(|data| &data.utxo_diff)
        .ok_or(DAGError::BlockNotInDAG { hash: *hash })
}

/// Addresses whose entries differ between two views over the same base
fn changed_addresses(before: &UTXOSet, after: &UTXOSet) -> Result<BTreeSet<Address>, UTXOError> {
    let mut addresses = BTreeSet::new();
    for outpoint in after.touched_outpoints() {
        let old = before.get(&outpoint)?;
        let new = after.get(&outpoint)?;
        if old != new {
            for entry in old.iter().chain(new.iter()) {
                addresses.insert(Address::from_script(&entry.script_public_key));
            }
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_common::{Outpoint, Transaction, TxInput, TxOutput};

    fn hash(n: u8) -> BlockHash {
        BlockHash::new([n; 32])
    }

    fn output(value: u64, script: u8) -> TxOutput {
        TxOutput {
            value,
            script_public_key: vec![script],
        }
    }

    fn spend(outpoint: Outpoint, value: u64, script: u8) -> Transaction {
        Transaction::new(1, vec![TxInput::spending(outpoint)], vec![output(value, script)], 0, vec![])
    }

    fn block(transactions: Vec<Transaction>) -> Arc<Block> {
        Arc::new(Block::new(vec![], 0, 0, 0, transactions))
    }

    /// Minimal harness driving the manager the way the DAG does
    struct Harness {
        index: BlockIndex,
        chain: SelectedChain,
        finality: FinalityManager,
        data: HashMap<BlockHash, BlockData>,
        base: SharedUTXOBase,
        manager: VirtualManager,
    }

    impl Harness {
        fn new(genesis_txs: Vec<Transaction>) -> Self {
            let mut index = BlockIndex::new(3);
            index.add_node(hash(0), &[], 0).unwrap();
            let mut data = HashMap::new();
            data.insert(
                hash(0),
                BlockData {
                    block: block(genesis_txs),
                    utxo_diff: UTXODiff::new(),
                },
            );
            let mut manager = VirtualManager::new(hash(0));
            manager.add_tip(hash(0), &[]);
            let mut harness = Self {
                index,
                chain: SelectedChain::new(hash(0)),
                finality: FinalityManager::new(hash(0), 100),
                data,
                base: SharedUTXOBase::new(),
                manager,
            };
            harness.update().unwrap();
            harness
        }

        fn add(&mut self, n: u8, parents: &[u8], txs: Vec<Transaction>) -> Result<(), DAGError> {
            let parents: Vec<_> = parents.iter().map(|p| hash(*p)).collect();
            let node = self.index.prepare_node(hash(n), &parents, 0)?;
            let selected = node.selected_parent().unwrap();
            let past = self.manager.past_utxo_view(&self.index, &self.data, &self.base, &selected)?;
            let (view, _) = VirtualManager::accept_blues(
                past,
                &node.ghostdag.mergeset_blues,
                &self.index,
                &self.data,
            )?;
            let diff = view.diff().cloned().unwrap_or_default();
            let mut check = view.into_layer();
            for tx in &txs {
                check.add_transaction(tx, node.blue_score())?;
            }
            self.index.insert_node(node)?;
            self.data.insert(
                hash(n),
                BlockData {
                    block: block(txs),
                    utxo_diff: diff,
                },
            );
            self.manager.add_tip(hash(n), &parents);
            Ok(())
        }

        fn update(&mut self) -> Result<VirtualUpdate, DAGError> {
            self.manager.update_virtual(
                &mut self.index,
                &mut self.chain,
                &mut self.finality,
                &self.data,
                &self.base,
            )
        }
    }

    #[test]
    fn genesis_outputs_reach_the_base() {
        let coinbase = Transaction::coinbase(vec![output(100, 1)], vec![0]);
        let harness = Harness::new(vec![coinbase.clone()]);
        let entry = harness.base.snapshot().get(&coinbase.outpoint(0)).cloned().unwrap();
        assert_eq!(entry.amount, 100);
        assert_eq!(harness.manager.virtual_block().parents, vec![hash(0)]);
    }

    #[test]
    fn merged_conflict_is_rejected_not_fatal() {
        let coinbase = Transaction::coinbase(vec![output(100, 1)], vec![0]);
        let mut harness = Harness::new(vec![coinbase.clone()]);
        let left = spend(coinbase.outpoint(0), 100, 2);
        let right = spend(coinbase.outpoint(0), 100, 3);
        harness.add(1, &[0], vec![left.clone()]).unwrap();
        harness.add(2, &[0], vec![right.clone()]).unwrap();
        let update = harness.update().unwrap();

        // hash(2) wins the tie and is applied first
        let snapshot = harness.base.snapshot();
        assert!(snapshot.get(&right.outpoint(0)).is_some());
        assert!(snapshot.get(&left.outpoint(0)).is_none());
        assert!(snapshot.get(&coinbase.outpoint(0)).is_none());

        let rejected: Vec<_> = harness
            .manager
            .virtual_block()
            .acceptance
            .iter()
            .filter(|a| a.outcome == TxOutcome::Rejected(RejectionReason::AlreadySpent))
            .map(|a| a.tx_id)
            .collect();
        assert_eq!(rejected, vec![left.id()]);
        assert!(update.changed_addresses.contains(&Address::from_script(&[3])));
    }

    #[test]
    fn reorg_rebases_without_replaying_from_genesis() {
        let coinbase = Transaction::coinbase(vec![output(100, 1)], vec![0]);
        let mut harness = Harness::new(vec![coinbase.clone()]);

        // 0 <- 1 <- 2 spends, then 0 <- 3 <- 4 <- 5 spends differently
        harness.add(1, &[0], vec![]).unwrap();
        harness.add(2, &[1], vec![spend(coinbase.outpoint(0), 100, 2)]).unwrap();
        harness.update().unwrap();

        harness.add(3, &[0], vec![]).unwrap();
        harness.add(4, &[3], vec![]).unwrap();
        let other = spend(coinbase.outpoint(0), 100, 9);
        harness.add(5, &[4], vec![other.clone()]).unwrap();
        let update = harness.update().unwrap();

        assert_eq!(harness.chain.tip(), hash(5));
        assert_eq!(update.chain_change.removed, vec![hash(2), hash(1)]);
        assert_eq!(update.chain_change.added, vec![hash(3), hash(4), hash(5)]);
        // Virtual merges 2 as well; 5's spend came first so 2's is rejected
        assert!(harness.base.snapshot().get(&other.outpoint(0)).is_some());
    }

    #[test]
    fn finality_violating_tip_is_disqualified() {
        let mut harness = Harness::new(vec![]);
        harness.finality = FinalityManager::new(hash(0), 2);
        for n in 1..=4 {
            harness.add(n, &[n - 1], vec![]).unwrap();
        }
        let update = harness.update().unwrap();
        assert_eq!(update.finality_point_moved, Some(hash(2)));

        // A heavier side chain from genesis
        harness.add(10, &[0], vec![]).unwrap();
        for n in 11..=15 {
            harness.add(n, &[n - 1], vec![]).unwrap();
        }
        let update = harness.update().unwrap();
        assert_eq!(update.disqualified, vec![hash(15)]);
        assert_eq!(harness.chain.tip(), hash(4));
        assert_eq!(
            harness.index.lookup_node(&hash(15)).unwrap().status,
            BlockStatus::Disqualified
        );
        assert_eq!(harness.finality.pending_conflicts(), &[hash(15)]);
    }

    #[test]
    fn failed_update_leaves_virtual_unchanged() {
        let mut harness = Harness::new(vec![]);
        harness.add(1, &[0], vec![]).unwrap();
        let before = harness.manager.selected_parent();

        // A diff recorded for block 1 that the base can't satisfy
        let mut broken = UTXODiff::new();
        let bogus = Transaction::coinbase(vec![output(1, 1)], vec![7]);
        broken
            .remove_entry(
                bogus.outpoint(0),
                braid_common::UTXOEntry {
                    amount: 1,
                    script_public_key: vec![1],
                    block_blue_score: 0,
                    is_coinbase: true,
                },
            )
            .unwrap();
        harness.data.get_mut(&hash(1)).unwrap().utxo_diff = broken;

        assert!(harness.update().is_err());
        assert_eq!(harness.manager.selected_parent(), before);
        assert_eq!(harness.chain.tip(), hash(0));
    }
}
