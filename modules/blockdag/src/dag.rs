//! The DAG coordinator: the single writer over the block index, selected
//! chain, virtual block and finality state.
//!
//! Every mutation runs inside one write lock. Observers are notified after
//! the lock is released, so an observer may call back into read accessors.

use crate::block_index::BlockIndex;
use crate::block_node::BlockNode;
use crate::block_queues::{DelayedBlocks, OrphanPool};
use crate::chain_selector::SelectedChain;
use crate::dag_error::{DAGError, ViolationKind};
use crate::dag_store::{decode, encode, keys, DAGStore, WriteBatch};
use crate::finality::FinalityManager;
use crate::proof_of_work::{CompactTarget, ProofOfWork};
use crate::time_source::{SystemTimeSource, TimeSource};
use crate::utxo_diff::UTXODiff;
use crate::utxo_set::SharedUTXOBase;
use crate::virtual_manager::{BlockData, TxAcceptance, VirtualManager, VirtualUpdate};
use anyhow::anyhow;
use braid_common::events::{
    BlockAddedEvent, DAGEvent, DAGObserver, FinalityConflictEvent, FinalityConflictResolvedEvent,
    TransactionAddedEvent, UTXOOfAddressChangedEvent,
};
use braid_common::params::DAGParams;
use braid_common::wait_group::TaskTracker;
use braid_common::{Block, BlockHash, BlockStatus, Outpoint, UTXOEntry};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-call processing options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BehaviorFlags(u8);

impl BehaviorFlags {
    pub const NONE: BehaviorFlags = BehaviorFlags(0);
    /// Skip the proof-of-work gate, for trusted or test blocks
    pub const NO_POW_CHECK: BehaviorFlags = BehaviorFlags(1);

    pub fn contains(self, other: BehaviorFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BehaviorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        BehaviorFlags(self.0 | rhs.0)
    }
}

/// What happened to a processed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Accepted,
    /// Held until these parents arrive
    Orphan { missing: Vec<BlockHash> },
    /// Held until local time reaches `process_at`
    Delayed { process_at: i64 },
}

/// Stored record of the latest finality conflict resolution
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FinalityRecord {
    /// Number of blocks in the DAG when the resolution was applied
    block_count: u64,
    finality_point: BlockHash,
}

struct DAGState {
    index: BlockIndex,
    chain: SelectedChain,
    virtual_manager: VirtualManager,
    finality: FinalityManager,
    block_data: HashMap<BlockHash, BlockData>,
    orphans: OrphanPool,
    delayed: DelayedBlocks,
    invalid: HashSet<BlockHash>,
    /// Blocks in the index, and the next insertion-order sequence number
    block_count: u64,
}

impl DAGState {
    fn update_virtual(&mut self, base: &SharedUTXOBase) -> Result<VirtualUpdate, DAGError> {
        let DAGState {
            index,
            chain,
            virtual_manager,
            finality,
            block_data,
            ..
        } = self;
        virtual_manager.update_virtual(index, chain, finality, block_data, base)
    }
}

pub struct BlockDAG {
    params: DAGParams,
    state: RwLock<DAGState>,
    utxo_base: SharedUTXOBase,
    store: Arc<dyn DAGStore>,
    time_source: Arc<dyn TimeSource>,
    pow: Arc<dyn ProofOfWork>,
    observers: RwLock<Vec<Arc<dyn DAGObserver>>>,
    tasks: TaskTracker,
    /// Set once by `shutdown`; background tasks stop waiting when it flips
    stop: watch::Sender<bool>,
    /// Whether the delayed-block task is running
    draining: AtomicBool,
    /// Wakes the delayed-block task to recompute its deadline
    delayed_wakeup: Notify,
}

impl BlockDAG {
    /// Open a DAG over `store` with the system clock and the compact-target
    /// proof-of-work gate
    pub fn new(params: DAGParams, store: Arc<dyn DAGStore>) -> Result<Self, DAGError> {
        Self::with_components(
            params,
            store,
            Arc::new(SystemTimeSource),
            Arc::new(CompactTarget),
        )
    }

    /// Open a DAG over `store`. An empty store is seeded with genesis; a
    /// non-empty one is replayed.
    pub fn with_components(
        params: DAGParams,
        store: Arc<dyn DAGStore>,
        time_source: Arc<dyn TimeSource>,
        pow: Arc<dyn ProofOfWork>,
    ) -> Result<Self, DAGError> {
        let genesis = params.genesis.hash();
        let state = DAGState {
            index: BlockIndex::new(params.k),
            chain: SelectedChain::new(genesis),
            virtual_manager: VirtualManager::new(genesis),
            finality: FinalityManager::new(genesis, params.finality_depth),
            block_data: HashMap::new(),
            orphans: OrphanPool::new(params.max_orphan_blocks, params.orphan_expiration_ms),
            delayed: DelayedBlocks::new(),
            invalid: HashSet::new(),
            block_count: 0,
        };

        let dag = Self {
            utxo_base: SharedUTXOBase::new(),
            state: RwLock::new(state),
            store,
            time_source,
            pow,
            observers: RwLock::new(Vec::new()),
            tasks: TaskTracker::new(),
            stop: watch::channel(false).0,
            draining: AtomicBool::new(false),
            delayed_wakeup: Notify::new(),
            params,
        };

        let stored_count = dag.load::<u64>(keys::BLOCK_COUNT)?;
        match stored_count {
            Some(count) if count > 0 => dag.restore(count)?,
            _ => {
                let mut state = dag.state.write();
                let genesis = Arc::new(dag.params.genesis.clone());
                dag.accept_block(&mut state, genesis, true, &mut Vec::new())?;
                info!(genesis = %dag.params.genesis.hash(), "Initialised new block DAG");
            }
        }
        Ok(dag)
    }

    // ── Restore ──────────────────────────────────────────────────────

    /// Replay every stored block in insertion order without writing anything
    fn restore(&self, count: u64) -> Result<(), DAGError> {
        let resolution = self.load::<FinalityRecord>(keys::FINALITY_POINT)?;
        self.replay(count, resolution)?;

        let state = self.state.read();
        info!(
            blocks = state.block_count,
            tip = %state.chain.tip(),
            finality_point = %state.finality.finality_point(),
            "Restored block DAG from store"
        );
        Ok(())
    }

    fn replay(&self, count: u64, resolution: Option<FinalityRecord>) -> Result<(), DAGError> {
        let mut state = self.state.write();
        for sequence in 0..count {
            let hash: BlockHash = self
                .load(&keys::block_order(sequence))?
                .ok_or_else(|| DAGError::Persistence(anyhow!("missing order record {sequence}")))?;
            if sequence == 0 && hash != self.params.genesis.hash() {
                return Err(DAGError::Persistence(anyhow!(
                    "stored genesis {hash} does not match configured genesis {}",
                    self.params.genesis.hash()
                )));
            }
            let block: Block = self
                .load(&keys::block(&hash))?
                .ok_or_else(|| DAGError::Persistence(anyhow!("missing block record {hash}")))?;
            self.accept_block(&mut state, Arc::new(block), false, &mut Vec::new())?;

            if let Some(record) = resolution.filter(|r| r.block_count == state.block_count) {
                self.apply_resolution(&mut state, record.finality_point)?;
            }
        }
        Ok(())
    }

    fn load<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, DAGError> {
        match self.store.get(key).map_err(DAGError::Persistence)? {
            Some(bytes) => Ok(Some(decode(&bytes).map_err(DAGError::Persistence)?)),
            None => Ok(None),
        }
    }

    // ── Observers and tasks ──────────────────────────────────────────

    pub fn register_observer(&self, observer: Arc<dyn DAGObserver>) {
        self.observers.write().push(observer);
    }

    fn notify(&self, events: Vec<DAGEvent>) {
        if events.is_empty() {
            return;
        }
        let observers = self.observers.read();
        for event in &events {
            for observer in observers.iter() {
                event.dispatch(observer.as_ref());
            }
        }
    }

    /// Process delayed blocks as they become ready, on a tracked task that
    /// ends when the queue is empty or the DAG shuts down.
    ///
    /// At most one such task runs. While it does, this only wakes it to pick
    /// up an earlier deadline and returns `None`.
    pub fn spawn_delayed_processing(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.draining.swap(true, Ordering::SeqCst) {
            self.delayed_wakeup.notify_one();
            return None;
        }
        let dag = Arc::clone(self);
        let mut stop = self.stop.subscribe();
        let handle = self.tasks.spawn("delayed-blocks", async move {
            loop {
                let Some(wait) = dag.next_delayed_wait() else {
                    dag.draining.store(false, Ordering::SeqCst);
                    // A block delayed after the check above still needs draining
                    if dag.next_delayed_time().is_some() && !dag.draining.swap(true, Ordering::SeqCst) {
                        continue;
                    }
                    return;
                };
                if wait.is_zero() {
                    for (hash, result) in dag.process_delayed_blocks() {
                        if let Err(e) = result {
                            warn!(block = %hash, "Delayed block rejected: {e}");
                        }
                    }
                    continue;
                }
                let stopping = *stop.borrow_and_update();
                if stopping {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = dag.delayed_wakeup.notified() => {}
                    _ = stop.changed() => break,
                }
            }
            debug!(pending = dag.delayed_count(), "Delayed block processing stopped");
            dag.draining.store(false, Ordering::SeqCst);
        });
        Some(handle)
    }

    /// Stop background waits, then wait for every tracked task to finish
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        let active = self.tasks.active();
        if active > 0 {
            info!(tasks = active, "Waiting for background tasks");
        }
        self.tasks.wait().await;
    }

    // ── Block processing ─────────────────────────────────────────────

    pub fn process_block(&self, block: Block, flags: BehaviorFlags) -> Result<BlockOutcome, DAGError> {
        for (hash, result) in self.process_delayed_blocks() {
            if let Err(e) = result {
                warn!(block = %hash, "Delayed block rejected: {e}");
            }
        }

        let mut events = Vec::new();
        let result = {
            let mut state = self.state.write();
            self.process_locked(&mut state, Arc::new(block), flags, &mut events)
        };
        self.notify(events);
        result
    }

    /// Process every delayed block whose time has come
    pub fn process_delayed_blocks(&self) -> Vec<(BlockHash, Result<BlockOutcome, DAGError>)> {
        let now = self.time_source.now_millis();
        let mut events = Vec::new();
        let mut results = Vec::new();
        {
            let mut state = self.state.write();
            state.orphans.expire(now);
            while let Some((block, flags)) = state.delayed.pop_ready(now) {
                let hash = block.hash();
                debug!(block = %hash, "Processing delayed block");
                let result = self.process_locked(&mut state, block, flags, &mut events);
                results.push((hash, result));
            }
        }
        self.notify(events);
        results
    }

    /// Process one block, then any orphans it completes
    fn process_locked(
        &self,
        state: &mut DAGState,
        block: Arc<Block>,
        flags: BehaviorFlags,
        events: &mut Vec<DAGEvent>,
    ) -> Result<BlockOutcome, DAGError> {
        let hash = block.hash();
        let outcome = self.process_one(state, block, flags, events)?;
        if outcome == BlockOutcome::Accepted {
            self.unorphan(state, hash, events);
        }
        Ok(outcome)
    }

    fn unorphan(&self, state: &mut DAGState, parent: BlockHash, events: &mut Vec<DAGEvent>) {
        let mut accepted = vec![parent];
        while let Some(parent) = accepted.pop() {
            let index = &state.index;
            let ready = state.orphans.take_ready(&parent, |p| index.contains(p));
            for (block, flags) in ready {
                let hash = block.hash();
                debug!(block = %hash, parent = %parent, "Processing orphan");
                match self.process_one(state, block, flags, events) {
                    Ok(BlockOutcome::Accepted) => accepted.push(hash),
                    Ok(_) => {}
                    Err(e) => warn!(block = %hash, "Orphan rejected: {e}"),
                }
            }
        }
    }

    fn process_one(
        &self,
        state: &mut DAGState,
        block: Arc<Block>,
        flags: BehaviorFlags,
        events: &mut Vec<DAGEvent>,
    ) -> Result<BlockOutcome, DAGError> {
        let hash = block.hash();
        if state.index.contains(&hash) || state.orphans.contains(&hash) || state.delayed.contains(&hash) {
            return Err(DAGError::violation(hash, ViolationKind::DuplicateBlock));
        }
        if state.invalid.contains(&hash) {
            return Err(DAGError::KnownInvalid { hash });
        }

        let result = self.check_block(state, &block, flags).and_then(|()| {
            self.route_block(state, block, flags, events)
        });
        if let Err(e) = &result {
            if e.invalidates_block() {
                state.invalid.insert(hash);
            }
            warn!(block = %hash, "Block rejected: {e}");
        }
        result
    }

    /// Context-free checks: proof of work and parent list shape
    fn check_block(&self, state: &DAGState, block: &Block, flags: BehaviorFlags) -> Result<(), DAGError> {
        let hash = block.hash();
        if !flags.contains(BehaviorFlags::NO_POW_CHECK) && !self.pow.check(&block.header) {
            return Err(DAGError::InvalidProofOfWork { hash });
        }

        let parents = block.parents();
        if parents.is_empty() {
            return Err(DAGError::violation(hash, ViolationKind::NoParents));
        }
        if parents.len() > self.params.max_parents {
            return Err(DAGError::violation(
                hash,
                ViolationKind::TooManyParents {
                    count: parents.len(),
                    max: self.params.max_parents,
                },
            ));
        }
        let mut seen = HashSet::with_capacity(parents.len());
        for parent in parents {
            if !seen.insert(parent) {
                return Err(DAGError::violation(hash, ViolationKind::DuplicateParent(*parent)));
            }
            if state.invalid.contains(parent) {
                return Err(DAGError::violation(hash, ViolationKind::InvalidParent(*parent)));
            }
        }
        Ok(())
    }

    /// Send the block to the orphan pool, the delayed queue or acceptance
    fn route_block(
        &self,
        state: &mut DAGState,
        block: Arc<Block>,
        flags: BehaviorFlags,
        events: &mut Vec<DAGEvent>,
    ) -> Result<BlockOutcome, DAGError> {
        let hash = block.hash();
        let now = self.time_source.now_millis();

        let missing: Vec<BlockHash> = block
            .parents()
            .iter()
            .filter(|p| !state.index.contains(p) && !state.delayed.contains(p))
            .copied()
            .collect();
        if !missing.is_empty() {
            info!(block = %hash, missing = missing.len(), "Block is an orphan");
            state.orphans.add(block, flags, now);
            return Ok(BlockOutcome::Orphan { missing });
        }

        // A child of a delayed block goes strictly after it
        let own_time = block.timestamp() - self.params.timestamp_deviation_ms;
        let after_parents =
            block.parents().iter().filter_map(|p| state.delayed.process_time(p)).max().map(|t| t + 1);
        if own_time > now || after_parents.is_some() {
            let process_at = after_parents.map_or(own_time, |t| t.max(own_time));
            info!(block = %hash, process_at, "Block timestamp in the future, delaying");
            state.delayed.add(block, flags, process_at);
            return Ok(BlockOutcome::Delayed { process_at });
        }

        self.accept_block(state, block, true, events)?;
        Ok(BlockOutcome::Accepted)
    }

    /// Insert a block whose parents are all in the index. Either the block is
    /// fully accepted or the DAG and store are left as they were.
    fn accept_block(
        &self,
        state: &mut DAGState,
        block: Arc<Block>,
        persist: bool,
        events: &mut Vec<DAGEvent>,
    ) -> Result<(), DAGError> {
        let hash = block.hash();
        let node = state.index.prepare_node(hash, block.parents(), block.timestamp())?;
        let utxo_diff = self.block_utxo_diff(state, &node, &block)?;

        let sequence = state.block_count;
        if persist {
            let mut batch = WriteBatch::new();
            batch.put(keys::block(&hash), encode(block.as_ref()).map_err(DAGError::Persistence)?);
            batch.put(keys::block_order(sequence), encode(&hash).map_err(DAGError::Persistence)?);
            batch.put(keys::BLOCK_COUNT.to_vec(), encode(&(sequence + 1)).map_err(DAGError::Persistence)?);
            self.store.write_batch(batch).map_err(DAGError::Persistence)?;
        }

        let parents = node.parents.clone();
        let blue_score = node.blue_score();
        state.index.insert_node(node)?;
        state.block_data.insert(
            hash,
            BlockData {
                block: block.clone(),
                utxo_diff,
            },
        );
        state.virtual_manager.add_tip(hash, &parents);

        let update = match state.update_virtual(&self.utxo_base) {
            Ok(update) => update,
            Err(e) => {
                error!(block = %hash, "Virtual update failed, rolling back: {e}");
                self.roll_back(state, &hash, &parents, sequence, persist)?;
                return Err(e);
            }
        };
        state.block_count = sequence + 1;

        events.push(DAGEvent::BlockAdded(BlockAddedEvent {
            block_hash: hash,
            parents,
            blue_score,
        }));
        if !block.transactions.is_empty() {
            events.push(DAGEvent::TransactionAdded(TransactionAddedEvent {
                block_hash: hash,
                transactions: block.transactions.clone(),
            }));
        }
        Self::push_update_events(update, events);
        Ok(())
    }

    fn push_update_events(update: VirtualUpdate, events: &mut Vec<DAGEvent>) {
        if !update.chain_change.is_empty() {
            events.push(DAGEvent::ChainChanged(update.chain_change.to_event()));
        }
        for violating in update.disqualified {
            events.push(DAGEvent::FinalityConflict(FinalityConflictEvent {
                violating_block_hash: violating,
            }));
        }
        if !update.changed_addresses.is_empty() {
            events.push(DAGEvent::UTXOOfAddressChanged(UTXOOfAddressChangedEvent {
                changed_addresses: update.changed_addresses,
            }));
        }
    }

    fn roll_back(
        &self,
        state: &mut DAGState,
        hash: &BlockHash,
        parents: &[BlockHash],
        sequence: u64,
        persisted: bool,
    ) -> Result<(), DAGError> {
        state.index.remove_leaf(hash)?;
        state.block_data.remove(hash);
        state.virtual_manager.remove_tip(&state.index, hash, parents);
        if persisted {
            let mut batch = WriteBatch::new();
            batch.delete(keys::block(hash));
            batch.delete(keys::block_order(sequence));
            batch.put(keys::BLOCK_COUNT.to_vec(), encode(&sequence).map_err(DAGError::Persistence)?);
            self.store.write_batch(batch).map_err(DAGError::Persistence)?;
        }
        Ok(())
    }

    /// Diff from the selected parent's past UTXO to the block's, after
    /// checking the block's own transactions against it
    fn block_utxo_diff(&self, state: &DAGState, node: &BlockNode, block: &Block) -> Result<UTXODiff, DAGError> {
        let Some(selected_parent) = node.selected_parent() else {
            let mut view = self.utxo_base.diff_view();
            for tx in &block.transactions {
                view.add_transaction(tx, 0)?;
            }
            return Ok(UTXODiff::new());
        };

        let past = state.virtual_manager.past_utxo_view(
            &state.index,
            &state.block_data,
            &self.utxo_base,
            &selected_parent,
        )?;
        let (past, _) = VirtualManager::accept_blues(
            past,
            &node.ghostdag.mergeset_blues,
            &state.index,
            &state.block_data,
        )?;
        let utxo_diff = past.diff().cloned().unwrap_or_default();

        let mut own = past.into_layer();
        for tx in &block.transactions {
            own.add_transaction(tx, node.blue_score())?;
        }
        Ok(utxo_diff)
    }

    // ── Finality conflicts ───────────────────────────────────────────

    /// Settle a pending finality conflict in favour of the chain through
    /// `winner`
    pub fn resolve_finality_conflict(&self, winner: BlockHash) -> Result<(), DAGError> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.write();
            self.resolve_locked(&mut state, winner, &mut events)
        };
        self.notify(events);
        result
    }

    fn resolve_locked(
        &self,
        state: &mut DAGState,
        winner: BlockHash,
        events: &mut Vec<DAGEvent>,
    ) -> Result<(), DAGError> {
        if !state.finality.has_pending_conflicts() {
            return Err(DAGError::NoFinalityConflict);
        }
        if state.index.node(&winner)?.status == BlockStatus::Invalid {
            return Err(DAGError::KnownInvalid { hash: winner });
        }

        let record = FinalityRecord {
            block_count: state.block_count,
            finality_point: winner,
        };
        let previous = self.store.get(keys::FINALITY_POINT).map_err(DAGError::Persistence)?;
        self.store
            .put(keys::FINALITY_POINT, &encode(&record).map_err(DAGError::Persistence)?)
            .map_err(DAGError::Persistence)?;

        let update = match self.apply_resolution(state, winner) {
            Ok(update) => update,
            Err(e) => {
                let restored = match previous {
                    Some(bytes) => self.store.put(keys::FINALITY_POINT, &bytes),
                    None => self.store.delete(keys::FINALITY_POINT),
                };
                restored.map_err(DAGError::Persistence)?;
                return Err(e);
            }
        };

        events.push(DAGEvent::FinalityConflictResolved(FinalityConflictResolvedEvent {
            finality_block_hash: winner,
        }));
        Self::push_update_events(update, events);
        Ok(())
    }

    /// Move the finality point to `winner`, requalify blocks whose chain
    /// passes through it, disqualify tips whose chain doesn't, and recompute
    /// the virtual. Undone completely on failure.
    fn apply_resolution(&self, state: &mut DAGState, winner: BlockHash) -> Result<VirtualUpdate, DAGError> {
        let saved_finality = state.finality.clone();
        let mut changed: Vec<(BlockHash, BlockStatus)> = Vec::new();

        for node in state.index.nodes() {
            if node.status == BlockStatus::Disqualified
                && state.index.is_in_selected_chain_of(&winner, &node.hash)
            {
                changed.push((node.hash, BlockStatus::Valid));
            }
        }
        for tip in state.virtual_manager.tips() {
            let status = state.index.node(tip)?.status;
            if status == BlockStatus::Valid && !state.index.is_in_selected_chain_of(&winner, tip) {
                changed.push((*tip, BlockStatus::Disqualified));
            }
        }

        let mut previous = Vec::with_capacity(changed.len());
        for (hash, status) in &changed {
            previous.push((*hash, state.index.node(hash)?.status));
            state.index.set_status(hash, *status)?;
        }
        state.finality.resolve(winner);

        match state.update_virtual(&self.utxo_base) {
            Ok(update) => Ok(update),
            Err(e) => {
                error!(winner = %winner, "Virtual update failed during resolution: {e}");
                for (hash, status) in previous {
                    state.index.set_status(&hash, status)?;
                }
                state.finality = saved_finality;
                Err(e)
            }
        }
    }

    // ── Read accessors ───────────────────────────────────────────────

    pub fn params(&self) -> &DAGParams {
        &self.params
    }

    /// Entry for `outpoint` in the committed virtual UTXO set
    pub fn lookup_utxo(&self, outpoint: &Outpoint) -> Option<UTXOEntry> {
        self.utxo_base.snapshot().get(outpoint).cloned()
    }

    pub fn utxo_count(&self) -> usize {
        self.utxo_base.snapshot().len()
    }

    pub fn is_ancestor_of(&self, a: &BlockHash, b: &BlockHash) -> bool {
        self.state.read().index.is_ancestor_of(a, b)
    }

    pub fn blue_score(&self, hash: &BlockHash) -> Result<u64, DAGError> {
        Ok(self.state.read().index.node(hash)?.blue_score())
    }

    pub fn contains_block(&self, hash: &BlockHash) -> bool {
        self.state.read().index.contains(hash)
    }

    pub fn get_block(&self, hash: &BlockHash) -> Option<Arc<Block>> {
        self.state.read().block_data.get(hash).map(|data| data.block.clone())
    }

    pub fn block_status(&self, hash: &BlockHash) -> Option<BlockStatus> {
        let state = self.state.read();
        if let Some(node) = state.index.lookup_node(hash) {
            Some(node.status)
        } else if state.orphans.contains(hash) {
            Some(BlockStatus::OrphanPending)
        } else if state.invalid.contains(hash) {
            Some(BlockStatus::Invalid)
        } else {
            None
        }
    }

    pub fn block_count(&self) -> u64 {
        self.state.read().block_count
    }

    /// The virtual's selected parent
    pub fn selected_tip(&self) -> BlockHash {
        self.state.read().chain.tip()
    }

    /// Selected-parent chain from genesis to the selected tip
    pub fn selected_chain(&self) -> Vec<BlockHash> {
        self.state.read().chain.blocks().to_vec()
    }

    pub fn is_in_selected_chain(&self, hash: &BlockHash) -> bool {
        let state = self.state.read();
        state.chain.contains(&state.index, hash)
    }

    pub fn tips(&self) -> Vec<BlockHash> {
        self.state.read().virtual_manager.tips().iter().copied().collect()
    }

    pub fn virtual_parents(&self) -> Vec<BlockHash> {
        self.state.read().virtual_manager.virtual_block().parents.clone()
    }

    pub fn virtual_blue_score(&self) -> u64 {
        self.state.read().virtual_manager.virtual_block().ghostdag.blue_score
    }

    /// Per-transaction outcome of the virtual's mergeset
    pub fn virtual_acceptance_data(&self) -> Vec<TxAcceptance> {
        self.state.read().virtual_manager.virtual_block().acceptance.clone()
    }

    pub fn finality_point(&self) -> BlockHash {
        self.state.read().finality.finality_point()
    }

    pub fn pending_finality_conflicts(&self) -> Vec<BlockHash> {
        self.state.read().finality.pending_conflicts().to_vec()
    }

    pub fn orphan_count(&self) -> usize {
        self.state.read().orphans.len()
    }

    pub fn delayed_count(&self) -> usize {
        self.state.read().delayed.len()
    }

    pub fn next_delayed_time(&self) -> Option<i64> {
        self.state.read().delayed.next_process_time()
    }

    /// Time until the earliest delayed block is due, zero if one already is
    pub fn next_delayed_wait(&self) -> Option<Duration> {
        let wait = self.next_delayed_time()? - self.time_source.now_millis();
        Some(Duration::from_millis(wait.max(0) as u64))
    }
}
