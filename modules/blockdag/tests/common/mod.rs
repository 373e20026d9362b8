//! Shared builders for the block DAG integration tests.

#![allow(dead_code)]

use braid_common::events::{
    BlockAddedEvent, ChainChangedEvent, DAGEvent, DAGObserver, FinalityConflictEvent,
    FinalityConflictResolvedEvent, TransactionAddedEvent, UTXOOfAddressChangedEvent,
};
use braid_common::params::{DAGParams, EASIEST_BITS};
use braid_common::{Block, BlockHash, Outpoint, Transaction, TxInput, TxOutput};
use braid_module_blockdag::dag::BlockDAG;
use braid_module_blockdag::dag_store::InMemoryDAGStore;
use braid_module_blockdag::proof_of_work::CompactTarget;
use braid_module_blockdag::time_source::ManualTimeSource;
use parking_lot::Mutex;
use std::sync::Arc;

/// Local clock used by every test DAG, well past the genesis timestamp
pub const NOW: i64 = 1_600_000_000_000 + 1_000_000;

/// Records every event in delivery order
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<DAGEvent>>,
}

impl EventLog {
    pub fn take(&self) -> Vec<DAGEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn push(&self, event: DAGEvent) {
        self.events.lock().push(event);
    }
}

impl DAGObserver for EventLog {
    fn block_added(&self, event: &BlockAddedEvent) {
        self.push(DAGEvent::BlockAdded(event.clone()));
    }
    fn transaction_added(&self, event: &TransactionAddedEvent) {
        self.push(DAGEvent::TransactionAdded(event.clone()));
    }
    fn chain_changed(&self, event: &ChainChangedEvent) {
        self.push(DAGEvent::ChainChanged(event.clone()));
    }
    fn finality_conflict(&self, event: &FinalityConflictEvent) {
        self.push(DAGEvent::FinalityConflict(event.clone()));
    }
    fn finality_conflict_resolved(&self, event: &FinalityConflictResolvedEvent) {
        self.push(DAGEvent::FinalityConflictResolved(event.clone()));
    }
    fn utxo_of_address_changed(&self, event: &UTXOOfAddressChangedEvent) {
        self.push(DAGEvent::UTXOOfAddressChanged(event.clone()));
    }
}

pub struct TestDAG {
    pub dag: Arc<BlockDAG>,
    pub clock: Arc<ManualTimeSource>,
    pub store: Arc<InMemoryDAGStore>,
    pub events: Arc<EventLog>,
    pub params: DAGParams,
}

impl TestDAG {
    pub fn new() -> Self {
        Self::with_params(DAGParams::default())
    }

    pub fn with_params(params: DAGParams) -> Self {
        let store = Arc::new(InMemoryDAGStore::new());
        let clock = Arc::new(ManualTimeSource::new(NOW));
        Self::open(params, store, clock)
    }

    /// Open a second DAG over the same store and clock, as after a restart
    pub fn reopen(&self) -> Self {
        Self::open(self.params.clone(), self.store.clone(), self.clock.clone())
    }

    fn open(params: DAGParams, store: Arc<InMemoryDAGStore>, clock: Arc<ManualTimeSource>) -> Self {
        let dag = BlockDAG::with_components(
            params.clone(),
            store.clone(),
            clock.clone(),
            Arc::new(CompactTarget),
        )
        .unwrap();
        let events = Arc::new(EventLog::default());
        dag.register_observer(events.clone());
        Self {
            dag: Arc::new(dag),
            clock,
            store,
            events,
            params,
        }
    }

    pub fn genesis(&self) -> BlockHash {
        self.params.genesis.hash()
    }

    /// The output minted by the genesis coinbase
    pub fn genesis_output(&self) -> Outpoint {
        self.params.genesis.transactions[0].outpoint(0)
    }
}

/// Block `seconds` after genesis; `nonce` separates otherwise equal blocks
pub fn block(parents: &[BlockHash], seconds: i64, nonce: u64, transactions: Vec<Transaction>) -> Block {
    Block::new(
        parents.to_vec(),
        1_600_000_000_000 + seconds * 1000,
        EASIEST_BITS,
        nonce,
        transactions,
    )
}

/// Block with an explicit timestamp
pub fn block_at(parents: &[BlockHash], timestamp: i64, transactions: Vec<Transaction>) -> Block {
    Block::new(parents.to_vec(), timestamp, EASIEST_BITS, 0, transactions)
}

pub fn spend(outpoint: Outpoint, value: u64, script: u8) -> Transaction {
    Transaction::new(
        1,
        vec![TxInput::spending(outpoint)],
        vec![TxOutput {
            value,
            script_public_key: vec![script],
        }],
        0,
        Vec::new(),
    )
}
