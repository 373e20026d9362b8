//! Events emitted by the DAG engine, and the observer that receives them

use crate::hash::{BlockHash, TxId};
use crate::types::{Address, Transaction};
use serde::{Deserialize, Serialize};

/// A block was accepted into the DAG
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAddedEvent {
    pub block_hash: BlockHash,
    pub parents: Vec<BlockHash>,
    pub blue_score: u64,
}

/// Transactions carried by a newly accepted block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAddedEvent {
    pub block_hash: BlockHash,
    pub transactions: Vec<Transaction>,
}

impl TransactionAddedEvent {
    pub fn tx_ids(&self) -> impl Iterator<Item = TxId> + '_ {
        self.transactions.iter().map(Transaction::id)
    }
}

/// The selected-parent chain changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainChangedEvent {
    /// Blocks leaving the chain, from the old tip downwards
    pub removed_chain_block_hashes: Vec<BlockHash>,

    /// Blocks joining the chain, from the fork point upwards
    pub added_chain_block_hashes: Vec<BlockHash>,
}

/// A candidate chain does not contain the finality point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityConflictEvent {
    pub violating_block_hash: BlockHash,
}

/// An external decision settled a finality conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityConflictResolvedEvent {
    pub finality_block_hash: BlockHash,
}

/// Addresses whose unspent outputs changed in the virtual UTXO view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UTXOOfAddressChangedEvent {
    pub changed_addresses: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DAGEvent {
    BlockAdded(BlockAddedEvent),
    TransactionAdded(TransactionAddedEvent),
    ChainChanged(ChainChangedEvent),
    FinalityConflict(FinalityConflictEvent),
    FinalityConflictResolved(FinalityConflictResolvedEvent),
    UTXOOfAddressChanged(UTXOOfAddressChangedEvent),
}

/// Receives DAG events. Called after the DAG writer section is released, in
/// the order the events were produced.
pub trait DAGObserver: Send + Sync {
    fn block_added(&self, event: &BlockAddedEvent);
    fn transaction_added(&self, event: &TransactionAddedEvent);
    fn chain_changed(&self, event: &ChainChangedEvent);
    fn finality_conflict(&self, event: &FinalityConflictEvent);
    fn finality_conflict_resolved(&self, event: &FinalityConflictResolvedEvent);
    fn utxo_of_address_changed(&self, event: &UTXOOfAddressChangedEvent);
}

impl DAGEvent {
    /// Route this event to the matching observer callback
    pub fn dispatch(&self, observer: &dyn DAGObserver) {
        match self {
            DAGEvent::BlockAdded(event) => observer.block_added(event),
            DAGEvent::TransactionAdded(event) => observer.transaction_added(event),
            DAGEvent::ChainChanged(event) => observer.chain_changed(event),
            DAGEvent::FinalityConflict(event) => observer.finality_conflict(event),
            DAGEvent::FinalityConflictResolved(event) => {
                observer.finality_conflict_resolved(event)
            }
            DAGEvent::UTXOOfAddressChanged(event) => observer.utxo_of_address_changed(event),
        }
    }
}

/// No-op observer for callers that don't need events.
pub struct NoOpObserver;

impl DAGObserver for NoOpObserver {
    fn block_added(&self, _: &BlockAddedEvent) {}
    fn transaction_added(&self, _: &TransactionAddedEvent) {}
    fn chain_changed(&self, _: &ChainChangedEvent) {}
    fn finality_conflict(&self, _: &FinalityConflictEvent) {}
    fn finality_conflict_resolved(&self, _: &FinalityConflictResolvedEvent) {}
    fn utxo_of_address_changed(&self, _: &UTXOOfAddressChangedEvent) {}
}
