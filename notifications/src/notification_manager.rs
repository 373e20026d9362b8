//! Fans DAG events out to registered listeners according to their
//! subscriptions and watch-sets.

use crate::route::{Notification, NotificationRoute};
use braid_common::events::{
    BlockAddedEvent, ChainChangedEvent, DAGObserver, FinalityConflictEvent,
    FinalityConflictResolvedEvent, TransactionAddedEvent, UTXOOfAddressChangedEvent,
};
use braid_common::{Address, TxId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

pub type ListenerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BlockAdded,
    TransactionAdded,
    ChainChanged,
    FinalityConflict,
    FinalityConflictResolved,
    UTXOOfAddressChanged,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("listener {0} not found")]
    ListenerNotFound(ListenerId),

    #[error("delivery to listener {listener} failed: {source:#}")]
    Delivery {
        listener: ListenerId,
        source: anyhow::Error,
    },
}

struct Listener {
    route: Arc<dyn NotificationRoute>,
    subscriptions: HashSet<EventKind>,
    /// Consumed as each transaction is delivered
    watched_transactions: HashSet<TxId>,
    watched_addresses: HashSet<Address>,
}

impl Listener {
    fn send(&self, id: ListenerId, notification: Notification) -> Result<(), NotificationError> {
        self.route
            .enqueue(notification)
            .map_err(|source| NotificationError::Delivery {
                listener: id,
                source,
            })
    }
}

#[derive(Default)]
pub struct NotificationManager {
    listeners: RwLock<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, route: Arc<dyn NotificationRoute>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().insert(
            id,
            Listener {
                route,
                subscriptions: HashSet::new(),
                watched_transactions: HashSet::new(),
                watched_addresses: HashSet::new(),
            },
        );
        debug!(listener = id, "Notification listener added");
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<(), NotificationError> {
        self.listeners
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(NotificationError::ListenerNotFound(id))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn with_listener<T>(
        &self,
        id: ListenerId,
        f: impl FnOnce(&mut Listener) -> T,
    ) -> Result<T, NotificationError> {
        let mut listeners = self.listeners.write();
        let listener = listeners.get_mut(&id).ok_or(NotificationError::ListenerNotFound(id))?;
        Ok(f(listener))
    }

    /// Start propagating events of `kind`. Transaction and address events
    /// also need a watch-set, see [`watch_transaction`](Self::watch_transaction)
    /// and [`watch_addresses`](Self::watch_addresses).
    pub fn subscribe(&self, id: ListenerId, kind: EventKind) -> Result<(), NotificationError> {
        self.with_listener(id, |listener| {
            listener.subscriptions.insert(kind);
        })
    }

    pub fn unsubscribe(&self, id: ListenerId, kind: EventKind) -> Result<(), NotificationError> {
        self.with_listener(id, |listener| {
            listener.subscriptions.remove(&kind);
        })
    }

    pub fn watch_transaction(&self, id: ListenerId, tx_id: TxId) -> Result<(), NotificationError> {
        self.with_listener(id, |listener| {
            listener.subscriptions.insert(EventKind::TransactionAdded);
            listener.watched_transactions.insert(tx_id);
        })
    }

    pub fn watch_addresses(
        &self,
        id: ListenerId,
        addresses: impl IntoIterator<Item = Address>,
    ) -> Result<(), NotificationError> {
        self.with_listener(id, |listener| {
            listener.subscriptions.insert(EventKind::UTXOOfAddressChanged);
            listener.watched_addresses.extend(addresses);
        })
    }

    pub fn watched_transactions(&self, id: ListenerId) -> Result<Vec<TxId>, NotificationError> {
        self.with_listener(id, |listener| listener.watched_transactions.iter().copied().collect())
    }

    // ── Delivery ─────────────────────────────────────────────────────

    /// Send `notification` to every listener subscribed to `kind`.
    /// Every listener is tried; the first failure is returned.
    fn broadcast(&self, kind: EventKind, notification: Notification) -> Result<(), NotificationError> {
        let listeners = self.listeners.read();
        let mut first_error = None;
        for (id, listener) in listeners.iter() {
            if !listener.subscriptions.contains(&kind) {
                continue;
            }
            if let Err(e) = listener.send(*id, notification.clone()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn notify_block_added(&self, event: &BlockAddedEvent) -> Result<(), NotificationError> {
        self.broadcast(EventKind::BlockAdded, Notification::BlockAdded(event.clone()))
    }

    pub fn notify_chain_changed(&self, event: &ChainChangedEvent) -> Result<(), NotificationError> {
        self.broadcast(EventKind::ChainChanged, Notification::ChainChanged(event.clone()))
    }

    pub fn notify_finality_conflict(
        &self,
        event: &FinalityConflictEvent,
    ) -> Result<(), NotificationError> {
        self.broadcast(EventKind::FinalityConflict, Notification::FinalityConflict(event.clone()))
    }

    pub fn notify_finality_conflict_resolved(
        &self,
        event: &FinalityConflictResolvedEvent,
    ) -> Result<(), NotificationError> {
        self.broadcast(
            EventKind::FinalityConflictResolved,
            Notification::FinalityConflictResolved(event.clone()),
        )
    }

    /// One notification per watched transaction; the id leaves the watch-set
    pub fn notify_transaction_added(
        &self,
        event: &TransactionAddedEvent,
    ) -> Result<(), NotificationError> {
        let mut listeners = self.listeners.write();
        let mut first_error = None;
        for (id, listener) in listeners.iter_mut() {
            if !listener.subscriptions.contains(&EventKind::TransactionAdded) {
                continue;
            }
            for transaction in &event.transactions {
                if !listener.watched_transactions.remove(&transaction.id()) {
                    continue;
                }
                let notification = Notification::TransactionAdded {
                    block_hash: event.block_hash,
                    transaction: transaction.clone(),
                };
                if let Err(e) = listener.send(*id, notification) {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Each listener receives only the addresses it watches, if any
    pub fn notify_utxo_of_address_changed(
        &self,
        event: &UTXOOfAddressChangedEvent,
    ) -> Result<(), NotificationError> {
        let listeners = self.listeners.read();
        let mut first_error = None;
        for (id, listener) in listeners.iter() {
            if !listener.subscriptions.contains(&EventKind::UTXOOfAddressChanged) {
                continue;
            }
            let changed_addresses: Vec<Address> = event
                .changed_addresses
                .iter()
                .filter(|address| listener.watched_addresses.contains(*address))
                .cloned()
                .collect();
            if changed_addresses.is_empty() {
                continue;
            }
            let notification =
                Notification::UTXOOfAddressChanged(UTXOOfAddressChangedEvent { changed_addresses });
            if let Err(e) = listener.send(*id, notification) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn log_failure(result: Result<(), NotificationError>) {
    if let Err(e) = result {
        error!("Notification failed: {e}");
    }
}

impl DAGObserver for NotificationManager {
    fn block_added(&self, event: &BlockAddedEvent) {
        log_failure(self.notify_block_added(event));
    }

    fn transaction_added(&self, event: &TransactionAddedEvent) {
        log_failure(self.notify_transaction_added(event));
    }

    fn chain_changed(&self, event: &ChainChangedEvent) {
        log_failure(self.notify_chain_changed(event));
    }

    fn finality_conflict(&self, event: &FinalityConflictEvent) {
        log_failure(self.notify_finality_conflict(event));
    }

    fn finality_conflict_resolved(&self, event: &FinalityConflictResolvedEvent) {
        log_failure(self.notify_finality_conflict_resolved(event));
    }

    fn utxo_of_address_changed(&self, event: &UTXOOfAddressChangedEvent) {
        log_failure(self.notify_utxo_of_address_changed(event));
    }
}
