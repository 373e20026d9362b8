//! Outgoing routes notifications are enqueued on

use anyhow::{anyhow, Result};
use braid_common::events::{
    BlockAddedEvent, ChainChangedEvent, FinalityConflictEvent, FinalityConflictResolvedEvent,
    UTXOOfAddressChangedEvent,
};
use braid_common::{BlockHash, Transaction};
use tokio::sync::mpsc;

/// A single message to one listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    BlockAdded(BlockAddedEvent),
    /// One per transaction, unlike the engine event
    TransactionAdded {
        block_hash: BlockHash,
        transaction: Transaction,
    },
    ChainChanged(ChainChangedEvent),
    FinalityConflict(FinalityConflictEvent),
    FinalityConflictResolved(FinalityConflictResolvedEvent),
    UTXOOfAddressChanged(UTXOOfAddressChangedEvent),
}

/// Where a listener's notifications go, typically a peer connection
pub trait NotificationRoute: Send + Sync {
    fn enqueue(&self, notification: Notification) -> Result<()>;
}

/// Route backed by an unbounded tokio channel
pub struct ChannelRoute {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelRoute {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationRoute for ChannelRoute {
    fn enqueue(&self, notification: Notification) -> Result<()> {
        self.sender.send(notification).map_err(|_| anyhow!("notification channel closed"))
    }
}
