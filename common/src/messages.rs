//! Definition of Braid messages

use crate::events::DAGEvent;
use crate::hash::BlockHash;
use crate::types::Block;

// Caryatid core messages
use caryatid_module_clock::messages::ClockTickMessage;

/// A decoded block is available for processing
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockAvailableMessage {
    pub block: Block,
}

/// A block failed processing
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockRejectedMessage {
    pub hash: BlockHash,

    /// Rendered error
    pub reason: String,
}

/// External decision on which chain wins a finality conflict
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResolveFinalityConflictMessage {
    pub finality_block_hash: BlockHash,
}

// === Global message enum ===
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Message {
    None(()), // Just so we have a simple default

    // Caryatid standard messages
    Clock(ClockTickMessage), // Clock tick

    // DAG messages
    BlockAvailable(BlockAvailableMessage), // Block ready to process
    BlockRejected(BlockRejectedMessage),   // Block failed processing
    ResolveFinalityConflict(ResolveFinalityConflictMessage), // Finality decision
    DAG(DAGEvent),                         // Event from the DAG engine
}

impl Default for Message {
    fn default() -> Self {
        Self::None(())
    }
}

// Casts from specific messages
impl From<ClockTickMessage> for Message {
    fn from(msg: ClockTickMessage) -> Self {
        Message::Clock(msg)
    }
}

impl From<BlockAvailableMessage> for Message {
    fn from(msg: BlockAvailableMessage) -> Self {
        Message::BlockAvailable(msg)
    }
}

impl From<BlockRejectedMessage> for Message {
    fn from(msg: BlockRejectedMessage) -> Self {
        Message::BlockRejected(msg)
    }
}

impl From<ResolveFinalityConflictMessage> for Message {
    fn from(msg: ResolveFinalityConflictMessage) -> Self {
        Message::ResolveFinalityConflict(msg)
    }
}

impl From<DAGEvent> for Message {
    fn from(event: DAGEvent) -> Self {
        Message::DAG(event)
    }
}
