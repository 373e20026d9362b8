//! Core type definitions for Braid

use crate::crypto::blake2b_256;
use crate::hash::{BlockHash, Hash, TxId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to one output of a transaction; the key space of the UTXO set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Outpoint {
    /// Transaction that created the output
    pub tx_id: TxId,

    /// Output index within that transaction
    pub index: u32,
}

impl Outpoint {
    pub fn new(tx_id: TxId, index: u32) -> Self {
        Self { tx_id, index }
    }

    /// Fixed-width big-endian encoding, as committed to by transaction ids
    pub fn to_key_bytes(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(36);
        key.extend_from_slice(self.tx_id.as_ref());
        key.extend_from_slice(&self.index.to_be_bytes());
        key
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.index)
    }
}

/// Unspent output as held in the UTXO set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UTXOEntry {
    /// Value
    pub amount: u64,

    /// Spending script
    pub script_public_key: Vec<u8>,

    /// Blue score of the block that included the creating transaction
    pub block_blue_score: u64,

    /// Created by a coinbase transaction
    pub is_coinbase: bool,
}

/// Address derived from a spending script, used to key address subscriptions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn from_script(script_public_key: &[u8]) -> Self {
        Self(hex::encode(script_public_key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Output being spent
    pub previous_outpoint: Outpoint,

    /// Unlocking script
    pub signature_script: Vec<u8>,

    pub sequence: u64,
}

impl TxInput {
    pub fn spending(previous_outpoint: Outpoint) -> Self {
        Self {
            previous_outpoint,
            signature_script: Vec::new(),
            sequence: u64::MAX,
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script_public_key: Vec<u8>,
}

/// A transaction. Its id is computed once at construction, so the fields are
/// read-only after that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    id: TxId,
    version: u16,
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    lock_time: u64,
    payload: Vec<u8>,
}

impl Transaction {
    pub fn new(
        version: u16,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        lock_time: u64,
        payload: Vec<u8>,
    ) -> Self {
        let id = Self::compute_id(version, &inputs, &outputs, lock_time, &payload);
        Self {
            id,
            version,
            inputs,
            outputs,
            lock_time,
            payload,
        }
    }

    /// Coinbase transaction paying `outputs`. The payload must make it unique,
    /// usually by carrying the blue score of the block it is minted in.
    pub fn coinbase(outputs: Vec<TxOutput>, payload: Vec<u8>) -> Self {
        Self::new(1, Vec::new(), outputs, 0, payload)
    }

    fn compute_id(
        version: u16,
        inputs: &[TxInput],
        outputs: &[TxOutput],
        lock_time: u64,
        payload: &[u8],
    ) -> TxId {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&version.to_le_bytes());
        buffer.extend_from_slice(&(inputs.len() as u64).to_le_bytes());
        for input in inputs {
            buffer.extend_from_slice(&input.previous_outpoint.to_key_bytes());
            buffer.extend_from_slice(&(input.signature_script.len() as u64).to_le_bytes());
            buffer.extend_from_slice(&input.signature_script);
            buffer.extend_from_slice(&input.sequence.to_le_bytes());
        }
        buffer.extend_from_slice(&(outputs.len() as u64).to_le_bytes());
        for output in outputs {
            buffer.extend_from_slice(&output.value.to_le_bytes());
            buffer.extend_from_slice(&(output.script_public_key.len() as u64).to_le_bytes());
            buffer.extend_from_slice(&output.script_public_key);
        }
        buffer.extend_from_slice(&lock_time.to_le_bytes());
        buffer.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        buffer.extend_from_slice(payload);
        blake2b_256(&[&buffer])
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn inputs(&self) -> &[TxInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    pub fn lock_time(&self) -> u64 {
        self.lock_time
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// A transaction with no inputs only creates outputs
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Outpoint of output `index`
    pub fn outpoint(&self, index: u32) -> Outpoint {
        Outpoint::new(self.id, index)
    }
}

/// Block header as handed over by the wire layer, already decoded and with
/// its hash computed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block hash (identity key)
    pub hash: BlockHash,

    pub version: u16,

    /// DAG edges
    pub parent_hashes: Vec<BlockHash>,

    /// Commitment to the transaction list
    pub transactions_root: Hash<32>,

    /// Unix time in milliseconds
    pub timestamp: i64,

    /// Compact proof-of-work target
    pub bits: u32,

    pub nonce: u64,
}

impl BlockHeader {
    pub fn new(
        version: u16,
        parent_hashes: Vec<BlockHash>,
        transactions_root: Hash<32>,
        timestamp: i64,
        bits: u32,
        nonce: u64,
    ) -> Self {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&version.to_le_bytes());
        buffer.extend_from_slice(&(parent_hashes.len() as u64).to_le_bytes());
        for parent in &parent_hashes {
            buffer.extend_from_slice(parent.as_ref());
        }
        buffer.extend_from_slice(transactions_root.as_ref());
        buffer.extend_from_slice(&timestamp.to_le_bytes());
        buffer.extend_from_slice(&bits.to_le_bytes());
        buffer.extend_from_slice(&nonce.to_le_bytes());

        Self {
            hash: blake2b_256(&[&buffer]),
            version,
            parent_hashes,
            transactions_root,
            timestamp,
            bits,
            nonce,
        }
    }
}

/// A full block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Build a block, committing to its transactions and hashing the header
    pub fn new(
        parent_hashes: Vec<BlockHash>,
        timestamp: i64,
        bits: u32,
        nonce: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        let ids: Vec<TxId> = transactions.iter().map(Transaction::id).collect();
        let parts: Vec<&[u8]> = ids.iter().map(|id| id.as_ref()).collect();
        let transactions_root = blake2b_256(&parts);
        Self {
            header: BlockHeader::new(1, parent_hashes, transactions_root, timestamp, bits, nonce),
            transactions,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.hash
    }

    pub fn parents(&self) -> &[BlockHash] {
        &self.header.parent_hashes
    }

    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    pub fn is_genesis(&self) -> bool {
        self.header.parent_hashes.is_empty()
    }
}

/// Where a block stands in the DAG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStatus {
    /// Accepted into the index and eligible as a virtual parent
    Valid,

    /// Failed validation; never reconsidered
    Invalid,

    /// Waiting in the orphan pool for a missing parent
    OrphanPending,

    /// Its selected chain misses the finality point; excluded from the
    /// virtual until a finality conflict resolution requalifies it
    Disqualified,
}
