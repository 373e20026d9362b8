//! Abstract key-value persistence for the DAG, and an in-memory backend

use anyhow::Result;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Key-value store the DAG persists through. Every call either completes
/// durably or reports the failure; the DAG never retries.
pub trait DAGStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Apply all operations or none of them
    fn write_batch(&self, batch: WriteBatch) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered set of writes applied atomically
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Key layout
pub mod keys {
    use braid_common::BlockHash;

    pub const BLOCK_COUNT: &[u8] = b"block-count";
    /// Latest finality conflict resolution
    pub const FINALITY_POINT: &[u8] = b"finality-point";

    fn prefixed(prefix: &[u8], rest: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + rest.len());
        key.extend_from_slice(prefix);
        key.extend_from_slice(rest);
        key
    }

    pub fn block(hash: &BlockHash) -> Vec<u8> {
        prefixed(b"block/", hash.as_ref())
    }

    /// Insertion-order log entry
    pub fn block_order(sequence: u64) -> Vec<u8> {
        prefixed(b"order/", &sequence.to_be_bytes())
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_cbor::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_cbor::from_slice(bytes)?)
}

/// Store held entirely in memory; batches apply under a single write lock
#[derive(Default)]
pub struct InMemoryDAGStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryDAGStore {
    pub fn new() -> Self {
        info!("Storing DAG in memory");
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DAGStore for InMemoryDAGStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut entries = self.entries.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
