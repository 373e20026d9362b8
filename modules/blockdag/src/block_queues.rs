//! Holding areas for blocks that can't be processed yet: orphans waiting for
//! parents and blocks whose timestamp is still in the future.

use crate::dag::BehaviorFlags;
use braid_common::{Block, BlockHash};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

struct OrphanBlock {
    block: Arc<Block>,
    flags: BehaviorFlags,
    expires_at: i64,
}

/// Bounded pool of blocks with unknown parents. Entries expire, and the one
/// closest to expiry is evicted when the pool is full.
pub struct OrphanPool {
    orphans: HashMap<BlockHash, OrphanBlock>,
    max_orphans: usize,
    expiration_ms: i64,
}

impl OrphanPool {
    pub fn new(max_orphans: usize, expiration_ms: i64) -> Self {
        Self {
            orphans: HashMap::new(),
            max_orphans,
            expiration_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.orphans.contains_key(hash)
    }

    pub fn add(&mut self, block: Arc<Block>, flags: BehaviorFlags, now: i64) {
        self.expire(now);
        if self.max_orphans == 0 {
            return;
        }
        while self.orphans.len() >= self.max_orphans {
            let Some(oldest) = self
                .orphans
                .iter()
                .min_by_key(|(hash, orphan)| (orphan.expires_at, **hash))
                .map(|(hash, _)| *hash)
            else {
                break;
            };
            debug!(block = %oldest, "Orphan pool full, evicting");
            self.orphans.remove(&oldest);
        }
        self.orphans.insert(
            block.hash(),
            OrphanBlock {
                block,
                flags,
                expires_at: now + self.expiration_ms,
            },
        );
    }

    /// Drop expired orphans, returning their hashes
    pub fn expire(&mut self, now: i64) -> Vec<BlockHash> {
        let expired: Vec<BlockHash> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| orphan.expires_at <= now)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &expired {
            debug!(block = %hash, "Orphan expired");
            self.orphans.remove(hash);
        }
        expired
    }

    /// Remove and return the children of `parent` whose parents are now all
    /// known, in hash order
    pub fn take_ready(
        &mut self,
        parent: &BlockHash,
        is_known: impl Fn(&BlockHash) -> bool,
    ) -> Vec<(Arc<Block>, BehaviorFlags)> {
        let mut ready: Vec<BlockHash> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| {
                orphan.block.parents().contains(parent)
                    && orphan.block.parents().iter().all(&is_known)
            })
            .map(|(hash, _)| *hash)
            .collect();
        ready.sort();
        ready
            .into_iter()
            .filter_map(|hash| self.orphans.remove(&hash))
            .map(|orphan| (orphan.block, orphan.flags))
            .collect()
    }
}

/// Blocks ordered by the time they may be processed
#[derive(Default)]
pub struct DelayedBlocks {
    queue: BTreeMap<(i64, BlockHash), (Arc<Block>, BehaviorFlags)>,
    process_times: HashMap<BlockHash, i64>,
}

impl DelayedBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.process_times.contains_key(hash)
    }

    pub fn process_time(&self, hash: &BlockHash) -> Option<i64> {
        self.process_times.get(hash).copied()
    }

    /// Earliest time anything in the queue becomes ready
    pub fn next_process_time(&self) -> Option<i64> {
        self.queue.keys().next().map(|(time, _)| *time)
    }

    pub fn add(&mut self, block: Arc<Block>, flags: BehaviorFlags, process_at: i64) {
        let hash = block.hash();
        self.process_times.insert(hash, process_at);
        self.queue.insert((process_at, hash), (block, flags));
    }

    /// Pop the earliest block if its time has come
    pub fn pop_ready(&mut self, now: i64) -> Option<(Arc<Block>, BehaviorFlags)> {
        let (time, hash) = *self.queue.keys().next()?;
        if time > now {
            return None;
        }
        self.process_times.remove(&hash);
        self.queue.remove(&(time, hash))
    }
}
