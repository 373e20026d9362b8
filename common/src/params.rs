//! Consensus parameters

use crate::types::{Block, Transaction, TxOutput};

/// GHOSTDAG anticone bound
pub const DEFAULT_K: u64 = 18;

/// Selected-chain depth after which a block becomes final
pub const DEFAULT_FINALITY_DEPTH: u64 = 86_400;

pub const DEFAULT_MAX_PARENTS: usize = 10;

/// How far ahead of local time a block timestamp may be before the block
/// is delayed, in milliseconds
pub const DEFAULT_TIMESTAMP_DEVIATION_MS: i64 = 132_000;

pub const DEFAULT_MAX_ORPHAN_BLOCKS: usize = 100;

pub const DEFAULT_ORPHAN_EXPIRATION_SECS: i64 = 3_600;

/// Compact target met by roughly half of all hashes
pub const EASIEST_BITS: u32 = 0x207fffff;

/// Parameters fixed for the lifetime of a DAG instance
#[derive(Debug, Clone)]
pub struct DAGParams {
    pub k: u64,
    pub finality_depth: u64,
    pub max_parents: usize,
    pub timestamp_deviation_ms: i64,
    pub max_orphan_blocks: usize,
    pub orphan_expiration_ms: i64,
    pub genesis: Block,
}

impl Default for DAGParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            finality_depth: DEFAULT_FINALITY_DEPTH,
            max_parents: DEFAULT_MAX_PARENTS,
            timestamp_deviation_ms: DEFAULT_TIMESTAMP_DEVIATION_MS,
            max_orphan_blocks: DEFAULT_MAX_ORPHAN_BLOCKS,
            orphan_expiration_ms: DEFAULT_ORPHAN_EXPIRATION_SECS * 1000,
            genesis: default_genesis(),
        }
    }
}

/// Genesis block with a single coinbase output locked to `OP_TRUE`
pub fn default_genesis() -> Block {
    let coinbase = Transaction::coinbase(
        vec![TxOutput {
            value: 50_000_000_000,
            script_public_key: vec![0x51],
        }],
        b"braid genesis".to_vec(),
    );
    Block::new(Vec::new(), 1_600_000_000_000, EASIEST_BITS, 0, vec![coinbase])
}
