//! Error types for DAG and UTXO operations.

use braid_common::{BlockHash, Outpoint};

/// Errors from the UTXO diff engine.
#[derive(Debug, thiserror::Error)]
pub enum UTXOError {
    /// An input spends an outpoint the view does not hold.
    #[error("missing input {outpoint}")]
    MissingInput { outpoint: Outpoint },

    /// An input spends an outpoint this diff already removed.
    #[error("double spend of {outpoint}")]
    DoubleSpend { outpoint: Outpoint },

    /// An output would overwrite an outpoint still visible in the view.
    #[error("output {outpoint} already exists")]
    OutputAlreadyExists { outpoint: Outpoint },

    /// The two sides hold different entries for the same outpoint, so no
    /// single disjoint diff expresses the change.
    #[error("conflicting entries for {outpoint}")]
    ConflictingEntries { outpoint: Outpoint },

    /// The view was layered on a base that has since been melded.
    #[error("stale base: view built on generation {view}, base is at {current}")]
    StaleBase { view: u64, current: u64 },

    /// The views are not layered over the same committed base.
    #[error("views do not share a base")]
    UnrelatedViews,

    /// A committed base cannot be modified in place.
    #[error("cannot modify a committed base")]
    ImmutableBase,

    /// A layer did not apply cleanly onto the base. Indicates a logic bug.
    #[error("meld failed at {outpoint}: {reason}")]
    MeldFailure {
        outpoint: Outpoint,
        reason: &'static str,
    },
}

impl UTXOError {
    /// Transaction-level rejections, as opposed to engine failures
    pub fn is_transaction_rejection(&self) -> bool {
        matches!(
            self,
            UTXOError::MissingInput { .. }
                | UTXOError::DoubleSpend { .. }
                | UTXOError::OutputAlreadyExists { .. }
        )
    }
}

/// Structural problems that get a block rejected outright.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViolationKind {
    #[error("block already known")]
    DuplicateBlock,

    #[error("block has no parents")]
    NoParents,

    #[error("{count} parents exceed the maximum of {max}")]
    TooManyParents { count: usize, max: usize },

    #[error("parent {0} listed twice")]
    DuplicateParent(BlockHash),

    #[error("parent {0} not in the index")]
    UnknownParent(BlockHash),

    #[error("parent {0} is invalid")]
    InvalidParent(BlockHash),

    #[error("block {0} has children")]
    HasChildren(BlockHash),

    #[error("blue anticone of {0} exceeds k")]
    BlueAnticoneOverflow(BlockHash),

    #[error("missing blue anticone size for {0}")]
    MissingAnticoneSize(BlockHash),

    #[error("genesis must have no parents and the index must be empty")]
    MisplacedGenesis,
}

/// Errors returned by [`BlockDAG`](crate::dag::BlockDAG) operations.
#[derive(Debug, thiserror::Error)]
pub enum DAGError {
    /// Malformed parent linkage, duplicate node or structural inconsistency.
    #[error("DAG violation at {hash}: {kind}")]
    DAGViolation { hash: BlockHash, kind: ViolationKind },

    /// A block hash referenced by an operation is not in the DAG.
    #[error("block not in DAG: {hash}")]
    BlockNotInDAG { hash: BlockHash },

    /// The block was previously rejected.
    #[error("block {hash} is known to be invalid")]
    KnownInvalid { hash: BlockHash },

    #[error("block {hash} does not meet its proof-of-work target")]
    InvalidProofOfWork { hash: BlockHash },

    /// A resolution arrived with no conflict pending.
    #[error("no finality conflict to resolve")]
    NoFinalityConflict,

    #[error(transparent)]
    UTXO(#[from] UTXOError),

    #[error("persistence failure: {0:#}")]
    Persistence(anyhow::Error),
}

impl DAGError {
    pub fn violation(hash: BlockHash, kind: ViolationKind) -> Self {
        DAGError::DAGViolation { hash, kind }
    }

    /// Whether the failure is a property of the block itself, so it must
    /// never be retried
    pub fn invalidates_block(&self) -> bool {
        match self {
            DAGError::DAGViolation { kind, .. } => *kind != ViolationKind::DuplicateBlock,
            DAGError::InvalidProofOfWork { .. } => true,
            DAGError::UTXO(error) => error.is_transaction_rejection(),
            _ => false,
        }
    }
}
