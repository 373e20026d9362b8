//! Committed UTXO base and the layered views built over it

use crate::dag_error::UTXOError;
use crate::utxo_diff::{DiffLookup, UTXOCollection, UTXODiff};
use braid_common::{Outpoint, Transaction, UTXOEntry};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Immutable UTXO set at one committed point in DAG history
#[derive(Debug, Default)]
pub struct FullUTXOSet {
    entries: UTXOCollection,
    generation: u64,
}

impl FullUTXOSet {
    pub fn get(&self, outpoint: &Outpoint) -> Option<&UTXOEntry> {
        self.entries.get(outpoint)
    }

    pub fn entries(&self) -> &UTXOCollection {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bumped by every meld
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Handle on the single committed base. Readers take snapshots; a meld swaps
/// the snapshot atomically, so a reader sees the whole old base or the whole
/// new one. The base lives in memory only; it is rebuilt by replaying the
/// stored blocks.
#[derive(Clone, Default)]
pub struct SharedUTXOBase {
    current: Arc<RwLock<Arc<FullUTXOSet>>>,
}

impl SharedUTXOBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: UTXOCollection) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(FullUTXOSet {
                entries,
                generation: 0,
            }))),
        }
    }

    pub fn snapshot(&self) -> Arc<FullUTXOSet> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Read-only view of the current base
    pub fn view(&self) -> UTXOSet {
        UTXOSet::Base(self.snapshot())
    }

    /// Empty overlay on the current base, invalidated by the next meld
    pub fn diff_view(&self) -> UTXOSet {
        self.diff_view_with(UTXODiff::new())
    }

    /// Overlay `diff` on the current base without validating it
    pub fn diff_view_with(&self, diff: UTXODiff) -> UTXOSet {
        UTXOSet::DiffOverBase {
            base: BaseHandle {
                snapshot: self.snapshot(),
                shared: self.clone(),
            },
            diff,
        }
    }

    /// Apply every layer of `set` to the base and swap it in as the new base.
    ///
    /// Layers apply bottom-up, each removing before adding. Nothing changes
    /// unless every layer applies.
    pub fn meld(&self, set: UTXOSet) -> Result<Arc<FullUTXOSet>, UTXOError> {
        let mut layers: Vec<&UTXODiff> = Vec::new();
        let mut cursor = &set;
        let root = loop {
            match cursor {
                UTXOSet::Base(snapshot) => break snapshot.clone(),
                UTXOSet::DiffOverBase { base, diff } => {
                    layers.push(diff);
                    break base.snapshot.clone();
                }
                UTXOSet::DiffOverDiff { parent, diff } => {
                    layers.push(diff);
                    cursor = parent.as_ref();
                }
            }
        };
        layers.reverse();

        let mut current = self.current.write();
        if !Arc::ptr_eq(&*current, &root) {
            return Err(UTXOError::StaleBase {
                view: root.generation,
                current: current.generation,
            });
        }

        let mut entries = current.entries.clone();
        let mut touched = HashSet::new();
        for layer in &layers {
            for (outpoint, entry) in layer.to_remove().iter() {
                match entries.remove(outpoint) {
                    Some(existing) if existing == *entry => {}
                    Some(_) => {
                        return Err(UTXOError::MeldFailure {
                            outpoint: *outpoint,
                            reason: "removed entry differs from base",
                        })
                    }
                    None => {
                        return Err(UTXOError::MeldFailure {
                            outpoint: *outpoint,
                            reason: "removed outpoint missing from base",
                        })
                    }
                }
                touched.insert(*outpoint);
            }
            for (outpoint, entry) in layer.to_add().iter() {
                if entries.contains_key(outpoint) {
                    return Err(UTXOError::MeldFailure {
                        outpoint: *outpoint,
                        reason: "added outpoint already in base",
                    });
                }
                entries.insert(*outpoint, entry.clone());
                touched.insert(*outpoint);
            }
        }

        let melded = Arc::new(FullUTXOSet {
            entries,
            generation: current.generation + 1,
        });
        debug!(
            generation = melded.generation,
            layers = layers.len(),
            touched = touched.len(),
            size = melded.len(),
            "Melded UTXO diff into base"
        );
        *current = melded.clone();
        Ok(melded)
    }
}

/// Snapshot a view was layered on, plus the shared handle used to detect
/// that the snapshot has been superseded
#[derive(Clone)]
pub struct BaseHandle {
    snapshot: Arc<FullUTXOSet>,
    shared: SharedUTXOBase,
}

impl BaseHandle {
    fn check_fresh(&self) -> Result<(), UTXOError> {
        let current = self.shared.generation();
        if current != self.snapshot.generation {
            return Err(UTXOError::StaleBase {
                view: self.snapshot.generation,
                current,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for BaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseHandle").field("generation", &self.snapshot.generation).finish()
    }
}

/// A UTXO view: a committed base, or a diff over one, or a diff over
/// another view. Clones are cheap and independent.
#[derive(Debug, Clone)]
pub enum UTXOSet {
    Base(Arc<FullUTXOSet>),
    DiffOverBase { base: BaseHandle, diff: UTXODiff },
    DiffOverDiff { parent: Arc<UTXOSet>, diff: UTXODiff },
}

impl UTXOSet {
    /// Entry visible at `outpoint`. Fails if the view sits on a melded-over base.
    pub fn get(&self, outpoint: &Outpoint) -> Result<Option<UTXOEntry>, UTXOError> {
        match self {
            UTXOSet::Base(set) => Ok(set.get(outpoint).cloned()),
            UTXOSet::DiffOverBase { base, diff } => {
                base.check_fresh()?;
                Ok(match diff.lookup(outpoint) {
                    DiffLookup::Added(entry) => Some(entry.clone()),
                    DiffLookup::Removed => None,
                    DiffLookup::Untouched => base.snapshot.get(outpoint).cloned(),
                })
            }
            UTXOSet::DiffOverDiff { parent, diff } => match diff.lookup(outpoint) {
                DiffLookup::Added(entry) => Ok(Some(entry.clone())),
                DiffLookup::Removed => Ok(None),
                DiffLookup::Untouched => parent.get(outpoint),
            },
        }
    }

    pub fn contains(&self, outpoint: &Outpoint) -> Result<bool, UTXOError> {
        Ok(self.get(outpoint)?.is_some())
    }

    /// Diff held by the top layer
    pub fn diff(&self) -> Option<&UTXODiff> {
        match self {
            UTXOSet::Base(_) => None,
            UTXOSet::DiffOverBase { diff, .. } | UTXOSet::DiffOverDiff { diff, .. } => Some(diff),
        }
    }

    fn diff_mut(&mut self) -> Result<&mut UTXODiff, UTXOError> {
        match self {
            UTXOSet::Base(_) => Err(UTXOError::ImmutableBase),
            UTXOSet::DiffOverBase { diff, .. } | UTXOSet::DiffOverDiff { diff, .. } => Ok(diff),
        }
    }

    /// Freeze this view and start an empty layer on top of it
    pub fn into_layer(self) -> UTXOSet {
        UTXOSet::DiffOverDiff {
            parent: Arc::new(self),
            diff: UTXODiff::new(),
        }
    }

    /// Spend the inputs and create the outputs of `tx` in the top layer.
    ///
    /// The transaction applies completely or not at all.
    pub fn add_transaction(
        &mut self,
        tx: &Transaction,
        block_blue_score: u64,
    ) -> Result<(), UTXOError> {
        let diff = self.diff().ok_or(UTXOError::ImmutableBase)?;

        let mut seen = HashSet::with_capacity(tx.inputs().len());
        let mut spent = Vec::with_capacity(tx.inputs().len());
        for input in tx.inputs() {
            let outpoint = input.previous_outpoint;
            if !seen.insert(outpoint) || diff.is_removed(&outpoint) {
                return Err(UTXOError::DoubleSpend { outpoint });
            }
            match self.get(&outpoint)? {
                Some(entry) => spent.push((outpoint, entry)),
                None => return Err(UTXOError::MissingInput { outpoint }),
            }
        }

        let mut created = Vec::with_capacity(tx.outputs().len());
        for (index, output) in tx.outputs().iter().enumerate() {
            let outpoint = tx.outpoint(index as u32);
            if diff.is_removed(&outpoint) || self.contains(&outpoint)? {
                return Err(UTXOError::OutputAlreadyExists { outpoint });
            }
            created.push((
                outpoint,
                UTXOEntry {
                    amount: output.value,
                    script_public_key: output.script_public_key.clone(),
                    block_blue_score,
                    is_coinbase: tx.is_coinbase(),
                },
            ));
        }

        let diff = self.diff_mut()?;
        for (outpoint, entry) in spent {
            diff.remove_entry(outpoint, entry)?;
        }
        for (outpoint, entry) in created {
            diff.add_entry(outpoint, entry)?;
        }
        Ok(())
    }

    /// Apply a stored diff (or its inverse) to the top layer. The diff must
    /// match the view: removed outpoints present with the same entry, added
    /// outpoints absent. Applies completely or not at all.
    pub fn apply_diff(&mut self, changes: &UTXODiff) -> Result<(), UTXOError> {
        let mut working = self.diff().ok_or(UTXOError::ImmutableBase)?.clone();
        for (outpoint, entry) in changes.to_remove().iter() {
            match self.get(outpoint)? {
                Some(existing) if existing == *entry => {}
                Some(_) => return Err(UTXOError::ConflictingEntries { outpoint: *outpoint }),
                None => return Err(UTXOError::MissingInput { outpoint: *outpoint }),
            }
            working.remove_entry(*outpoint, entry.clone())?;
        }
        for (outpoint, entry) in changes.to_add().iter() {
            if self.contains(outpoint)? {
                return Err(UTXOError::OutputAlreadyExists { outpoint: *outpoint });
            }
            working.add_entry(*outpoint, entry.clone())?;
        }
        *self.diff_mut()? = working;
        Ok(())
    }

    /// Apply `changes` like [`apply_diff`](Self::apply_diff), starting a new
    /// layer when they replace an entry the top layer already changed
    pub fn push_diff(mut self, changes: &UTXODiff) -> Result<UTXOSet, UTXOError> {
        match self.apply_diff(changes) {
            Ok(()) => Ok(self),
            Err(UTXOError::ConflictingEntries { .. }) => {
                let mut layer = self.into_layer();
                layer.apply_diff(changes)?;
                Ok(layer)
            }
            Err(e) => Err(e),
        }
    }

    /// Every outpoint changed by any layer of this view
    pub fn touched_outpoints(&self) -> HashSet<Outpoint> {
        let mut touched = HashSet::new();
        let mut cursor = self;
        loop {
            match cursor {
                UTXOSet::Base(_) => break,
                UTXOSet::DiffOverBase { diff, .. } => {
                    touched.extend(diff.outpoints().copied());
                    break;
                }
                UTXOSet::DiffOverDiff { parent, diff } => {
                    touched.extend(diff.outpoints().copied());
                    cursor = parent.as_ref();
                }
            }
        }
        touched
    }

    fn root(&self) -> &Arc<FullUTXOSet> {
        match self {
            UTXOSet::Base(set) => set,
            UTXOSet::DiffOverBase { base, .. } => &base.snapshot,
            UTXOSet::DiffOverDiff { parent, .. } => parent.root(),
        }
    }

    /// Minimal diff turning this view into `other`. Both views must sit on the
    /// same committed base.
    pub fn diff_to(&self, other: &UTXOSet) -> Result<UTXODiff, UTXOError> {
        if !Arc::ptr_eq(self.root(), other.root()) {
            return Err(UTXOError::UnrelatedViews);
        }

        let mut outpoints = self.touched_outpoints();
        outpoints.extend(other.touched_outpoints());

        let mut diff = UTXODiff::new();
        for outpoint in outpoints {
            match (self.get(&outpoint)?, other.get(&outpoint)?) {
                (Some(from), Some(to)) => {
                    if from != to {
                        return Err(UTXOError::ConflictingEntries { outpoint });
                    }
                }
                (Some(from), None) => diff.remove_entry(outpoint, from)?,
                (None, Some(to)) => diff.add_entry(outpoint, to)?,
                (None, None) => {}
            }
        }
        Ok(diff)
    }
}
