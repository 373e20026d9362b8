//! Disjoint add/remove overlay over a UTXO view

use crate::dag_error::UTXOError;
use braid_common::{Address, Outpoint, UTXOEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Persistent map of outpoints to entries; clones share structure
pub type UTXOCollection = imbl::HashMap<Outpoint, UTXOEntry>;

/// What a diff says about one outpoint
#[derive(Debug, PartialEq, Eq)]
pub enum DiffLookup<'a> {
    Added(&'a UTXOEntry),
    Removed,
    Untouched,
}

/// Changes to apply on top of an underlying view: removals first, then
/// additions.
///
/// Removed outpoints keep the entry they had, so a diff can be inverted.
/// The key sets of `to_add` and `to_remove` are always disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UTXODiff {
    to_add: UTXOCollection,
    to_remove: UTXOCollection,
}

impl UTXODiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_add(&self) -> &UTXOCollection {
        &self.to_add
    }

    pub fn to_remove(&self) -> &UTXOCollection {
        &self.to_remove
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }

    pub fn lookup(&self, outpoint: &Outpoint) -> DiffLookup<'_> {
        if let Some(entry) = self.to_add.get(outpoint) {
            DiffLookup::Added(entry)
        } else if self.to_remove.contains_key(outpoint) {
            DiffLookup::Removed
        } else {
            DiffLookup::Untouched
        }
    }

    pub fn is_removed(&self, outpoint: &Outpoint) -> bool {
        self.to_remove.contains_key(outpoint)
    }

    /// Record that `outpoint` now holds `entry`. Re-adding exactly what this
    /// diff removed cancels the removal.
    pub fn add_entry(&mut self, outpoint: Outpoint, entry: UTXOEntry) -> Result<(), UTXOError> {
        if let Some(removed) = self.to_remove.get(&outpoint) {
            if *removed != entry {
                return Err(UTXOError::ConflictingEntries { outpoint });
            }
            self.to_remove.remove(&outpoint);
            return Ok(());
        }
        if self.to_add.contains_key(&outpoint) {
            return Err(UTXOError::OutputAlreadyExists { outpoint });
        }
        self.to_add.insert(outpoint, entry);
        Ok(())
    }

    /// Record that `outpoint` (holding `entry`) is gone. Removing something
    /// this diff added cancels the addition.
    pub fn remove_entry(&mut self, outpoint: Outpoint, entry: UTXOEntry) -> Result<(), UTXOError> {
        if self.to_add.remove(&outpoint).is_some() {
            return Ok(());
        }
        if self.to_remove.contains_key(&outpoint) {
            return Err(UTXOError::DoubleSpend { outpoint });
        }
        self.to_remove.insert(outpoint, entry);
        Ok(())
    }

    /// Diff that undoes this one
    pub fn inverse(&self) -> Self {
        Self {
            to_add: self.to_remove.clone(),
            to_remove: self.to_add.clone(),
        }
    }

    pub fn outpoints(&self) -> impl Iterator<Item = &Outpoint> {
        self.to_add.keys().chain(self.to_remove.keys())
    }

    /// Addresses of every entry touched by this diff
    pub fn addresses(&self) -> BTreeSet<Address> {
        self.to_add
            .values()
            .chain(self.to_remove.values())
            .map(|entry| Address::from_script(&entry.script_public_key))
            .collect()
    }

    pub fn is_disjoint(&self) -> bool {
        self.to_add.keys().all(|outpoint| !self.to_remove.contains_key(outpoint))
    }
}
