//! Compound undo/redo history
//!
//! Provides [`EditHistory`], two bounded stacks of [`Compound`]s. A compound
//! groups every [`EditRecord`] one mutation produced, and is undone or
//! redone as a unit: the inverse of each record is computed against a single
//! store transaction that is committed only if every record succeeded.

use crate::error::{HistoryError, HistoryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use wb_store::{EditRecord, ObjectStore, StoreError};

/// Stable identity of a compound, used to pair it with a script line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompoundId(u64);

impl CompoundId {
    #[inline]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw counter value
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CompoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Edit records from one mutation, undone and redone atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compound {
    id: CompoundId,
    label: String,
    records: Vec<EditRecord>,
}

impl Compound {
    #[inline]
    #[must_use]
    pub fn id(&self) -> CompoundId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    #[must_use]
    pub fn records(&self) -> &[EditRecord] {
        &self.records
    }
}

/// Result of pushing a compound: what fell off either end of the history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Compounds discarded from the redo stack
    pub discarded: Vec<CompoundId>,
    /// Oldest compounds evicted to stay within the limit
    pub evicted: Vec<CompoundId>,
}

/// Dual undo/redo stack of compounds
#[derive(Debug)]
pub struct EditHistory {
    done: Vec<Compound>,
    undone: Vec<Compound>,
    open: Option<Compound>,
    limit: usize,
    next_id: u64,
}

impl EditHistory {
    /// Default number of compounds kept on the done stack
    pub const DEFAULT_LIMIT: usize = 256;

    /// Create a history keeping at most `limit` compounds (0 means the default)
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            done: Vec::new(),
            undone: Vec::new(),
            open: None,
            limit: if limit == 0 { Self::DEFAULT_LIMIT } else { limit },
            next_id: 1,
        }
    }

    /// Open a compound
    ///
    /// # Errors
    /// [`HistoryError::CompoundOpen`] if one is already open
    pub fn begin_compound(&mut self, label: impl Into<String>) -> HistoryResult<CompoundId> {
        if let Some(open) = &self.open {
            return Err(HistoryError::CompoundOpen(open.label.clone()));
        }
        let id = CompoundId::new(self.next_id);
        self.next_id += 1;
        self.open = Some(Compound {
            id,
            label: label.into(),
            records: Vec::new(),
        });
        Ok(id)
    }

    /// Add a record that has already been applied to the store
    ///
    /// # Errors
    /// [`HistoryError::NoOpenCompound`] outside a compound
    pub fn add_record(&mut self, record: EditRecord) -> HistoryResult<()> {
        let open = self.open.as_mut().ok_or(HistoryError::NoOpenCompound)?;
        open.records.push(record);
        Ok(())
    }

    /// Close the open compound and push it onto the done stack
    ///
    /// Returns `None` (and records nothing) when the compound is empty.
    ///
    /// # Errors
    /// [`HistoryError::NoOpenCompound`] outside a compound
    pub fn end_compound(&mut self) -> HistoryResult<(Option<CompoundId>, PushOutcome)> {
        let compound = self.open.take().ok_or(HistoryError::NoOpenCompound)?;
        if compound.records.is_empty() {
            tracing::debug!("dropping empty compound {:?}", compound.label);
            return Ok((None, PushOutcome::default()));
        }
        let id = compound.id;
        Ok((Some(id), self.push(compound)))
    }

    /// Drop the open compound without recording it
    pub fn cancel_compound(&mut self) -> Option<Compound> {
        self.open.take()
    }

    /// Whether a compound is open
    #[inline]
    #[must_use]
    pub fn in_compound(&self) -> bool {
        self.open.is_some()
    }

    fn push(&mut self, compound: Compound) -> PushOutcome {
        let discarded = self.undone.drain(..).map(|c| c.id).collect();
        self.done.push(compound);
        let mut evicted = Vec::new();
        if self.done.len() > self.limit {
            let drain_len = self.done.len() - self.limit;
            evicted.extend(self.done.drain(0..drain_len).map(|c| c.id));
            tracing::debug!("history limit {} reached, evicted {} compound(s)", self.limit, evicted.len());
        }
        PushOutcome { discarded, evicted }
    }

    /// Undo the most recent compound
    ///
    /// Either every record is inverted and the compound moves to the redo
    /// stack, or the store and history are left exactly as they were.
    ///
    /// # Errors
    /// - [`HistoryError::NothingToUndo`] on an empty done stack
    /// - [`HistoryError::UndoFailed`] if any record cannot be inverted
    pub fn undo(&mut self, store: &ObjectStore) -> HistoryResult<&Compound> {
        let compound = self.done.last().ok_or(HistoryError::NothingToUndo)?;
        revert_all(store, &compound.records).map_err(|source| HistoryError::UndoFailed {
            label: compound.label.clone(),
            source,
        })?;
        let compound = self.done.pop().ok_or(HistoryError::NothingToUndo)?;
        tracing::info!("undo {:?} ({} record(s))", compound.label, compound.records.len());
        self.undone.push(compound);
        self.undone.last().ok_or(HistoryError::NothingToRedo)
    }

    /// Redo the most recently undone compound
    ///
    /// # Errors
    /// - [`HistoryError::NothingToRedo`] on an empty redo stack
    /// - [`HistoryError::RedoFailed`] if any record cannot be re-applied
    pub fn redo(&mut self, store: &ObjectStore) -> HistoryResult<&Compound> {
        let compound = self.undone.last().ok_or(HistoryError::NothingToRedo)?;
        apply_all(store, &compound.records).map_err(|source| HistoryError::RedoFailed {
            label: compound.label.clone(),
            source,
        })?;
        let compound = self.undone.pop().ok_or(HistoryError::NothingToRedo)?;
        tracing::info!("redo {:?} ({} record(s))", compound.label, compound.records.len());
        self.done.push(compound);
        self.done.last().ok_or(HistoryError::NothingToUndo)
    }

    #[inline]
    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.done.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    #[must_use]
    pub fn undo_label(&self) -> Option<&str> {
        self.done.last().map(|c| c.label.as_str())
    }

    #[must_use]
    pub fn redo_label(&self) -> Option<&str> {
        self.undone.last().map(|c| c.label.as_str())
    }

    /// Number of compounds on the done stack
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.done.len()
    }

    /// Number of compounds on the redo stack
    #[inline]
    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.undone.len()
    }

    /// Compounds on the done stack, oldest first
    pub fn done(&self) -> impl Iterator<Item = &Compound> {
        self.done.iter()
    }

    #[inline]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Discard all compounds, including an open one
    pub fn clear(&mut self) {
        self.done.clear();
        self.undone.clear();
        self.open = None;
    }
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT)
    }
}

/// Invert `records` (last first) and commit the result in one swap
///
/// # Errors
/// The first record that cannot be inverted; the store is untouched.
pub fn revert_all(store: &ObjectStore, records: &[EditRecord]) -> Result<(), StoreError> {
    let mut txn = store.begin();
    for record in records.iter().rev() {
        txn.revert(record)?;
    }
    store.commit(txn)?;
    Ok(())
}

/// Re-apply `records` (first first) and commit the result in one swap
///
/// # Errors
/// The first record that cannot be applied; the store is untouched.
pub fn apply_all(store: &ObjectStore, records: &[EditRecord]) -> Result<(), StoreError> {
    let mut txn = store.begin();
    for record in records {
        txn.apply(record)?;
    }
    store.commit(txn)?;
    Ok(())
}
