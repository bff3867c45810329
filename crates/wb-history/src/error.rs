//! Error types for edit history

use wb_store::{ErrorClass, StoreError};

/// Errors from history bracketing and undo/redo
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    /// `begin_compound` while another compound is still open
    #[error("compound {0:?} is still open")]
    CompoundOpen(String),

    /// `add_record`/`end_compound` without `begin_compound`
    #[error("no compound is open")]
    NoOpenCompound,

    /// A record of the compound could not be inverted; nothing was changed
    #[error("undo of {label:?} failed: {source}")]
    UndoFailed {
        label: String,
        #[source]
        source: StoreError,
    },

    /// A record of the compound could not be re-applied; nothing was changed
    #[error("redo of {label:?} failed: {source}")]
    RedoFailed {
        label: String,
        #[source]
        source: StoreError,
    },
}

impl HistoryError {
    /// Classification for presentation
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NothingToUndo | Self::NothingToRedo => ErrorClass::User,
            Self::CompoundOpen(_) | Self::NoOpenCompound => ErrorClass::System,
            Self::UndoFailed { source, .. } | Self::RedoFailed { source, .. } => source.class(),
        }
    }

    /// Failed undo/redo attempts leave history and store untouched
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::CompoundOpen(_) | Self::NoOpenCompound)
    }
}

/// Convenience alias
pub type HistoryResult<T> = Result<T, HistoryError>;
