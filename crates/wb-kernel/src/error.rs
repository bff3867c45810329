//! Error types for mutations and the scheduler

use crate::lifecycle::Phase;
use crate::unit::UnitId;
use wb_history::HistoryError;
use wb_store::{ErrorClass, ObjectName, StoreError};

/// Failure surfaced by a mutation's execution logic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// Required parameter absent
    #[error("missing parameter {0:?}")]
    MissingParam(String),

    /// Parameter present but unusable
    #[error("invalid parameter {name:?}: {reason}")]
    InvalidParam { name: String, reason: String },

    /// Any other operator-caused failure
    #[error("{0}")]
    User(String),

    /// Internal fault, reported with full detail
    #[error("internal error: {0}")]
    System(String),

    /// The unit observed a cancellation request and stopped
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MutationError {
    /// Classification for presentation
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingParam(_) | Self::InvalidParam { .. } | Self::User(_) => ErrorClass::User,
            Self::System(_) => ErrorClass::System,
            Self::Cancelled => ErrorClass::Cancellation,
            Self::Store(e) => e.class(),
        }
    }

    /// Cancellation is not reported to the operator as a failure
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.class() == ErrorClass::Cancellation
    }

    /// Build an [`InvalidParam`](Self::InvalidParam) error
    #[inline]
    pub fn invalid(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidParam {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Scheduler-level errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// `shutdown` was called; no new work is accepted
    #[error("scheduler is shutting down")]
    ShuttingDown,

    /// A reserved name already exists in the store
    #[error("object already exists: {0}")]
    NameExists(ObjectName),

    /// A reserved name is claimed by another queued unit
    #[error("name {name} is reserved by unit {holder}")]
    NameReserved { name: ObjectName, holder: UnitId },

    #[error("unknown unit: {0}")]
    UnknownUnit(UnitId),

    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error(transparent)]
    History(#[from] HistoryError),

    /// The worker task exited unexpectedly
    #[error("scheduler worker is gone")]
    WorkerGone,
}

impl SchedulerError {
    /// Classification for presentation
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NameExists(_) | Self::NameReserved { .. } | Self::UnknownUnit(_) => ErrorClass::User,
            Self::ShuttingDown => ErrorClass::Cancellation,
            Self::IllegalTransition { .. } | Self::WorkerGone => ErrorClass::System,
            Self::History(e) => e.class(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_error_classes() {
        assert_eq!(MutationError::MissingParam("name".into()).class(), ErrorClass::User);
        assert_eq!(MutationError::System("boom".into()).class(), ErrorClass::System);
        assert!(MutationError::Cancelled.is_cancellation());
        assert!(MutationError::Store(StoreError::Revoked).is_cancellation());
    }

    #[test]
    fn invalid_param_display() {
        let err = MutationError::invalid("alphabet", "unknown alphabet \"xna\"");
        assert_eq!(err.to_string(), "invalid parameter \"alphabet\": unknown alphabet \"xna\"");
    }
}
