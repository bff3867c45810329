//! Facade error type

use crate::config::ConfigError;
use crate::script::ScriptError;
use wb_kernel::{MutationError, SchedulerError};
use wb_session::SessionError;
use wb_store::ErrorClass;

/// Errors surfaced by the [`Workbench`](crate::Workbench)
#[derive(Debug, thiserror::Error)]
pub enum WorkbenchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("unknown operation {0:?}")]
    UnknownOperation(String),

    /// The operation rejected its parameters before being queued
    #[error("{op}: {source}")]
    Operation {
        op: String,
        #[source]
        source: MutationError,
    },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// Failure while submitting a script line
    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<WorkbenchError>,
    },
}

impl WorkbenchError {
    /// Classification for presentation
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(e) => e.class(),
            Self::Script(e) => e.class(),
            Self::UnknownOperation(_) => ErrorClass::User,
            Self::Operation { source, .. } => source.class(),
            Self::Scheduler(e) => e.class(),
            Self::Session(e) => e.class(),
            Self::Line { source, .. } => source.class(),
        }
    }

    pub(crate) fn at_line(self, line: usize) -> Self {
        Self::Line {
            line,
            source: Box::new(self),
        }
    }
}

/// Result alias for facade operations
pub type WorkbenchResult<T> = Result<T, WorkbenchError>;
