//! Workbench edit history
//!
//! Compound undo/redo over the data store and the recorded script that
//! mirrors it.
//!
//! - [`EditHistory`]: bounded done/undone stacks of [`Compound`]s
//! - [`ScriptMirror`]: script lines paired one-to-one with compounds
//! - [`Timeline`]: both behind one lock, kept in step on undo and redo

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod history;
mod script;
mod timeline;

pub use error::{HistoryError, HistoryResult};
pub use history::{apply_all, revert_all, Compound, CompoundId, EditHistory, PushOutcome};
pub use script::{ScriptLine, ScriptMirror};
pub use timeline::{HistoryState, StepOutcome, Timeline};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
