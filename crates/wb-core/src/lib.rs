//! Workbench core
//!
//! The facade presentation code talks to: a [`Workbench`] owns the data
//! store, the edit timeline and the single-slot scheduler, and exposes
//! operation submission, script replay, undo/redo and session files.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wb_core::{Workbench, WorkbenchConfig};
//! use wb_kernel::AutoRetryGateway;
//!
//! let workbench = Workbench::new(WorkbenchConfig::default(), Arc::new(AutoRetryGateway))?;
//! let handles = workbench
//!     .run_script("create_sequence(name=\"s1\", residues=\"ACGT\")\nreverse_complement(source=\"s1\", name=\"s1_rc\")")
//!     .await?;
//! for handle in handles {
//!     handle.wait().await?;
//! }
//! workbench.save_session("work.wbs").await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod logging;
pub mod ops;
pub mod prompt;
pub mod registry;
pub mod script;

mod error;
mod workbench;

pub use config::{ConfigError, WorkbenchConfig};
pub use error::{WorkbenchError, WorkbenchResult};
pub use prompt::PromptGateway;
pub use registry::{OperationDef, OperationFactory, OperationRegistry};
pub use script::{parse_statement, render_statement, ScriptError, Statement};
pub use workbench::Workbench;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
