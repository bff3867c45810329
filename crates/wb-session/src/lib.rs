//! Workbench session files
//!
//! Saves the whole data store plus presentation state as a versioned,
//! self-describing JSON envelope, and restores it in dependency order.
//!
//! # Core Concepts
//!
//! - [`SessionEnvelope`]: `{format_version, requirements, objects, auxiliary}`
//! - [`Requirement`] / [`Unmet`]: what a reader must support, and what it lacks
//! - [`RestorePlan`]: leaves, then their referrers, then the rest in topological order
//! - [`SessionSerializer`]: save, inspect, load (validate only) and restore
//!
//! Restore never populates the store partially: everything is validated
//! first, and the new content replaces the old in a single commit.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod envelope;
mod error;
mod migrate;
mod plan;
mod requirement;
mod serializer;

pub use envelope::{Auxiliary, ObjectEntry, SessionEnvelope, CURRENT_FORMAT_VERSION};
pub use error::{SessionError, SessionResult};
pub use plan::{RestorePlan, Tier, TierCounts};
pub use requirement::{PluginCatalog, Requirement, Unmet};
pub use serializer::{LoadedSession, RestoreSummary, SaveSummary, SessionInfo, SessionSerializer};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
