//! Workbench mutation kernel
//!
//! Runs [`MutationUnit`]s one at a time against the shared object store:
//!
//! - [`Scheduler`]: FIFO queue with a single execution slot
//! - [`DecisionGateway`]: retry / abort / abort-and-rollback on failure
//! - [`MutationContext`]: staged edits, progress and cancellation
//! - [`Event`]: lifecycle and history notifications for presentation

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod context;
mod error;
mod event;
mod gateway;
mod lifecycle;
mod scheduler;
mod unit;

pub use context::{CancelToken, MutationContext};
pub use error::{MutationError, SchedulerError};
pub use event::{Event, EventStream, Progress, UnitEvent};
pub use gateway::{
    AutoRetryGateway, ChannelGateway, Decision, DecisionGateway, DecisionRequest, FixedGateway,
    PendingDecision,
};
pub use lifecycle::{allowed_transitions, validate_transition, Phase, UnitOutcome};
pub use scheduler::{Scheduler, SchedulerConfig, SubmissionPause, UnitHandle};
pub use unit::{from_fn, FnMutation, Mutation, MutationUnit, Params, UnitId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
