//! Human-decision gateway
//!
//! When a unit fails, the scheduler asks a [`DecisionGateway`] what to do.
//! The call blocks the single execution slot until a decision arrives or
//! the configured timeout elapses, in which case the request's
//! [`default`](DecisionRequest::default) is used.

use crate::error::MutationError;
use crate::unit::UnitId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use wb_store::ErrorClass;

/// Operator's answer to a failed unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Revert the failed attempt and run again
    Retry,
    /// Stop; discard uncommitted work, keep what the unit already committed
    Abort,
    /// Stop and also revert everything the unit committed
    AbortAndRollback,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Retry => "retry",
            Self::Abort => "abort",
            Self::AbortAndRollback => "abort-and-rollback",
        })
    }
}

/// Everything presentation needs to ask the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRequest {
    pub unit_id: UnitId,
    pub unit_name: String,
    pub error: MutationError,
    /// 1-based attempt that just failed
    pub attempt: u32,
    /// Automatic retries still available
    pub retries_left: u32,
    /// Used when the gateway does not answer in time
    pub default: Decision,
    pub timeout: Duration,
}

impl DecisionRequest {
    /// Class of the failure, so user errors are not framed as faults
    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }
}

/// Supplies retry/abort/rollback decisions
#[async_trait]
pub trait DecisionGateway: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Decision;
}

/// Always answers the same
#[derive(Debug, Clone, Copy)]
pub struct FixedGateway(pub Decision);

#[async_trait]
impl DecisionGateway for FixedGateway {
    async fn decide(&self, _request: &DecisionRequest) -> Decision {
        self.0
    }
}

/// Headless default: accepts whatever the request proposes
///
/// That is retry while the auto-retry budget lasts (for non-user errors),
/// abort afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoRetryGateway;

#[async_trait]
impl DecisionGateway for AutoRetryGateway {
    async fn decide(&self, request: &DecisionRequest) -> Decision {
        request.default
    }
}

/// A decision request waiting for the presentation layer
#[derive(Debug)]
pub struct PendingDecision {
    pub request: DecisionRequest,
    reply: oneshot::Sender<Decision>,
}

impl PendingDecision {
    /// Answer the request; ignored if the scheduler already timed out
    pub fn respond(self, decision: Decision) {
        let _ = self.reply.send(decision);
    }
}

/// Forwards requests to another task and waits for its reply
#[derive(Debug, Clone)]
pub struct ChannelGateway {
    tx: mpsc::Sender<PendingDecision>,
}

impl ChannelGateway {
    /// Create the gateway and the receiver presentation reads from
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PendingDecision>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DecisionGateway for ChannelGateway {
    async fn decide(&self, request: &DecisionRequest) -> Decision {
        let (reply, answer) = oneshot::channel();
        let pending = PendingDecision {
            request: request.clone(),
            reply,
        };
        if self.tx.send(pending).await.is_err() {
            tracing::warn!("decision receiver dropped, using default {}", request.default);
            return request.default;
        }
        answer.await.unwrap_or(request.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(default: Decision) -> DecisionRequest {
        DecisionRequest {
            unit_id: UnitId::new(),
            unit_name: "op".into(),
            error: MutationError::System("boom".into()),
            attempt: 1,
            retries_left: 2,
            default,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn fixed_and_auto_gateways() {
        assert_eq!(FixedGateway(Decision::Abort).decide(&request(Decision::Retry)).await, Decision::Abort);
        assert_eq!(AutoRetryGateway.decide(&request(Decision::Retry)).await, Decision::Retry);
    }

    #[tokio::test]
    async fn channel_gateway_round_trip() {
        let (gateway, mut rx) = ChannelGateway::new(1);
        let responder = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            assert_eq!(pending.request.class(), ErrorClass::System);
            pending.respond(Decision::AbortAndRollback);
        });
        let decision = gateway.decide(&request(Decision::Retry)).await;
        responder.await.unwrap();
        assert_eq!(decision, Decision::AbortAndRollback);
    }

    #[tokio::test]
    async fn channel_gateway_falls_back_when_dropped() {
        let (gateway, rx) = ChannelGateway::new(1);
        drop(rx);
        assert_eq!(gateway.decide(&request(Decision::Abort)).await, Decision::Abort);
    }
}
