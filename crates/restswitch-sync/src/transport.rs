//! # Shadow Transport Interface
//!
//! The pub/sub collaborator the sync loop polls and reports through.
//!
//! ## Dispatch Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     poll(timeout, handler)                              │
//! │                                                                         │
//! │  sync loop ──► poll ──┬──► handler.on_delta(payload)        ┐           │
//! │                       ├──► handler.on_message(topic, bytes) │ in        │
//! │                       └──► handler.on_update_ack(token, st) ┘ order     │
//! │             ◄── PollStatus (only after every handler returned)          │
//! │                                                                         │
//! │  Payload slices are only valid during the callback. Handlers copy out   │
//! │  whatever they keep.                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handlers run on the polling task itself, so the handler needs no locking.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SyncResult;

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Link is up.
    Success,
    /// Link is down and the transport is working on it.
    Reconnecting,
    /// Link came back since the previous poll.
    Reconnected,
    /// Unrecoverable; the code is surfaced to the process boundary.
    Fatal(i32),
}

impl std::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollStatus::Success => write!(f, "success"),
            PollStatus::Reconnecting => write!(f, "reconnecting"),
            PollStatus::Reconnected => write!(f, "reconnected"),
            PollStatus::Fatal(code) => write!(f, "fatal({})", code),
        }
    }
}

/// Verdict on a sent report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Accepted,
    Rejected,
    /// No verdict arrived in time. Never sent by the gateway.
    Timeout,
}

impl std::fmt::Display for AckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckStatus::Accepted => write!(f, "accepted"),
            AckStatus::Rejected => write!(f, "rejected"),
            AckStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// A report document ready to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReport<'a> {
    pub document: &'a [u8],
    pub client_token: &'a str,
}

/// Receives inbound events during [`ShadowTransport::poll`].
pub trait InboundHandler {
    /// A shadow delta arrived. `payload` is the verbatim delta document.
    fn on_delta(&mut self, payload: &[u8]);

    /// A message arrived on a subscribed topic.
    fn on_message(&mut self, topic: &str, payload: &[u8]);

    /// A report sent earlier was acknowledged, rejected or timed out.
    fn on_update_ack(&mut self, client_token: &str, status: AckStatus);
}

/// Pub/sub link to the shadow service.
///
/// Implementations must invoke every handler callback for a poll before
/// that poll returns, in delivery order, from the polling task.
#[allow(async_fn_in_trait)]
pub trait ShadowTransport {
    /// Waits up to `timeout` for inbound events and dispatches them.
    async fn poll<H: InboundHandler>(&mut self, timeout: Duration, handler: &mut H) -> PollStatus;

    /// Queues a report for the thing's shadow.
    async fn send_report(&mut self, thing_name: &str, report: &EchoReport<'_>) -> SyncResult<()>;

    /// Releases the link. Called once when the sync loop exits.
    async fn close(&mut self) {}
}
