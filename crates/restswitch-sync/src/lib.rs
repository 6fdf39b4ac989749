//! # restswitch-sync: Shadow Sync Engine
//!
//! Keeps the relay board's outputs in step with the cloud shadow and turns
//! pulse commands into timed output activations.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Shadow Sync Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                ShadowSyncLoop (single task)                      │  │
//! │  │                                                                  │  │
//! │  │  poll ─► react (ShadowEngine) ─► send pending echo               │  │
//! │  └────────────┬───────────────────────────────┬─────────────────────┘  │
//! │               │                               │                         │
//! │               ▼                               ▼                         │
//! │  ┌────────────────────────┐      ┌──────────────────────────────┐      │
//! │  │ ShadowTransport        │      │ RegisterDispatch             │      │
//! │  │                        │      │                              │      │
//! │  │ WsShadowTransport:     │      │ RegisterBus:                 │      │
//! │  │ WebSocket link task,   │      │ masked writes, per-bit       │      │
//! │  │ backoff, ack deadlines │      │ pulses (SimulatedRegisters)  │      │
//! │  └────────────────────────┘      └──────────────────────────────┘      │
//! │                                                                         │
//! │  Decoding and report formatting live in restswitch-core.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `ShadowSyncLoop`, its engine, handle and stats
//! - [`config`] - Agent configuration (TOML + environment)
//! - [`dispatch`] - Register bus trait and dispatch bridge
//! - [`error`] - Sync error types
//! - [`pending`] - Single-slot pending echo
//! - [`protocol`] - Gateway frame types
//! - [`transport`] - Transport trait and inbound handler contract
//! - [`ws`] - WebSocket transport with reconnection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use restswitch_sync::{AgentConfig, ShadowSyncLoop, SimulatedRegisters, TransportConfig, WsShadowTransport};
//!
//! let config = AgentConfig::load(None)?;
//! let mut transport = WsShadowTransport::spawn(TransportConfig::from_agent_config(&config, "ak1w3b7g4")?);
//! transport.connect().await?;
//!
//! let mut sync = ShadowSyncLoop::new(&config, "ak1w3b7g4", transport, SimulatedRegisters::new());
//! sync.run().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pending;
pub mod protocol;
pub mod transport;
pub mod ws;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{LoopState, ShadowEngine, ShadowSyncLoop, SyncLoopHandle, SyncStats};
pub use config::AgentConfig;
pub use dispatch::{PulseOutcome, RegisterBus, RegisterDispatch, SimulatedRegisters};
pub use error::{RegisterError, SyncError, SyncResult};
pub use pending::PendingEcho;
pub use transport::{AckStatus, EchoReport, InboundHandler, PollStatus, ShadowTransport};
pub use ws::{ConnectionState, TransportConfig, WsShadowTransport};
