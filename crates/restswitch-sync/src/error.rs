//! # Sync Error Types
//!
//! Error types for the sync engine and its collaborators.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidMessage         │ │
//! │  │  MissingThing   │  │  Disconnected   │  │  SerializationFailed    │ │
//! │  │  InvalidUrl     │  │  TransportFatal │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │     Codec       │  │    Register     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Delta / pulse  │  │  PulseRejected  │                              │
//! │  │  decode, report │  │                 │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! │                                                                         │
//! │  Only TransportFatal ends the sync loop. Codec and register failures   │
//! │  drop the current message and the loop keeps polling.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use restswitch_core::{CodecError, RegisterId};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Fatal code reported when the transport's link task has stopped.
pub const FATAL_LINK_STOPPED: i32 = -1;

/// Fatal code reported when the transport's outgoing channel is closed.
pub const FATAL_CHANNEL_CLOSED: i32 = -2;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid agent configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No thing name configured and none could be read from the device.
    #[error("Thing name not configured and not readable from the device")]
    MissingThingName,

    /// Invalid shadow gateway URL.
    #[error("Invalid shadow URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to establish WebSocket connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket disconnected unexpectedly.
    #[error("Disconnected from shadow gateway")]
    Disconnected,

    /// Connection timeout.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The transport reported a non-recoverable status.
    #[error("Transport failed with code {code}")]
    TransportFatal { code: i32 },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Invalid frame received.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Failed to serialize or deserialize a frame.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// Payload decode or report build failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The register bus refused an operation.
    #[error(transparent)]
    Register(#[from] RegisterError),
}

/// Failures reported by a [`RegisterBus`](crate::dispatch::RegisterBus).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("Pulse of bit {bit} on register {register} was rejected")]
    PulseRejected { register: RegisterId, bit: u8 },
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the failed operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::WebSocketError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingThingName
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
        )
    }

    /// Code surfaced when this error stops the sync loop.
    pub fn fatal_code(&self) -> i32 {
        match self {
            SyncError::TransportFatal { code } => *code,
            SyncError::ChannelError(_) => FATAL_CHANNEL_CLOSED,
            _ => FATAL_LINK_STOPPED,
        }
    }
}
