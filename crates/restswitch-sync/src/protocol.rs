//! # Shadow Gateway Protocol
//!
//! Frames exchanged with the shadow gateway over the WebSocket link.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Shadow Gateway Frames                              │
//! │                                                                         │
//! │  SUBSCRIPTION (after every connect)                                    │
//! │  ──────────────────────────────────                                    │
//! │  AGENT   ───► subscribe { topic: "a140808/<thing>" }                   │
//! │                                                                         │
//! │  SHADOW DELTA                                                          │
//! │  ────────────                                                          │
//! │  GATEWAY ───► delta { state: {"o1":1,"o3":0} }                         │
//! │  AGENT   ───► update { thingName, clientToken, document }              │
//! │  GATEWAY ───► updateAck { clientToken, status: accepted|rejected }     │
//! │                                                                         │
//! │  PULSE COMMANDS                                                        │
//! │  ──────────────                                                        │
//! │  GATEWAY ───► message { topic, payload: "{\"p1\",\"p3\"}" }            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Frames are adjacently tagged JSON:
//! ```json
//! { "type": "delta", "payload": { "state": { "o1": 1 } } }
//! ```
//!
//! The delta `state` is kept as raw bytes so the echoed report carries the
//! exact text the gateway sent. Pulse payloads are not strict JSON, so
//! `message` frames carry them as strings.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{SyncError, SyncResult};
use crate::transport::AckStatus;

// =============================================================================
// Inbound Frames
// =============================================================================

/// Frames received from the gateway.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Delta(DeltaPayload),
    Message(MessagePayload),
    UpdateAck(UpdateAckPayload),
}

/// A shadow delta. `state` is the verbatim delta document.
#[derive(Debug, Clone, Deserialize)]
pub struct DeltaPayload {
    pub state: Box<RawValue>,
}

/// A message published on a subscribed topic.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub topic: String,
    pub payload: String,
}

/// The gateway's verdict on an earlier `update`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAckPayload {
    pub client_token: String,
    pub status: AckStatus,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(borrow)]
    payload: &'a RawValue,
}

impl InboundFrame {
    /// Parses a frame in two steps so the delta state survives untouched.
    pub fn from_json(text: &str) -> SyncResult<Self> {
        let envelope: Envelope<'_> = serde_json::from_str(text)?;
        let payload = envelope.payload.get();

        match envelope.kind {
            "delta" => Ok(InboundFrame::Delta(serde_json::from_str(payload)?)),
            "message" => Ok(InboundFrame::Message(serde_json::from_str(payload)?)),
            "updateAck" => Ok(InboundFrame::UpdateAck(serde_json::from_str(payload)?)),
            other => Err(SyncError::InvalidMessage(format!(
                "Unknown frame type: {}",
                other
            ))),
        }
    }

    /// Returns the frame type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            InboundFrame::Delta(_) => "delta",
            InboundFrame::Message(_) => "message",
            InboundFrame::UpdateAck(_) => "updateAck",
        }
    }
}

// =============================================================================
// Outbound Frames
// =============================================================================

/// Frames sent to the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum OutboundFrame {
    Update(UpdatePayload),
    Subscribe(SubscribePayload),
}

/// A report document for the thing's shadow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub thing_name: String,
    pub client_token: String,
    pub document: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribePayload {
    pub topic: String,
}

impl OutboundFrame {
    pub fn update(thing_name: &str, client_token: &str, document: &str) -> Self {
        OutboundFrame::Update(UpdatePayload {
            thing_name: thing_name.to_string(),
            client_token: client_token.to_string(),
            document: document.to_string(),
        })
    }

    pub fn subscribe(topic: &str) -> Self {
        OutboundFrame::Subscribe(SubscribePayload {
            topic: topic.to_string(),
        })
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundFrame::Update(_) => "update",
            OutboundFrame::Subscribe(_) => "subscribe",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delta_state_is_verbatim() {
        let text = r#"{"type":"delta","payload":{"state":{"o1":1, "o3" :0}}}"#;
        let InboundFrame::Delta(delta) = InboundFrame::from_json(text).unwrap() else {
            panic!("expected delta");
        };
        assert_eq!(delta.state.get(), r#"{"o1":1, "o3" :0}"#);
    }

    #[test]
    fn test_message_frame() {
        let text = r#"{"type":"message","payload":{"topic":"a140808/dev","payload":"{\"p1\",\"p3\"}"}}"#;
        let frame = InboundFrame::from_json(text).unwrap();
        assert_eq!(frame.type_name(), "message");
        let InboundFrame::Message(msg) = frame else {
            panic!("expected message");
        };
        assert_eq!(msg.topic, "a140808/dev");
        assert_eq!(msg.payload, r#"{"p1","p3"}"#);
    }

    #[test]
    fn test_update_ack_frame() {
        let text = r#"{"type":"updateAck","payload":{"clientToken":"dev-4","status":"rejected"}}"#;
        let InboundFrame::UpdateAck(ack) = InboundFrame::from_json(text).unwrap() else {
            panic!("expected ack");
        };
        assert_eq!(ack.client_token, "dev-4");
        assert_eq!(ack.status, AckStatus::Rejected);
    }

    #[test]
    fn test_unknown_frame_type() {
        let err = InboundFrame::from_json(r#"{"type":"bogus","payload":{}}"#).unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(_)));
    }

    #[test]
    fn test_outbound_update_serialization() {
        let frame = OutboundFrame::update("dev", "dev-0", r#"{"state":{"reported":{"o1":1}}}"#);
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"update","payload":{"thingName":"dev","clientToken":"dev-0","document":"{\"state\":{\"reported\":{\"o1\":1}}}"}}"#
        );
    }

    #[test]
    fn test_outbound_subscribe_serialization() {
        let frame = OutboundFrame::subscribe("a140808/dev");
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"subscribe","payload":{"topic":"a140808/dev"}}"#
        );
    }
}
