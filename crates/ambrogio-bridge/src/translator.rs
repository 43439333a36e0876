//! Translation between device notifications and broker messages
//!
//! # Outbound
//!
//! Every [`Notification`] becomes a small JSON document published on the
//! `/state` topic:
//!
//! | Notification | Document |
//! |--------------|----------|
//! | Info | `{"typ":"info","volt":24.1,"batt":80,"curr":1.5}` |
//! | State | `{"type":"stat","stat":"<name>"}` |
//! | Message | `{"type":"mesg","mesg":"<name>"}` |
//! | Failure | `{"type":"fail","fail":"<name>"}` |
//!
//! Info carries its discriminator in `typ`, the others in `type`;
//! existing consumers depend on both spellings.
//!
//! A serialized document must fit the configured payload bound (256 bytes
//! by default). Documents are not chunked; an oversized one is rejected.
//!
//! # Inbound
//!
//! Bytes on `/serialin` go to the device untouched. Bytes on `/command`
//! are parsed as `{"cmnd": "play" | "pause" | "home"}`; any other verb,
//! or no verb, is ignored without error.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::Topics;
use crate::error::{BridgeError, Result};
use crate::protocol::{DeviceAction, Notification};

/// Discriminator value for info documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoTag {
    /// `"info"`
    #[serde(rename = "info")]
    Info,
}

/// Discriminator value for state documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateTag {
    /// `"stat"`
    #[serde(rename = "stat")]
    Stat,
}

/// Discriminator value for message documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageTag {
    /// `"mesg"`
    #[serde(rename = "mesg")]
    Mesg,
}

/// Discriminator value for failure documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureTag {
    /// `"fail"`
    #[serde(rename = "fail")]
    Fail,
}

/// Battery and drive telemetry document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoReport {
    /// Discriminator
    pub typ: InfoTag,
    /// Battery voltage
    pub volt: f64,
    /// Battery percent
    pub batt: u8,
    /// Current draw
    pub curr: f64,
}

/// Operating state document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReport {
    /// Discriminator
    #[serde(rename = "type")]
    pub kind: StateTag,
    /// State name
    pub stat: String,
}

/// Informational message document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReport {
    /// Discriminator
    #[serde(rename = "type")]
    pub kind: MessageTag,
    /// Message name
    pub mesg: String,
}

/// Fault document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Discriminator
    #[serde(rename = "type")]
    pub kind: FailureTag,
    /// Fault name
    pub fail: String,
}

/// Document published on the state topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// Telemetry
    Info(InfoReport),
    /// Operating state
    State(StateReport),
    /// Informational message
    Message(MessageReport),
    /// Fault
    Failure(FailureReport),
}

impl From<&Notification> for OutboundMessage {
    fn from(notification: &Notification) -> Self {
        match notification {
            Notification::Info {
                battery_voltage,
                battery_percent,
                current,
            } => OutboundMessage::Info(InfoReport {
                typ: InfoTag::Info,
                volt: *battery_voltage,
                batt: *battery_percent,
                curr: *current,
            }),
            Notification::State(name) => OutboundMessage::State(StateReport {
                kind: StateTag::Stat,
                stat: name.clone(),
            }),
            Notification::Message(name) => OutboundMessage::Message(MessageReport {
                kind: MessageTag::Mesg,
                mesg: name.clone(),
            }),
            Notification::Failure(name) => OutboundMessage::Failure(FailureReport {
                kind: FailureTag::Fail,
                fail: name.clone(),
            }),
        }
    }
}

/// Command document received on the command topic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundCommand {
    /// Value of the `cmnd` field, if it is a string
    pub verb: Option<String>,
}

impl InboundCommand {
    /// Parse a command document
    ///
    /// Fails only if the payload is not JSON. A missing or non-string
    /// `cmnd` field parses to a command with no verb.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let doc: Value = serde_json::from_slice(payload)
            .map_err(|e| BridgeError::InvalidCommand(e.to_string()))?;
        Ok(Self {
            verb: doc.get("cmnd").and_then(Value::as_str).map(str::to_owned),
        })
    }

    /// Action named by the verb, if recognized
    pub fn action(&self) -> Option<DeviceAction> {
        self.verb.as_deref().and_then(DeviceAction::from_verb)
    }
}

/// What to do with one inbound broker message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRoute {
    /// Write these bytes to the link unchanged
    SerialPassthrough(Bytes),
    /// Ask the device to perform an action
    Action(DeviceAction),
    /// Nothing to do
    Ignored,
}

/// Converts between device notifications and broker payloads
#[derive(Debug, Clone)]
pub struct MessageTranslator {
    topics: Topics,
    max_payload: usize,
}

impl MessageTranslator {
    /// Create a translator for the given topic set and payload bound
    pub fn new(topics: Topics, max_payload: usize) -> Self {
        Self {
            topics,
            max_payload,
        }
    }

    /// Topic set in use
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Serialize a notification for the state topic
    pub fn encode_notification(&self, notification: &Notification) -> Result<Vec<u8>> {
        let message = OutboundMessage::from(notification);
        let payload = serde_json::to_vec(&message)?;

        if payload.len() > self.max_payload {
            return Err(BridgeError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }

        trace!(bytes = payload.len(), "Encoded state document");
        Ok(payload)
    }

    /// Decide how to handle a message received from the broker
    pub fn route_inbound(&self, topic: &str, payload: &Bytes) -> InboundRoute {
        if topic == self.topics.serial_in {
            trace!(bytes = payload.len(), "Serial passthrough from broker");
            return InboundRoute::SerialPassthrough(payload.clone());
        }

        if topic == self.topics.command {
            let command = match InboundCommand::parse(payload) {
                Ok(command) => command,
                Err(e) => {
                    warn!(error = %e, "Discarding malformed command");
                    return InboundRoute::Ignored;
                }
            };
            return match command.action() {
                Some(action) => InboundRoute::Action(action),
                None => {
                    debug!(verb = ?command.verb, "Ignoring unrecognized command");
                    InboundRoute::Ignored
                }
            };
        }

        debug!(topic, "Message on unexpected topic");
        InboundRoute::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_STATE_PAYLOAD;

    fn translator() -> MessageTranslator {
        MessageTranslator::new(Topics::new("ambrogio", "test"), MAX_STATE_PAYLOAD)
    }

    #[test]
    fn test_info_document_fields() {
        let payload = translator()
            .encode_notification(&Notification::Info {
                battery_voltage: 24.1,
                battery_percent: 80,
                current: 1.5,
            })
            .unwrap();

        let doc: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(doc["typ"], "info");
        assert_eq!(doc["volt"], 24.1);
        assert_eq!(doc["batt"], 80);
        assert_eq!(doc["curr"], 1.5);
        assert!(doc.get("type").is_none());
    }

    #[test]
    fn test_info_document_typed_decode() {
        let payload = translator()
            .encode_notification(&Notification::Info {
                battery_voltage: 24.1,
                battery_percent: 80,
                current: 1.5,
            })
            .unwrap();

        let decoded: OutboundMessage = serde_json::from_slice(&payload).unwrap();
        match decoded {
            OutboundMessage::Info(info) => {
                assert_eq!(info.volt, 24.1);
                assert_eq!(info.batt, 80);
                assert_eq!(info.curr, 1.5);
            }
            other => panic!("unexpected document: {other:?}"),
        }
    }

    #[test]
    fn test_named_documents() {
        let t = translator();
        let state = t
            .encode_notification(&Notification::State("MOWING".to_string()))
            .unwrap();
        assert_eq!(state, br#"{"type":"stat","stat":"MOWING"}"#);

        let message = t
            .encode_notification(&Notification::Message("RAIN_DELAY".to_string()))
            .unwrap();
        assert_eq!(message, br#"{"type":"mesg","mesg":"RAIN_DELAY"}"#);

        let failure = t
            .encode_notification(&Notification::Failure("BLADE_BLOCKED".to_string()))
            .unwrap();
        assert_eq!(failure, br#"{"type":"fail","fail":"BLADE_BLOCKED"}"#);
    }

    #[test]
    fn test_untagged_decode_picks_right_variant() {
        let doc: OutboundMessage = serde_json::from_str(r#"{"type":"fail","fail":"X"}"#).unwrap();
        assert!(matches!(doc, OutboundMessage::Failure(_)));

        let doc: OutboundMessage = serde_json::from_str(r#"{"type":"mesg","mesg":"X"}"#).unwrap();
        assert!(matches!(doc, OutboundMessage::Message(_)));
    }

    #[test]
    fn test_oversized_document_rejected() {
        let t = MessageTranslator::new(Topics::new("a", "b"), 32);
        let err = t
            .encode_notification(&Notification::Failure("X".repeat(64)))
            .unwrap_err();
        assert!(matches!(err, BridgeError::PayloadTooLarge { max: 32, .. }));
    }

    #[test]
    fn test_route_serial_in_verbatim() {
        let t = translator();
        let payload = Bytes::from_static(&[0x02, 0x00, 0xFF, 0x03]);
        assert_eq!(
            t.route_inbound("ambrogio/test/serialin", &payload),
            InboundRoute::SerialPassthrough(payload.clone())
        );
    }

    #[test]
    fn test_route_commands() {
        let t = translator();
        let route = |body: &'static str| {
            t.route_inbound("ambrogio/test/command", &Bytes::from_static(body.as_bytes()))
        };

        assert_eq!(route(r#"{"cmnd":"home"}"#), InboundRoute::Action(DeviceAction::GoHome));
        assert_eq!(route(r#"{"cmnd":"play"}"#), InboundRoute::Action(DeviceAction::Play));
        assert_eq!(route(r#"{"cmnd":"pause"}"#), InboundRoute::Action(DeviceAction::Pause));
        assert_eq!(route(r#"{"cmnd":"unknown"}"#), InboundRoute::Ignored);
        assert_eq!(route(r#"{"other":1}"#), InboundRoute::Ignored);
        assert_eq!(route(r#"{"cmnd":7}"#), InboundRoute::Ignored);
        assert_eq!(route("not json"), InboundRoute::Ignored);
    }

    #[test]
    fn test_route_unknown_topic() {
        let t = translator();
        assert_eq!(
            t.route_inbound("ambrogio/test/state", &Bytes::from_static(b"{}")),
            InboundRoute::Ignored
        );
    }

    #[test]
    fn test_command_parse_errors() {
        assert!(matches!(
            InboundCommand::parse(b"{"),
            Err(BridgeError::InvalidCommand(_))
        ));
        assert_eq!(InboundCommand::parse(b"[]").unwrap().verb, None);
    }
}
