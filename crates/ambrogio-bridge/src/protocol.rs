//! Vocabulary shared with the device protocol decoder
//!
//! The decoder that understands the mower's command/response protocol is
//! a separate component. The bridge hands it complete frames and receives
//! typed [`Notification`]s; in the other direction it asks the decoder to
//! encode one of the [`DeviceAction`]s it knows how to request.

use bytes::Bytes;
use std::fmt;

use crate::frame::Frame;

/// Typed event decoded from one or more frames
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Periodic battery and drive telemetry
    Info {
        /// Battery voltage in volts
        battery_voltage: f64,
        /// Battery charge in percent
        battery_percent: u8,
        /// Current draw in amperes
        current: f64,
    },
    /// Named operating state
    State(String),
    /// Named informational message
    Message(String),
    /// Named fault
    Failure(String),
}

/// Actions the bridge can request from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAction {
    /// Start or resume mowing
    Play,
    /// Pause mowing
    Pause,
    /// Return to the charging station
    GoHome,
}

impl DeviceAction {
    /// Map a command verb to an action
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "play" => Some(DeviceAction::Play),
            "pause" => Some(DeviceAction::Pause),
            "home" => Some(DeviceAction::GoHome),
            _ => None,
        }
    }

    /// Command verb for this action
    pub fn verb(&self) -> &'static str {
        match self {
            DeviceAction::Play => "play",
            DeviceAction::Pause => "pause",
            DeviceAction::GoHome => "home",
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Device-specific protocol decoder
pub trait DeviceProtocol: Send {
    /// Interpret one complete frame
    fn decode(&mut self, frame: &Frame) -> Vec<Notification>;

    /// Encode an action as bytes for the link, if the protocol supports it
    fn encode_action(&mut self, action: DeviceAction) -> Option<Bytes>;
}

/// Decoder for when no device protocol is available
///
/// Produces no notifications and encodes no actions; raw passthrough on
/// `/serialin` and `/serialout` still works.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueProtocol;

impl DeviceProtocol for OpaqueProtocol {
    fn decode(&mut self, _frame: &Frame) -> Vec<Notification> {
        Vec::new()
    }

    fn encode_action(&mut self, _action: DeviceAction) -> Option<Bytes> {
        None
    }
}
