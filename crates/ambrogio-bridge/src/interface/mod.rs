//! Transport and collaborator interfaces
//!
//! The bridge talks to three independently failing things through the
//! traits in this module:
//!
//! - [`DeviceLink`] - the short-range link to the mower
//! - [`BrokerClient`] - the MQTT broker
//! - [`ConfigPortal`] - the configuration/network collaborator
//!
//! Drivers:
//!
//! - [`mqtt::MqttBroker`] - MQTT over `rumqttc`
//! - [`serial::SerialLink`] - RFCOMM-bound or USB serial port (requires `serial` feature)
//! - [`ble::BleLink`] - Bluetooth LE UART service (requires `ble` feature)
//!
//! # Feature Requirements
//!
//! - `serial`: Requires `libudev-dev` and `pkg-config` on Linux
//!   ```bash
//!   # Ubuntu/Debian
//!   apt install libudev-dev pkg-config
//!   ```
//!
//! - `ble`: Requires BlueZ development files on Linux
//!   ```bash
//!   apt install libdbus-1-dev
//!   ```

pub mod mqtt;

#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "serial")]
pub use serial::SerialLink;

#[cfg(feature = "ble")]
mod ble;
#[cfg(feature = "ble")]
pub use ble::BleLink;

use crate::config::{Credentials, DeviceConfig};
use crate::discovery::{DiscoverySink, HardwareAddress};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Short-range byte link to the device
///
/// Implementations must never block the caller beyond a bounded connect
/// or write. Received data is buffered by the driver and drained one read
/// chunk at a time with [`DeviceLink::poll_received`].
#[async_trait]
pub trait DeviceLink: Send {
    /// Open the link to the device at `address`
    async fn connect(&mut self, address: HardwareAddress) -> Result<()>;

    /// Close the link
    async fn disconnect(&mut self) -> Result<()>;

    /// Live liveness check
    ///
    /// May turn false without any call on this side, e.g. when the device
    /// walks out of range.
    fn is_connected(&self) -> bool;

    /// Take the next received chunk, exactly as one read delivered it
    fn poll_received(&mut self) -> Option<Bytes>;

    /// Write bytes to the device
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Start a scan that reports devices into `sink` for up to `budget`
    ///
    /// Returns once the scan is running; results arrive asynchronously.
    fn start_discovery(&mut self, budget: Duration, sink: DiscoverySink) -> Result<()>;

    /// Get the link name (for logging)
    fn name(&self) -> &str;
}

/// Message delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on
    pub topic: String,
    /// Raw payload
    pub payload: Bytes,
}

impl InboundMessage {
    /// Create a message
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Publish/subscribe broker client
#[async_trait]
pub trait BrokerClient: Send {
    /// Connect, waiting a bounded time for the broker to accept
    async fn connect(&mut self, client_id: &str, credentials: &Credentials) -> Result<()>;

    /// Whether the session is up
    fn is_connected(&self) -> bool;

    /// Subscribe to a topic
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Queue a message for publishing without waiting
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Maintenance hook: drain messages received since the last call
    fn poll_inbound(&mut self) -> Vec<InboundMessage>;
}

/// Signals raised by the configuration/network collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalEvent {
    /// The network came up; connect to the broker as soon as possible
    NetworkConnected,
    /// The operator saved new settings; transports must be rebuilt
    ConfigurationSaved,
}

/// Configuration and network collaborator
#[async_trait]
pub trait ConfigPortal: Send {
    /// Maintenance hook, called first on every tick
    async fn maintain(&mut self) -> Vec<PortalEvent>;

    /// Whether the local network is usable
    fn is_online(&self) -> bool;

    /// Current device settings
    fn device_settings(&self) -> DeviceConfig;
}
