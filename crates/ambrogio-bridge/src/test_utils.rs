//! Test doubles for the bridge's collaborators
//!
//! In-memory stand-ins for the link, the broker, the configuration portal
//! and the device protocol decoder. They record every call so tests can
//! assert on exactly what the bridge loop did during a tick.
//!
//! # Example
//!
//! ```rust,ignore
//! use ambrogio_bridge::test_utils::{MockBroker, MockLink, MockPortal, ScriptedProtocol};
//!
//! let (mut bridge, _handle) = BridgeLoop::new(config, portal, broker, link, protocol);
//! bridge.tick(Instant::now()).await;
//! assert_eq!(bridge.link().connect_calls().len(), 1);
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::{Credentials, DeviceConfig};
use crate::discovery::{DiscoverySink, HardwareAddress};
use crate::error::{BridgeError, Result};
use crate::frame::Frame;
use crate::interface::{BrokerClient, ConfigPortal, DeviceLink, InboundMessage, PortalEvent};
use crate::protocol::{DeviceAction, DeviceProtocol, Notification};

/// Mock short-range link
#[derive(Debug, Default)]
pub struct MockLink {
    connected: bool,
    fail_connect: bool,
    connect_calls: Vec<HardwareAddress>,
    disconnect_calls: usize,
    incoming: VecDeque<Bytes>,
    written: Vec<Vec<u8>>,
    discovery_budgets: Vec<Duration>,
    nearby: Vec<(String, String)>,
}

impl MockLink {
    /// Create a new mock link
    pub fn new() -> Self {
        Self::default()
    }

    /// Make connect attempts fail
    pub fn fail_connect(&mut self, enabled: bool) {
        self.fail_connect = enabled;
    }

    /// Add a device that discovery scans will report
    pub fn add_nearby(&mut self, address: impl Into<String>, name: impl Into<String>) {
        self.nearby.push((address.into(), name.into()));
    }

    /// Queue one read chunk (simulates data from the device)
    pub fn queue_incoming(&mut self, data: impl Into<Bytes>) {
        self.incoming.push_back(data.into());
    }

    /// Simulate the device dropping the link without notice
    pub fn drop_connection(&mut self) {
        self.connected = false;
    }

    /// Addresses passed to connect
    pub fn connect_calls(&self) -> &[HardwareAddress] {
        &self.connect_calls
    }

    /// Number of disconnect calls
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls
    }

    /// Bytes written to the device, one entry per write
    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    /// Budgets of the scans started so far
    pub fn discovery_budgets(&self) -> &[Duration] {
        &self.discovery_budgets
    }
}

#[async_trait]
impl DeviceLink for MockLink {
    async fn connect(&mut self, address: HardwareAddress) -> Result<()> {
        self.connect_calls.push(address);
        if self.fail_connect {
            return Err(BridgeError::ConnectionTimeout { duration_ms: 10000 });
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.disconnect_calls += 1;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn poll_received(&mut self) -> Option<Bytes> {
        self.incoming.pop_front()
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(BridgeError::Disconnected);
        }
        self.written.push(data.to_vec());
        Ok(())
    }

    fn start_discovery(&mut self, budget: Duration, sink: DiscoverySink) -> Result<()> {
        self.discovery_budgets.push(budget);
        for (address, name) in &self.nearby {
            sink.record(address.clone(), name.clone());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MockLink"
    }
}

/// Mock broker client
#[derive(Debug, Default)]
pub struct MockBroker {
    connected: bool,
    fail_connect: bool,
    connect_calls: Vec<(String, Credentials)>,
    subscriptions: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
    inbound: VecDeque<InboundMessage>,
}

impl MockBroker {
    /// Create a new mock broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock broker that is already connected
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    /// Make connect attempts fail
    pub fn fail_connect(&mut self, enabled: bool) {
        self.fail_connect = enabled;
    }

    /// Simulate the broker dropping the session
    pub fn drop_connection(&mut self) {
        self.connected = false;
    }

    /// Queue a message for the next maintenance call
    pub fn queue_inbound(&mut self, topic: impl Into<String>, payload: impl Into<Bytes>) {
        self.inbound.push_back(InboundMessage::new(topic, payload));
    }

    /// Client ids and credentials passed to connect
    pub fn connect_calls(&self) -> &[(String, Credentials)] {
        &self.connect_calls
    }

    /// Topics subscribed so far
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Every published message
    pub fn published(&self) -> &[(String, Vec<u8>)] {
        &self.published
    }

    /// Payloads published on one topic
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Log lines published on one topic, as text
    pub fn log_lines(&self, topic: &str) -> Vec<String> {
        self.published_on(topic)
            .into_iter()
            .map(|p| String::from_utf8_lossy(&p).into_owned())
            .collect()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&mut self, client_id: &str, credentials: &Credentials) -> Result<()> {
        self.connect_calls
            .push((client_id.to_string(), credentials.clone()));
        if self.fail_connect {
            return Err(BridgeError::BrokerConnectFailed("connection refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        if !self.connected {
            return Err(BridgeError::BrokerDisconnected);
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(BridgeError::BrokerDisconnected);
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn poll_inbound(&mut self) -> Vec<InboundMessage> {
        self.inbound.drain(..).collect()
    }
}

/// Mock configuration portal
#[derive(Debug)]
pub struct MockPortal {
    online: bool,
    settings: DeviceConfig,
    pending: Vec<PortalEvent>,
    maintain_calls: usize,
}

impl MockPortal {
    /// Online portal with the given device settings
    pub fn new(settings: DeviceConfig) -> Self {
        Self {
            online: true,
            settings,
            pending: Vec::new(),
            maintain_calls: 0,
        }
    }

    /// Set network availability
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Raise an event on the next maintenance call
    pub fn push_event(&mut self, event: PortalEvent) {
        self.pending.push(event);
    }

    /// Change the stay-connected flag
    pub fn set_stay_connected(&mut self, enabled: bool) {
        self.settings.stay_connected = enabled;
    }

    /// Change the configured address string
    pub fn set_address(&mut self, address: impl Into<String>) {
        self.settings.address = address.into();
    }

    /// Number of maintenance calls
    pub fn maintain_calls(&self) -> usize {
        self.maintain_calls
    }
}

#[async_trait]
impl ConfigPortal for MockPortal {
    async fn maintain(&mut self) -> Vec<PortalEvent> {
        self.maintain_calls += 1;
        std::mem::take(&mut self.pending)
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn device_settings(&self) -> DeviceConfig {
        self.settings.clone()
    }
}

/// Decoder that returns scripted notifications
///
/// Every decoded frame pops the next scripted batch (or nothing once the
/// script runs out). Actions encode as `[0x02, verb..., 0x03]`.
#[derive(Debug, Default)]
pub struct ScriptedProtocol {
    script: VecDeque<Vec<Notification>>,
    frames: Vec<Frame>,
    actions: Vec<DeviceAction>,
}

impl ScriptedProtocol {
    /// Create an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications to return for the next decoded frame
    pub fn push_notifications(&mut self, batch: Vec<Notification>) {
        self.script.push_back(batch);
    }

    /// Frames handed to the decoder
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Actions requested so far
    pub fn actions(&self) -> &[DeviceAction] {
        &self.actions
    }

    /// Wire bytes this decoder produces for an action
    pub fn encoded(action: DeviceAction) -> Bytes {
        let mut out = vec![0x02];
        out.extend_from_slice(action.verb().as_bytes());
        out.push(0x03);
        Bytes::from(out)
    }
}

impl DeviceProtocol for ScriptedProtocol {
    fn decode(&mut self, frame: &Frame) -> Vec<Notification> {
        self.frames.push(frame.clone());
        self.script.pop_front().unwrap_or_default()
    }

    fn encode_action(&mut self, action: DeviceAction) -> Option<Bytes> {
        self.actions.push(action);
        Some(Self::encoded(action))
    }
}
