//! BridgeLoop - the cooperative scheduler
//!
//! Ties the collaborators together once per tick:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          BridgeLoop                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌─────────────┐    ┌───────────────────┐    ┌──────────────┐    │
//! │  │ DeviceLink  │◄──►│ FrameSplitter     │◄──►│ BrokerClient │    │
//! │  │ (serial/BLE)│    │ DeviceProtocol    │    │ (MQTT)       │    │
//! │  └─────────────┘    │ MessageTranslator │    └──────────────┘    │
//! │                     │ BridgeState       │                        │
//! │  ┌─────────────┐    │  broker / link    │    ┌──────────────┐    │
//! │  │ConfigPortal │───►│  supervisors      │───►│ DiscoveryLog │    │
//! │  └─────────────┘    └───────────────────┘    └──────────────┘    │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A tick never waits on anything except bounded connect and write calls.
//! Order within a tick:
//!
//! 1. portal maintenance (network up, configuration saved)
//! 2. broker maintenance: inbound messages go to the link before any
//!    connection decision is made
//! 3. device data: read chunks are split into frames, decoded and published
//! 4. deferred broker connect, else reconnect when online (1 s cooldown)
//! 5. pending restart ends the tick with [`TickOutcome::Restart`]
//! 6. unexpected link drop detection
//! 7. link policy: connect, disconnect or discover (30 s cooldown)
//!
//! # Example
//!
//! ```rust,ignore
//! use ambrogio_bridge::bridge::BridgeLoop;
//!
//! let (bridge, handle) = BridgeLoop::new(config, portal, broker, link, protocol);
//! tokio::spawn(async move { handle.status().await });
//! let exit = bridge.run().await?;
//! ```

use serde::Serialize;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::config::{BridgeConfig, DeviceConfig};
use crate::discovery::{resolve, DiscoveredDevice, DiscoveryLog, HardwareAddress, Resolution};
use crate::error::{BridgeError, Result};
use crate::frame::FrameSplitter;
use crate::interface::{BrokerClient, ConfigPortal, DeviceLink, PortalEvent};
use crate::protocol::{DeviceAction, DeviceProtocol, Notification};
use crate::supervisor::{TransportKind, TransportState, TransportSupervisor};
use crate::translator::{InboundRoute, MessageTranslator};

/// Published on `/log` before each link attempt
const LOG_ATTEMPTING: &str = "Attempting to connect to mower by MAC: ";
/// Published on `/log` after a successful link connect
const LOG_CONNECTED: &str = "Successfully connected to Bluetooth Device";
/// Published on `/log` when the link drops on its own
const LOG_UNEXPECTED_CLOSE: &str = "Bluetooth connection was unexpectedly closed";
/// Published on `/log` after an explicit disconnect
const LOG_DISCONNECTED: &str = "Bluetooth disconnected";

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep ticking
    Continue,
    /// Configuration changed; every transport must be rebuilt
    Restart,
}

/// Why [`BridgeLoop::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// Configuration was saved; rebuild and run again
    Restart,
    /// Shutdown was requested
    Shutdown,
}

/// What the link policy decided for this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDecision {
    /// Open the link to this address
    Connect(HardwareAddress),
    /// The address is not usable; scan for devices instead
    Discover,
    /// The operator no longer wants the link; close it now
    Disconnect,
    /// The address text could not be processed at all
    Unparseable(String),
    /// Nothing to do
    Idle,
}

/// Evaluate the link connection policy
///
/// A connect (or scan) is only considered when the operator wants the link,
/// the link is down, the broker is up so outcomes can be reported, and the
/// link cooldown has elapsed. Unchecking stay-connected while connected
/// disconnects immediately, regardless of cooldown.
pub fn decide_link_action(
    settings: &DeviceConfig,
    link: &TransportSupervisor,
    broker_connected: bool,
    now: Instant,
) -> LinkDecision {
    if settings.stay_connected
        && !link.is_connected()
        && broker_connected
        && link.should_attempt_connect(now)
    {
        return match resolve(&settings.address) {
            Resolution::Address(address) => LinkDecision::Connect(address),
            Resolution::DiscoveryRequested => LinkDecision::Discover,
            Resolution::ParseError(reason) => LinkDecision::Unparseable(reason),
        };
    }

    if !settings.stay_connected && link.is_connected() {
        return LinkDecision::Disconnect;
    }

    LinkDecision::Idle
}

/// Flags and supervisors owned by the loop
#[derive(Debug, Clone)]
pub struct BridgeState {
    /// Broker reconnection state
    pub broker: TransportSupervisor,
    /// Link reconnection state
    pub link: TransportSupervisor,
    /// Network came up; connect to the broker on the next tick
    pub need_broker_connect: bool,
    /// Configuration was saved; restart after this tick
    pub need_restart: bool,
    /// Network status seen on the previous tick
    pub network_online: bool,
}

impl BridgeState {
    fn new(config: &BridgeConfig) -> Self {
        Self {
            broker: TransportSupervisor::new(
                TransportKind::Broker,
                config.reconnect.broker_cooldown,
            ),
            link: TransportSupervisor::new(TransportKind::Link, config.reconnect.link_cooldown),
            need_broker_connect: false,
            need_restart: false,
            network_online: false,
        }
    }
}

/// Bridge statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeStats {
    /// Frames handed to the decoder
    pub frames_decoded: u64,
    /// State documents published
    pub documents_published: u64,
    /// State documents dropped (oversized or broker down)
    pub documents_dropped: u64,
    /// Raw frames published on `/serialout`
    pub raw_frames_forwarded: u64,
    /// Passthrough writes from `/serialin`
    pub serial_writes: u64,
    /// Device actions written to the link
    pub actions_dispatched: u64,
    /// Successful broker connects
    pub broker_connects: u64,
    /// Successful link connects
    pub link_connects: u64,
    /// Unexpected link drops
    pub link_drops: u64,
    /// Discovery scans started
    pub discovery_scans: u64,
}

/// Snapshot served by the status surface
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Bridge name
    pub thing_name: String,
    /// Configured broker `host:port`
    pub broker_address: String,
    /// `{prefix}/{thing}`
    pub topic_base: String,
    /// Whether the network is up
    pub network_online: bool,
    /// Broker session state
    pub broker_state: String,
    /// Link state
    pub link_state: String,
    /// Rendered discovery log
    pub discovery_log: String,
    /// Devices found by the most recent scan
    pub discovered: Vec<DiscoveredDevice>,
    /// Counters
    pub stats: BridgeStats,
}

/// Commands that can be sent to a running bridge
#[derive(Debug)]
pub enum BridgeCommand {
    /// Get a status snapshot
    GetStatus(oneshot::Sender<StatusReport>),
    /// Shutdown the bridge
    Shutdown,
}

/// Handle for controlling a running [`BridgeLoop`]
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    /// Get a status snapshot
    pub async fn status(&self) -> Result<StatusReport> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::GetStatus(tx))
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Shutdown the bridge
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Shutdown)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }
}

/// Bridge between the device link and the broker
pub struct BridgeLoop<P, B, L, D> {
    config: BridgeConfig,
    portal: P,
    broker: B,
    link: L,
    protocol: D,
    splitter: FrameSplitter,
    translator: MessageTranslator,
    discovery: DiscoveryLog,
    state: BridgeState,
    stats: BridgeStats,
    /// Last unparseable address text reported, to log it once
    reported_parse_error: Option<String>,
    command_rx: mpsc::Receiver<BridgeCommand>,
}

impl<P, B, L, D> BridgeLoop<P, B, L, D>
where
    P: ConfigPortal,
    B: BrokerClient,
    L: DeviceLink,
    D: DeviceProtocol,
{
    /// Create a bridge from its collaborators
    pub fn new(
        config: BridgeConfig,
        portal: P,
        broker: B,
        link: L,
        protocol: D,
    ) -> (Self, BridgeHandle) {
        let translator = MessageTranslator::new(config.topics(), config.bridge.max_payload);
        let state = BridgeState::new(&config);

        let (command_tx, command_rx) = mpsc::channel(16);
        let handle = BridgeHandle { command_tx };

        let bridge = Self {
            config,
            portal,
            broker,
            link,
            protocol,
            splitter: FrameSplitter::new(),
            translator,
            discovery: DiscoveryLog::new(),
            state,
            stats: BridgeStats::default(),
            reported_parse_error: None,
            command_rx,
        };

        (bridge, handle)
    }

    /// Loop state
    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    /// Counters
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Shared discovery log
    pub fn discovery_log(&self) -> &DiscoveryLog {
        &self.discovery
    }

    /// Configuration portal
    pub fn portal(&self) -> &P {
        &self.portal
    }

    /// Configuration portal, mutably
    pub fn portal_mut(&mut self) -> &mut P {
        &mut self.portal
    }

    /// Broker client
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Broker client, mutably
    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    /// Device link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Device link, mutably
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Protocol decoder
    pub fn protocol(&self) -> &D {
        &self.protocol
    }

    /// Protocol decoder, mutably
    pub fn protocol_mut(&mut self) -> &mut D {
        &mut self.protocol
    }

    /// Build a status snapshot
    pub fn status(&self) -> StatusReport {
        StatusReport {
            thing_name: self.config.thing_name.clone(),
            broker_address: self.config.broker.address(),
            topic_base: self.translator.topics().base.clone(),
            network_online: self.state.network_online,
            broker_state: self.state.broker.state().to_string(),
            link_state: self.state.link.state().to_string(),
            discovery_log: self.discovery.render(),
            discovered: self.discovery.devices(),
            stats: self.stats.clone(),
        }
    }

    /// Run the bridge until shutdown or a requested restart
    ///
    /// On restart the link is closed after the configured delay and the
    /// caller is expected to rebuild every collaborator from fresh
    /// configuration.
    pub async fn run(mut self) -> Result<BridgeExit> {
        info!(
            thing = %self.config.thing_name,
            broker = %self.config.broker.address(),
            link = self.link.name(),
            "Starting bridge"
        );

        let mut interval = tokio::time::interval(self.config.reconnect.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.tick(Instant::now()).await == TickOutcome::Restart {
                        info!(
                            delay = ?self.config.reconnect.restart_delay,
                            "Configuration saved, restarting"
                        );
                        tokio::time::sleep(self.config.reconnect.restart_delay).await;
                        break BridgeExit::Restart;
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        BridgeCommand::GetStatus(tx) => {
                            let _ = tx.send(self.status());
                        }
                        BridgeCommand::Shutdown => {
                            info!("Bridge shutdown requested");
                            break BridgeExit::Shutdown;
                        }
                    }
                }
            }
        };

        if self.link.is_connected() {
            if let Err(e) = self.link.disconnect().await {
                warn!(error = %e, "Error disconnecting link");
            }
        }

        info!(?exit, "Bridge stopped");
        Ok(exit)
    }

    /// Run one iteration of the loop
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        for event in self.portal.maintain().await {
            match event {
                PortalEvent::NetworkConnected => {
                    info!("Network connected, broker connect scheduled");
                    self.state.need_broker_connect = true;
                }
                PortalEvent::ConfigurationSaved => {
                    info!("Configuration saved, restart scheduled");
                    self.state.need_restart = true;
                }
            }
        }
        self.observe_network();

        self.service_broker().await;
        self.service_link();

        if self.state.broker.is_connected() && !self.broker.is_connected() {
            self.state.broker.on_external_disconnect_observed();
            warn!("Broker connection lost");
        }

        if self.state.need_broker_connect {
            if self.connect_broker(now).await {
                self.state.need_broker_connect = false;
            }
        } else if self.state.network_online && !self.broker.is_connected() {
            self.connect_broker(now).await;
        }

        if self.state.need_restart {
            return TickOutcome::Restart;
        }

        self.detect_link_drop();
        self.apply_link_policy(now).await;

        TickOutcome::Continue
    }

    fn observe_network(&mut self) {
        let online = self.portal.is_online();
        if online != self.state.network_online {
            if online {
                info!(transport = %TransportKind::Network, "Online");
            } else {
                warn!(transport = %TransportKind::Network, "Offline");
            }
            self.state.network_online = online;
        }
    }

    /// Deliver queued broker messages
    async fn service_broker(&mut self) {
        for msg in self.broker.poll_inbound() {
            match self.translator.route_inbound(&msg.topic, &msg.payload) {
                InboundRoute::SerialPassthrough(bytes) => {
                    if self.write_to_link(&bytes).await {
                        self.stats.serial_writes += 1;
                    }
                }
                InboundRoute::Action(action) => self.dispatch_action(action).await,
                InboundRoute::Ignored => {}
            }
        }
    }

    async fn dispatch_action(&mut self, action: DeviceAction) {
        let Some(bytes) = self.protocol.encode_action(action) else {
            debug!(%action, "Decoder cannot encode action");
            return;
        };
        if self.write_to_link(&bytes).await {
            info!(%action, "Device action sent");
            self.stats.actions_dispatched += 1;
        }
    }

    async fn write_to_link(&mut self, data: &[u8]) -> bool {
        if !self.link.is_connected() {
            debug!(bytes = data.len(), "Link down, dropping write");
            return false;
        }
        match self.link.write(data).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, link = self.link.name(), "Link write failed");
                false
            }
        }
    }

    /// Drain received chunks, decode and publish
    fn service_link(&mut self) {
        while let Some(chunk) = self.link.poll_received() {
            trace!(bytes = chunk.len(), "Chunk from link");
            for frame in self.splitter.split(&chunk) {
                if self.config.bridge.forward_raw_frames && self.broker.is_connected() {
                    let topic = &self.translator.topics().serial_out;
                    match self.broker.publish(topic, frame.as_bytes()) {
                        Ok(()) => self.stats.raw_frames_forwarded += 1,
                        Err(e) => debug!(error = %e, "Raw frame not forwarded"),
                    }
                }

                self.stats.frames_decoded += 1;
                for notification in self.protocol.decode(&frame) {
                    self.publish_notification(&notification);
                }
            }
        }
    }

    fn publish_notification(&mut self, notification: &Notification) {
        let payload = match self.translator.encode_notification(notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Dropping state document");
                self.stats.documents_dropped += 1;
                return;
            }
        };

        if !self.broker.is_connected() {
            debug!("Broker down, dropping state document");
            self.stats.documents_dropped += 1;
            return;
        }

        match self.broker.publish(&self.translator.topics().state, &payload) {
            Ok(()) => self.stats.documents_published += 1,
            Err(e) => {
                warn!(error = %e, "State publish failed");
                self.stats.documents_dropped += 1;
            }
        }
    }

    /// Publish a diagnostic line on `/log`; dropped if the broker is down
    fn publish_log(&mut self, line: &str) {
        if !self.broker.is_connected() {
            trace!(line, "Broker down, log line dropped");
            return;
        }
        if let Err(e) = self.broker.publish(&self.translator.topics().log, line.as_bytes()) {
            debug!(error = %e, "Log publish failed");
        }
    }

    /// Attempt a broker connect if the cooldown allows; true on success
    async fn connect_broker(&mut self, now: Instant) -> bool {
        if !self.state.broker.should_attempt_connect(now) {
            return false;
        }
        self.state.broker.record_attempt(now);

        let credentials = self.config.broker.credentials();
        if let Err(e) = self
            .broker
            .connect(&self.config.thing_name, &credentials)
            .await
        {
            warn!(
                error = %e,
                code = e.error_code(),
                broker = %self.config.broker.address(),
                "Broker connect failed"
            );
            self.state.broker.record_result(false);
            return false;
        }

        for topic in self.translator.topics().inbound() {
            if let Err(e) = self.broker.subscribe(topic).await {
                error!(error = %e, topic, "Subscribe failed");
            }
        }

        self.state.broker.record_result(true);
        self.stats.broker_connects += 1;
        info!(broker = %self.config.broker.address(), "Broker connected");
        true
    }

    fn detect_link_drop(&mut self) {
        if self.state.link.is_connected()
            && !self.link.is_connected()
            && self.state.link.on_external_disconnect_observed()
        {
            warn!(link = self.link.name(), "Link closed unexpectedly");
            self.stats.link_drops += 1;
            self.publish_log(LOG_UNEXPECTED_CLOSE);
        }
    }

    async fn apply_link_policy(&mut self, now: Instant) {
        let settings = self.portal.device_settings();
        let decision =
            decide_link_action(&settings, &self.state.link, self.broker.is_connected(), now);

        match decision {
            LinkDecision::Connect(address) => {
                self.reported_parse_error = None;
                info!(%address, "Connecting to device");
                self.publish_log(&format!("{}{}", LOG_ATTEMPTING, settings.address));

                self.state.link.record_attempt(now);
                let connected = match self.link.connect(address).await {
                    Ok(()) => self.link.is_connected(),
                    Err(e) => {
                        warn!(error = %e, code = e.error_code(), %address, "Link connect failed");
                        false
                    }
                };
                self.state.link.record_result(connected);

                if connected {
                    self.stats.link_connects += 1;
                    info!(%address, "Connected to device");
                    self.publish_log(LOG_CONNECTED);
                }
            }
            LinkDecision::Discover => {
                self.reported_parse_error = None;
                warn!(address = %settings.address, "Not a valid hardware address, scanning");

                self.state.link.record_attempt(now);
                self.discovery.begin_scan();
                match self
                    .link
                    .start_discovery(self.config.reconnect.discovery_budget, self.discovery.sink())
                {
                    Ok(()) => self.stats.discovery_scans += 1,
                    Err(e) => warn!(error = %e, "Discovery scan could not start"),
                }
                // A scan is not a connection; the cooldown alone spaces scans
                self.state.link.record_result(false);
            }
            LinkDecision::Disconnect => {
                info!(link = self.link.name(), "Stay-connected cleared, disconnecting");
                if let Err(e) = self.link.disconnect().await {
                    warn!(error = %e, "Link disconnect failed");
                }
                self.state.link.mark_disconnected();
                self.publish_log(LOG_DISCONNECTED);
            }
            LinkDecision::Unparseable(reason) => {
                if self.reported_parse_error.as_deref() != Some(reason.as_str()) {
                    error!(%reason, "Configured address could not be parsed");
                    self.reported_parse_error = Some(reason);
                }
            }
            LinkDecision::Idle => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfigBuilder;
    use crate::test_utils::{MockBroker, MockLink, MockPortal, ScriptedProtocol};
    use std::time::Duration;

    type TestBridge = BridgeLoop<MockPortal, MockBroker, MockLink, ScriptedProtocol>;

    fn create_test_bridge(address: &str) -> (TestBridge, BridgeHandle) {
        let config = BridgeConfigBuilder::new()
            .thing_name("test")
            .broker("mqtt.local", 1883)
            .device_address(address)
            .build();
        let portal = MockPortal::new(config.device.clone());
        BridgeLoop::new(
            config,
            portal,
            MockBroker::new(),
            MockLink::new(),
            ScriptedProtocol::new(),
        )
    }

    fn settings(address: &str, stay_connected: bool) -> DeviceConfig {
        DeviceConfig {
            address: address.to_string(),
            stay_connected,
        }
    }

    fn link_supervisor() -> TransportSupervisor {
        TransportSupervisor::new(TransportKind::Link, Duration::from_secs(30))
    }

    #[test]
    fn test_policy_connects_with_valid_address() {
        let decision = decide_link_action(
            &settings("AA:BB:CC:DD:EE:FF", true),
            &link_supervisor(),
            true,
            Instant::now(),
        );
        assert_eq!(
            decision,
            LinkDecision::Connect(HardwareAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]))
        );
    }

    #[test]
    fn test_policy_waits_for_broker() {
        let decision = decide_link_action(
            &settings("AA:BB:CC:DD:EE:FF", true),
            &link_supervisor(),
            false,
            Instant::now(),
        );
        assert_eq!(decision, LinkDecision::Idle);
    }

    #[test]
    fn test_policy_respects_cooldown() {
        let t0 = Instant::now();
        let mut link = link_supervisor();
        link.record_attempt(t0);
        link.record_result(false);

        let s = settings("AA:BB:CC:DD:EE:FF", true);
        assert_eq!(
            decide_link_action(&s, &link, true, t0 + Duration::from_millis(29_999)),
            LinkDecision::Idle
        );
        assert!(matches!(
            decide_link_action(&s, &link, true, t0 + Duration::from_millis(30_000)),
            LinkDecision::Connect(_)
        ));
    }

    #[test]
    fn test_policy_discovery_and_parse_error() {
        let now = Instant::now();
        assert_eq!(
            decide_link_action(&settings("not-a-mac", true), &link_supervisor(), true, now),
            LinkDecision::Discover
        );
        assert_eq!(
            decide_link_action(&settings("", true), &link_supervisor(), true, now),
            LinkDecision::Discover
        );
        assert_eq!(
            decide_link_action(
                &settings("AA:BB:CC:DD:EE:FF:00:11", true),
                &link_supervisor(),
                true,
                now
            ),
            LinkDecision::Discover
        );
        assert!(matches!(
            decide_link_action(&settings("AA:BB\t", true), &link_supervisor(), true, now),
            LinkDecision::Unparseable(_)
        ));
    }

    #[test]
    fn test_policy_disconnect_ignores_cooldown() {
        let t0 = Instant::now();
        let mut link = link_supervisor();
        link.record_attempt(t0);
        link.record_result(true);

        // One millisecond after the attempt, well inside the cooldown
        let decision = decide_link_action(
            &settings("AA:BB:CC:DD:EE:FF", false),
            &link,
            true,
            t0 + Duration::from_millis(1),
        );
        assert_eq!(decision, LinkDecision::Disconnect);
    }

    #[tokio::test]
    async fn test_bridge_creation() {
        let (bridge, handle) = create_test_bridge("AA:BB:CC:DD:EE:FF");
        assert_eq!(bridge.state().broker.state(), TransportState::Disconnected);
        assert_eq!(bridge.state().link.state(), TransportState::Disconnected);
        assert!(!bridge.state().need_restart);
        drop(handle);
    }

    #[tokio::test]
    async fn test_first_tick_connects_broker_then_link() {
        let (mut bridge, _handle) = create_test_bridge("AA:BB:CC:DD:EE:FF");

        assert_eq!(bridge.tick(Instant::now()).await, TickOutcome::Continue);

        assert!(bridge.broker().is_connected());
        assert_eq!(
            bridge.broker().subscriptions(),
            ["ambrogio/test/serialin", "ambrogio/test/command"]
        );
        assert_eq!(bridge.link().connect_calls().len(), 1);
        assert!(bridge.state().link.is_connected());

        let log = bridge.broker().log_lines("ambrogio/test/log");
        assert_eq!(
            log,
            vec![
                "Attempting to connect to mower by MAC: AA:BB:CC:DD:EE:FF".to_string(),
                "Successfully connected to Bluetooth Device".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_network_event_defers_broker_connect() {
        let (mut bridge, _handle) = create_test_bridge("AA:BB:CC:DD:EE:FF");
        bridge.portal_mut().set_online(false);
        bridge.portal_mut().push_event(PortalEvent::NetworkConnected);
        bridge.broker_mut().fail_connect(true);

        let t0 = Instant::now();
        bridge.tick(t0).await;
        assert!(bridge.state().need_broker_connect);
        assert_eq!(bridge.broker().connect_calls().len(), 1);

        // Still pending, but inside the broker cooldown
        bridge.tick(t0 + Duration::from_millis(500)).await;
        assert_eq!(bridge.broker().connect_calls().len(), 1);

        bridge.broker_mut().fail_connect(false);
        bridge.tick(t0 + Duration::from_millis(1000)).await;
        assert_eq!(bridge.broker().connect_calls().len(), 2);
        assert!(!bridge.state().need_broker_connect);
        assert!(bridge.broker().is_connected());
    }

    #[tokio::test]
    async fn test_offline_broker_not_attempted() {
        let (mut bridge, _handle) = create_test_bridge("AA:BB:CC:DD:EE:FF");
        bridge.portal_mut().set_online(false);

        bridge.tick(Instant::now()).await;
        assert!(bridge.broker().connect_calls().is_empty());
        assert!(bridge.link().connect_calls().is_empty());
    }

    #[tokio::test]
    async fn test_configuration_saved_requests_restart() {
        let (mut bridge, _handle) = create_test_bridge("AA:BB:CC:DD:EE:FF");
        bridge.portal_mut().push_event(PortalEvent::ConfigurationSaved);

        assert_eq!(bridge.tick(Instant::now()).await, TickOutcome::Restart);
        // Restart ends the tick before the link policy runs
        assert!(bridge.link().connect_calls().is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_logged_without_attempt() {
        let (mut bridge, _handle) = create_test_bridge("AA:BB:CC:DD:EE:FF\r");
        let t0 = Instant::now();
        bridge.tick(t0).await;
        bridge.tick(t0 + Duration::from_millis(10)).await;

        assert!(bridge.link().connect_calls().is_empty());
        assert!(bridge.link().discovery_budgets().is_empty());
        assert_eq!(bridge.state().link.attempts(), 0);
    }

    #[tokio::test]
    async fn test_overlong_address_starts_scan() {
        let (mut bridge, _handle) = create_test_bridge("Ambrogio mower in the garden");
        bridge.tick(Instant::now()).await;

        assert!(bridge.link().connect_calls().is_empty());
        assert_eq!(bridge.link().discovery_budgets().len(), 1);
        assert_eq!(bridge.stats().discovery_scans, 1);
    }

    #[tokio::test]
    async fn test_broker_drop_is_noticed() {
        let (mut bridge, _handle) = create_test_bridge("AA:BB:CC:DD:EE:FF");
        let t0 = Instant::now();
        bridge.tick(t0).await;
        assert!(bridge.state().broker.is_connected());

        bridge.broker_mut().drop_connection();
        bridge.tick(t0 + Duration::from_secs(2)).await;

        // Reconnected on the same tick the drop was seen
        assert_eq!(bridge.broker().connect_calls().len(), 2);
        assert!(bridge.state().broker.is_connected());
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (mut bridge, _handle) = create_test_bridge("AA:BB:CC:DD:EE:FF");
        bridge.tick(Instant::now()).await;

        let status = bridge.status();
        assert_eq!(status.thing_name, "test");
        assert_eq!(status.broker_address, "mqtt.local:1883");
        assert_eq!(status.topic_base, "ambrogio/test");
        assert_eq!(status.broker_state, "connected");
        assert_eq!(status.link_state, "connected");
        assert!(status.discovery_log.starts_with("No scan output"));
        assert_eq!(status.stats.link_connects, 1);
    }

    #[tokio::test]
    async fn test_handle_shutdown_stops_run() {
        let (bridge, handle) = create_test_bridge("AA:BB:CC:DD:EE:FF");
        let task = tokio::spawn(bridge.run());

        let status = handle.status().await.unwrap();
        assert_eq!(status.topic_base, "ambrogio/test");

        handle.shutdown().await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), BridgeExit::Shutdown);
        assert!(handle.status().await.is_err());
    }
}
