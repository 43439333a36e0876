//! Configuration types for the bridge
//!
//! This module provides configuration structures for the broker
//! connection, the target device, reconnection timing and outbound
//! message limits. Durations are written in humantime form (`"30s"`,
//! `"10ms"`) when serialized.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Frame terminator on the short-range link
pub const FRAME_SENTINEL: u8 = 0x03;

/// Upper bound for one serialized state document
pub const MAX_STATE_PAYLOAD: usize = 256;

/// Minimum interval between short-range link attempts
pub const DEFAULT_LINK_COOLDOWN_MS: u64 = 30_000;

/// Minimum interval between broker connection attempts
pub const DEFAULT_BROKER_COOLDOWN_MS: u64 = 1_000;

/// Duration of one discovery scan
pub const DEFAULT_DISCOVERY_BUDGET_MS: u64 = 25_000;

/// Default MQTT port
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Default topic prefix
pub const DEFAULT_TOPIC_PREFIX: &str = "ambrogio";

/// Default thing name, used as client id and topic segment
pub const DEFAULT_THING_NAME: &str = "AmbrogioBTSerialBridge";

/// Main configuration for the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Name of this bridge (client id and topic segment)
    #[serde(default = "default_thing_name")]
    pub thing_name: String,

    /// Broker connection settings
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Target device settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Reconnection and scheduling settings
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Outbound message settings
    #[serde(default)]
    pub bridge: OutboundConfig,
}

fn default_thing_name() -> String {
    DEFAULT_THING_NAME.to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            thing_name: default_thing_name(),
            broker: BrokerConfig::default(),
            device: DeviceConfig::default(),
            reconnect: ReconnectConfig::default(),
            bridge: OutboundConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: BridgeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values an operator could have entered wrongly
    pub fn validate(&self) -> Result<()> {
        if self.broker.host.trim().len() < 3 {
            return Err(BridgeError::InvalidConfig(
                "broker host needs at least 3 characters".to_string(),
            ));
        }
        if self.thing_name.is_empty() {
            return Err(BridgeError::MissingConfig("thing_name".to_string()));
        }
        if self.bridge.max_payload == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_payload must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Topics derived from the prefix and thing name
    pub fn topics(&self) -> Topics {
        Topics::new(&self.broker.topic_prefix, &self.thing_name)
    }
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker host name or address
    #[serde(default)]
    pub host: String,

    /// Broker TCP port
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// User name (empty for none)
    #[serde(default)]
    pub username: String,

    /// Password (empty for none)
    #[serde(default)]
    pub password: String,

    /// First topic segment
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// MQTT keep-alive interval
    #[serde(with = "humantime_serde", default = "default_keep_alive")]
    pub keep_alive: Duration,

    /// Upper bound on a single connect attempt
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_keep_alive() -> Duration {
    // A link connect can take ~10s, so the broker must tolerate that stall
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_BROKER_PORT,
            username: String::new(),
            password: String::new(),
            topic_prefix: default_topic_prefix(),
            keep_alive: default_keep_alive(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl BrokerConfig {
    /// Credentials to present, following which fields are filled in
    pub fn credentials(&self) -> Credentials {
        if !self.password.is_empty() {
            Credentials::UserPassword {
                username: self.username.clone(),
                password: self.password.clone(),
            }
        } else if !self.username.is_empty() {
            Credentials::User(self.username.clone())
        } else {
            Credentials::Anonymous
        }
    }

    /// `host:port` for display
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Credentials presented to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// No user name
    Anonymous,
    /// User name without password
    User(String),
    /// User name and password
    UserPassword {
        /// User name (may be empty)
        username: String,
        /// Password
        password: String,
    },
}

/// Target device settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Hardware address as entered by the operator
    #[serde(default)]
    pub address: String,

    /// Whether the bridge should hold a link to the device
    #[serde(default = "default_stay_connected")]
    pub stay_connected: bool,
}

fn default_stay_connected() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            stay_connected: true,
        }
    }
}

/// Reconnection and scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Minimum interval between link attempts (connect or scan)
    #[serde(with = "humantime_serde", default = "default_link_cooldown")]
    pub link_cooldown: Duration,

    /// Minimum interval between broker attempts
    #[serde(with = "humantime_serde", default = "default_broker_cooldown")]
    pub broker_cooldown: Duration,

    /// Length of a discovery scan
    #[serde(with = "humantime_serde", default = "default_discovery_budget")]
    pub discovery_budget: Duration,

    /// Pause before a requested restart
    #[serde(with = "humantime_serde", default = "default_restart_delay")]
    pub restart_delay: Duration,

    /// Interval between loop ticks
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,
}

fn default_link_cooldown() -> Duration {
    Duration::from_millis(DEFAULT_LINK_COOLDOWN_MS)
}

fn default_broker_cooldown() -> Duration {
    Duration::from_millis(DEFAULT_BROKER_COOLDOWN_MS)
}

fn default_discovery_budget() -> Duration {
    Duration::from_millis(DEFAULT_DISCOVERY_BUDGET_MS)
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(10)
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            link_cooldown: default_link_cooldown(),
            broker_cooldown: default_broker_cooldown(),
            discovery_budget: default_discovery_budget(),
            restart_delay: default_restart_delay(),
            tick_interval: default_tick_interval(),
        }
    }
}

/// Outbound message settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Upper bound for one serialized state document
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,

    /// Also publish every delimited frame verbatim on `/serialout`
    #[serde(default)]
    pub forward_raw_frames: bool,
}

fn default_max_payload() -> usize {
    MAX_STATE_PAYLOAD
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            max_payload: MAX_STATE_PAYLOAD,
            forward_raw_frames: false,
        }
    }
}

/// Topic set for one bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// `{prefix}/{thing}`
    pub base: String,
    /// Raw bytes to forward to the device
    pub serial_in: String,
    /// Raw frames received from the device
    pub serial_out: String,
    /// JSON commands
    pub command: String,
    /// JSON state documents
    pub state: String,
    /// Plain-text diagnostics
    pub log: String,
}

impl Topics {
    /// Derive all topics from a prefix and thing name
    pub fn new(prefix: &str, thing_name: &str) -> Self {
        let base = format!("{}/{}", prefix, thing_name);
        Self {
            serial_in: format!("{}/serialin", base),
            serial_out: format!("{}/serialout", base),
            command: format!("{}/command", base),
            state: format!("{}/state", base),
            log: format!("{}/log", base),
            base,
        }
    }

    /// Topics the bridge subscribes to after connecting
    pub fn inbound(&self) -> [&str; 2] {
        [&self.serial_in, &self.command]
    }
}

/// Builder for BridgeConfig
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thing name
    pub fn thing_name(mut self, name: impl Into<String>) -> Self {
        self.config.thing_name = name.into();
        self
    }

    /// Set broker host and port
    pub fn broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.broker.host = host.into();
        self.config.broker.port = port;
        self
    }

    /// Set broker credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.broker.username = username.into();
        self.config.broker.password = password.into();
        self
    }

    /// Set topic prefix
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.broker.topic_prefix = prefix.into();
        self
    }

    /// Set the device hardware address string
    pub fn device_address(mut self, address: impl Into<String>) -> Self {
        self.config.device.address = address.into();
        self
    }

    /// Set whether the link should be held open
    pub fn stay_connected(mut self, enabled: bool) -> Self {
        self.config.device.stay_connected = enabled;
        self
    }

    /// Set the link cooldown
    pub fn link_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.reconnect.link_cooldown = cooldown;
        self
    }

    /// Set the broker cooldown
    pub fn broker_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.reconnect.broker_cooldown = cooldown;
        self
    }

    /// Enable or disable raw frame forwarding
    pub fn forward_raw_frames(mut self, enabled: bool) -> Self {
        self.config.bridge.forward_raw_frames = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.thing_name, DEFAULT_THING_NAME);
        assert_eq!(config.broker.topic_prefix, "ambrogio");
        assert_eq!(config.reconnect.link_cooldown, Duration::from_secs(30));
        assert_eq!(config.reconnect.broker_cooldown, Duration::from_secs(1));
        assert_eq!(config.reconnect.discovery_budget, Duration::from_secs(25));
        assert_eq!(config.bridge.max_payload, 256);
        assert!(config.device.stay_connected);
        assert!(!config.bridge.forward_raw_frames);
    }

    #[test]
    fn test_topics() {
        let topics = Topics::new("ambrogio", "garden");
        assert_eq!(topics.base, "ambrogio/garden");
        assert_eq!(topics.serial_in, "ambrogio/garden/serialin");
        assert_eq!(topics.serial_out, "ambrogio/garden/serialout");
        assert_eq!(topics.command, "ambrogio/garden/command");
        assert_eq!(topics.state, "ambrogio/garden/state");
        assert_eq!(topics.log, "ambrogio/garden/log");
        assert_eq!(topics.inbound(), ["ambrogio/garden/serialin", "ambrogio/garden/command"]);
    }

    #[test]
    fn test_credentials_selection() {
        let mut broker = BrokerConfig::default();
        assert_eq!(broker.credentials(), Credentials::Anonymous);

        broker.username = "mower".to_string();
        assert_eq!(broker.credentials(), Credentials::User("mower".to_string()));

        broker.password = "secret".to_string();
        assert_eq!(
            broker.credentials(),
            Credentials::UserPassword {
                username: "mower".to_string(),
                password: "secret".to_string(),
            }
        );
    }

    #[test]
    fn test_validate_short_host() {
        let config = BridgeConfigBuilder::new().broker("ab", 1883).build();
        assert!(matches!(config.validate(), Err(BridgeError::InvalidConfig(_))));

        let config = BridgeConfigBuilder::new().broker("mqtt.local", 1883).build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BridgeConfigBuilder::new()
            .thing_name("bridge1")
            .broker("10.0.0.2", 1884)
            .device_address("AA:BB:CC:DD:EE:FF")
            .stay_connected(false)
            .link_cooldown(Duration::from_secs(5))
            .build();

        assert_eq!(config.thing_name, "bridge1");
        assert_eq!(config.broker.address(), "10.0.0.2:1884");
        assert_eq!(config.device.address, "AA:BB:CC:DD:EE:FF");
        assert!(!config.device.stay_connected);
        assert_eq!(config.reconnect.link_cooldown, Duration::from_secs(5));
    }

    #[test]
    fn test_deserialize_partial_json() {
        let raw = r#"{
            "broker": { "host": "mqtt.local", "username": "u" },
            "device": { "address": "aa:bb:cc:dd:ee:ff" },
            "reconnect": { "link_cooldown": "45s" }
        }"#;
        let config: BridgeConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.broker.port, DEFAULT_BROKER_PORT);
        assert_eq!(config.broker.keep_alive, Duration::from_secs(30));
        assert_eq!(config.reconnect.link_cooldown, Duration::from_secs(45));
        assert_eq!(config.reconnect.broker_cooldown, Duration::from_secs(1));
        assert!(config.device.stay_connected);
        assert_eq!(config.thing_name, DEFAULT_THING_NAME);
    }
}
