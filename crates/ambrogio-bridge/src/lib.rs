//! Bluetooth-serial to MQTT bridge for robotic mowers
//!
//! This crate bridges a mower's short-range serial link and an MQTT broker
//! reached over the local network, so a remote controller can send
//! commands to the mower and receive structured status updates from it.
//!
//! # Architecture
//!
//! The bridge operates in four layers:
//!
//! 1. **Transports** - the device link (serial/BLE), the broker client and
//!    the configuration portal, each behind a trait in [`interface`]
//! 2. **Supervision** - one [`TransportSupervisor`] per transport enforcing
//!    retry cooldowns and noticing silent drops
//! 3. **Translation** - [`FrameSplitter`] cuts the byte stream into frames,
//!    [`MessageTranslator`] maps decoder notifications to JSON and inbound
//!    commands to device actions
//! 4. **Scheduling** - [`BridgeLoop`] runs all of the above once per tick
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // Enable the `serial` feature to use SerialLink
//! // Cargo.toml: ambrogio-bridge = { version = "0.1", features = ["serial"] }
//!
//! use ambrogio_bridge::{BridgeConfig, BridgeLoop, MqttBroker, OpaqueProtocol, SerialLink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::load("ambrogio.json")?;
//!
//!     let broker = MqttBroker::new(&config.broker);
//!     let link = SerialLink::new("/dev/rfcomm0");
//!     let (bridge, _handle) = BridgeLoop::new(config, portal, broker, link, OpaqueProtocol);
//!
//!     bridge.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `serial` - Serial port link (requires `libudev-dev` on Linux)
//! - `ble` - Bluetooth Low Energy UART link (requires `btleplug`)
//! - `full` - Enable all links
//!
//! # Message Flow
//!
//! ## Device → broker
//!
//! 1. The link driver delivers a read chunk
//! 2. FrameSplitter emits every `0x03`-terminated frame in the chunk
//! 3. The device protocol decoder turns frames into notifications
//! 4. MessageTranslator serializes each one (at most 256 bytes)
//! 5. The document is published on `{prefix}/{thing}/state`
//!
//! ## Broker → device
//!
//! 1. `/serialin` payloads are written to the link byte for byte
//! 2. `/command` payloads `{"cmnd": "play"|"pause"|"home"}` become device
//!    actions encoded by the decoder
//!
//! # Topics
//!
//! | Suffix | Direction | Payload |
//! |--------|-----------|---------|
//! | `/serialin` | inbound | raw bytes |
//! | `/serialout` | outbound | raw frames (off by default) |
//! | `/command` | inbound | JSON command |
//! | `/state` | outbound | JSON state document |
//! | `/log` | outbound | plain-text diagnostics |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Core modules
pub mod config;
pub mod error;
pub mod interface;

// Bridge components
pub mod discovery;
pub mod frame;
pub mod protocol;
pub mod supervisor;
pub mod translator;

// Scheduling
pub mod bridge;

// Testing utilities
pub mod test_utils;

// Re-exports for convenience
pub use config::{
    BridgeConfig, BridgeConfigBuilder, BrokerConfig, Credentials, DeviceConfig, OutboundConfig,
    ReconnectConfig, Topics,
};
pub use error::{BridgeError, Result};
pub use interface::mqtt::MqttBroker;
pub use interface::{BrokerClient, ConfigPortal, DeviceLink, InboundMessage, PortalEvent};

#[cfg(feature = "serial")]
pub use interface::SerialLink;

#[cfg(feature = "ble")]
pub use interface::BleLink;

pub use bridge::{
    decide_link_action, BridgeExit, BridgeHandle, BridgeLoop, BridgeState, BridgeStats,
    LinkDecision, StatusReport, TickOutcome,
};
pub use discovery::{resolve, DiscoveredDevice, DiscoveryLog, DiscoverySink, HardwareAddress, Resolution};
pub use frame::{Frame, FrameSplitter};
pub use protocol::{DeviceAction, DeviceProtocol, Notification, OpaqueProtocol};
pub use supervisor::{TransportKind, TransportState, TransportSupervisor};
pub use translator::{InboundCommand, InboundRoute, MessageTranslator, OutboundMessage};

// Protocol constants re-exports
pub use config::{
    DEFAULT_BROKER_COOLDOWN_MS, DEFAULT_BROKER_PORT, DEFAULT_DISCOVERY_BUDGET_MS,
    DEFAULT_LINK_COOLDOWN_MS, FRAME_SENTINEL, MAX_STATE_PAYLOAD,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
