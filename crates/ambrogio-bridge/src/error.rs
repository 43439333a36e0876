//! Error types for bridge operations
//!
//! Transport failures, malformed inbound documents and configuration
//! problems all surface as [`BridgeError`]. The bridge loop handles every
//! error where it is detected; the type exists so drivers and helpers can
//! report *what* went wrong in a uniform way for logging.

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Short-range Link Errors =====
    /// Link device (serial port, BLE adapter) not found
    #[error("Link device not found: {0}")]
    DeviceNotFound(String),

    /// Opening the link failed
    #[error("Failed to connect link to {target}: {reason}")]
    LinkConnectFailed {
        /// Address or port that was targeted
        target: String,
        /// Failure reason
        reason: String,
    },

    /// Link write error
    #[error("Link write error: {0}")]
    WriteError(String),

    /// Link is not connected
    #[error("Link disconnected")]
    Disconnected,

    /// Connection timeout
    #[error("Connection timeout after {duration_ms}ms")]
    ConnectionTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Discovery scan could not be started
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    // ===== Broker Errors =====
    /// Broker connection failed
    #[error("Broker connection failed: {0}")]
    BrokerConnectFailed(String),

    /// Broker is not connected
    #[error("Broker not connected")]
    BrokerDisconnected,

    /// Publish could not be queued
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed {
        /// Destination topic
        topic: String,
        /// Failure reason
        reason: String,
    },

    /// Subscribe could not be queued
    #[error("Subscribe to {topic} failed: {reason}")]
    SubscribeFailed {
        /// Topic filter
        topic: String,
        /// Failure reason
        reason: String,
    },

    // ===== Translation Errors =====
    /// Serialized document exceeds the outbound buffer bound
    #[error("Payload too large: {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge {
        /// Actual serialized size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Inbound command document could not be parsed
    #[error("Invalid command document: {0}")]
    InvalidCommand(String),

    /// Hardware address string could not be processed
    #[error("Invalid hardware address: {0}")]
    InvalidAddress(String),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ===== General Errors =====
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Check if this error is transient and cleared by a later retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionTimeout { .. }
                | BridgeError::Disconnected
                | BridgeError::LinkConnectFailed { .. }
                | BridgeError::WriteError(_)
                | BridgeError::BrokerConnectFailed(_)
                | BridgeError::BrokerDisconnected
        )
    }

    /// Check if this is a protocol error (bad data from a peer)
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidCommand(_)
                | BridgeError::InvalidAddress(_)
                | BridgeError::PayloadTooLarge { .. }
                | BridgeError::Json(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            BridgeError::LinkConnectFailed { .. } => "LINK_CONNECT_FAILED",
            BridgeError::WriteError(_) => "WRITE_ERROR",
            BridgeError::Disconnected => "DISCONNECTED",
            BridgeError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            BridgeError::DiscoveryFailed(_) => "DISCOVERY_FAILED",
            BridgeError::BrokerConnectFailed(_) => "BROKER_CONNECT_FAILED",
            BridgeError::BrokerDisconnected => "BROKER_DISCONNECTED",
            BridgeError::PublishFailed { .. } => "PUBLISH_FAILED",
            BridgeError::SubscribeFailed { .. } => "SUBSCRIBE_FAILED",
            BridgeError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            BridgeError::InvalidCommand(_) => "INVALID_COMMAND",
            BridgeError::InvalidAddress(_) => "INVALID_ADDRESS",
            BridgeError::Json(_) => "JSON_ERROR",
            BridgeError::InvalidConfig(_) => "INVALID_CONFIG",
            BridgeError::MissingConfig(_) => "MISSING_CONFIG",
            BridgeError::Internal(_) => "INTERNAL_ERROR",
            BridgeError::ChannelClosed => "CHANNEL_CLOSED",
            BridgeError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

// Conversion from rumqttc request errors (publish/subscribe queueing)
impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::BrokerConnectFailed(err.to_string())
    }
}

// Conversion from serialport error (only when serial feature is enabled)
#[cfg(feature = "serial")]
impl From<serialport::Error> for BridgeError {
    fn from(err: serialport::Error) -> Self {
        match err.kind {
            serialport::ErrorKind::NoDevice => BridgeError::DeviceNotFound(err.description),
            serialport::ErrorKind::Io(kind) => {
                BridgeError::Io(std::io::Error::new(kind, err.description))
            }
            _ => BridgeError::LinkConnectFailed {
                target: String::new(),
                reason: err.description,
            },
        }
    }
}

// Conversion from btleplug error (only when ble feature is enabled)
#[cfg(feature = "ble")]
impl From<btleplug::Error> for BridgeError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::DeviceNotFound => BridgeError::DeviceNotFound(err.to_string()),
            btleplug::Error::NotConnected => BridgeError::Disconnected,
            btleplug::Error::TimedOut(duration) => BridgeError::ConnectionTimeout {
                duration_ms: duration.as_millis() as u64,
            },
            other => BridgeError::Internal(other.to_string()),
        }
    }
}

// Conversion from tokio mpsc send error
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BridgeError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BridgeError::ChannelClosed
    }
}
