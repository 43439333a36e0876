//! Per-transport reconnection supervision
//!
//! Each unreliable transport (broker, short-range link) gets a
//! [`TransportSupervisor`] that tracks what the bridge believes about the
//! connection and enforces a minimum interval between attempts. The
//! timestamp of an attempt is stored whether or not it succeeds, so a
//! failing peer is retried at a fixed rate indefinitely.
//!
//! The short-range link can drop without telling anyone. The bridge loop
//! compares the supervisor's belief with the driver's live status every
//! tick and reports the difference through
//! [`TransportSupervisor::on_external_disconnect_observed`].

use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Which transport a supervisor is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Local IP network
    Network,
    /// MQTT broker
    Broker,
    /// Short-range serial link to the device
    Link,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Network => write!(f, "network"),
            TransportKind::Broker => write!(f, "broker"),
            TransportKind::Link => write!(f, "link"),
        }
    }
}

/// Believed state of one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Not connected
    Disconnected,
    /// An attempt is in flight
    ConnectPending,
    /// Connected as of the last observation
    Connected,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Disconnected => write!(f, "disconnected"),
            TransportState::ConnectPending => write!(f, "connect-pending"),
            TransportState::Connected => write!(f, "connected"),
        }
    }
}

/// Reconnection state machine for one transport
#[derive(Debug, Clone)]
pub struct TransportSupervisor {
    kind: TransportKind,
    state: TransportState,
    cooldown: Duration,
    last_attempt: Option<Instant>,
    attempts: u64,
}

impl TransportSupervisor {
    /// Create a supervisor with the given minimum attempt interval
    pub fn new(kind: TransportKind, cooldown: Duration) -> Self {
        Self {
            kind,
            state: TransportState::Disconnected,
            cooldown,
            last_attempt: None,
            attempts: 0,
        }
    }

    /// Transport this supervisor watches
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Current believed state
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Whether the transport is believed connected
    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    /// Start time of the most recent attempt
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Number of attempts made since creation
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Minimum interval between attempts
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether a new attempt may start at `now`
    ///
    /// False while connected, while an attempt is in flight, and until the
    /// cooldown has fully elapsed since the previous attempt started.
    pub fn should_attempt_connect(&self, now: Instant) -> bool {
        if self.state != TransportState::Disconnected {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
        }
    }

    /// Record that an attempt started at `now`
    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
        self.attempts += 1;
        self.state = TransportState::ConnectPending;
        trace!(transport = %self.kind, attempt = self.attempts, "Connect attempt started");
    }

    /// Record the outcome of the attempt in flight
    pub fn record_result(&mut self, connected: bool) {
        self.state = if connected {
            TransportState::Connected
        } else {
            TransportState::Disconnected
        };
        debug!(transport = %self.kind, state = %self.state, "Connect attempt finished");
    }

    /// Reflect a live status check; true if a drop was detected
    pub fn on_external_disconnect_observed(&mut self) -> bool {
        if self.state == TransportState::Connected {
            self.state = TransportState::Disconnected;
            debug!(transport = %self.kind, "Transport dropped");
            true
        } else {
            false
        }
    }

    /// Record a connection that came up without an attempt of ours
    pub fn mark_connected(&mut self) {
        self.state = TransportState::Connected;
    }

    /// Record an explicit disconnect; not subject to cooldown
    pub fn mark_disconnected(&mut self) {
        self.state = TransportState::Disconnected;
    }
}
