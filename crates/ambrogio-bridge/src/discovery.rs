//! Hardware address resolution and the discovery log
//!
//! The operator enters the mower's address as text. A well-formed
//! `HH:HH:HH:HH:HH:HH` string becomes a [`HardwareAddress`]; anything else
//! asks for a discovery scan whose results are collected in a
//! [`DiscoveryLog`] so the operator can copy the right address into the
//! configuration. The scan never selects a device by itself.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

/// Text shown before any scan has run
const NO_SCAN_TEXT: &str =
    "No scan output. If there is a valid MAC address set, scanning will not occur.";

/// A 6-byte link-layer address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareAddress([u8; 6]);

impl HardwareAddress {
    /// Wrap raw bytes
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Address bytes in transmission order
    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for HardwareAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match resolve(s) {
            Resolution::Address(addr) => Ok(addr),
            Resolution::DiscoveryRequested => Err(BridgeError::InvalidAddress(s.to_string())),
            Resolution::ParseError(reason) => Err(BridgeError::InvalidAddress(reason)),
        }
    }
}

/// Outcome of resolving the configured address string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The string is a valid address
    Address(HardwareAddress),
    /// The string is readable text but not an address; scan for devices
    DiscoveryRequested,
    /// The matcher could not process the input at all
    ParseError(String),
}

/// Resolve a configured address string
///
/// Six colon-separated pairs of hex digits, either case, nothing else.
/// Empty, over-long or otherwise mismatching text requests discovery.
/// Text containing control characters cannot be matched at all and is a
/// [`Resolution::ParseError`].
pub fn resolve(raw: &str) -> Resolution {
    if raw.chars().any(char::is_control) {
        return Resolution::ParseError("address text contains control characters".to_string());
    }

    let mut bytes = [0u8; 6];
    let mut segments = raw.split(':');
    for slot in bytes.iter_mut() {
        match segments.next().and_then(parse_pair) {
            Some(value) => *slot = value,
            None => return Resolution::DiscoveryRequested,
        }
    }
    if segments.next().is_some() {
        return Resolution::DiscoveryRequested;
    }

    Resolution::Address(HardwareAddress(bytes))
}

fn parse_pair(segment: &str) -> Option<u8> {
    if segment.len() != 2 || !segment.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(segment, 16).ok()
}

/// A device reported by a discovery scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Address as reported by the link driver
    pub address: String,
    /// Advertised name, possibly empty
    pub name: String,
    /// When the device was seen
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LogInner {
    scan_started: Option<DateTime<Utc>>,
    devices: Vec<DiscoveredDevice>,
}

/// Append-only record of the most recent scan
///
/// Shared between the bridge loop, the link driver's scan task and the
/// status surface. Entries are only removed when a new scan begins.
// TODO: entries are unbounded while a scan keeps reporting; cap or dedupe by address
#[derive(Debug, Clone, Default)]
pub struct DiscoveryLog {
    inner: Arc<Mutex<LogInner>>,
}

impl DiscoveryLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the log for a new scan
    pub fn begin_scan(&self) {
        let mut inner = self.inner.lock();
        inner.scan_started = Some(Utc::now());
        inner.devices.clear();
        info!("Discovery scan started");
    }

    /// Handle for the driver to report results through
    pub fn sink(&self) -> DiscoverySink {
        DiscoverySink { log: self.clone() }
    }

    /// Snapshot of the devices found so far
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.inner.lock().devices.clone()
    }

    /// Number of devices found so far
    pub fn len(&self) -> usize {
        self.inner.lock().devices.len()
    }

    /// Whether no devices have been found
    pub fn is_empty(&self) -> bool {
        self.inner.lock().devices.is_empty()
    }

    /// Human-readable rendering, one device per line
    pub fn render(&self) -> String {
        let inner = self.inner.lock();
        let Some(started) = inner.scan_started else {
            return NO_SCAN_TEXT.to_string();
        };

        let mut out = format!("Scanning (started {})...\n", started.format("%H:%M:%S"));
        for device in &inner.devices {
            out.push_str(&device.address);
            out.push_str(" - ");
            out.push_str(&device.name);
            out.push('\n');
        }
        out
    }
}

/// Write side of a [`DiscoveryLog`], handed to the link driver
#[derive(Debug, Clone)]
pub struct DiscoverySink {
    log: DiscoveryLog,
}

impl DiscoverySink {
    /// Append one device
    pub fn record(&self, address: impl Into<String>, name: impl Into<String>) {
        let device = DiscoveredDevice {
            address: address.into(),
            name: name.into(),
            seen_at: Utc::now(),
        };
        debug!(address = %device.address, name = %device.name, "Device discovered");
        self.log.inner.lock().devices.push(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_valid_upper() {
        assert_eq!(
            resolve("AA:BB:CC:DD:EE:FF"),
            Resolution::Address(HardwareAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]))
        );
    }

    #[test]
    fn test_resolve_valid_mixed_case() {
        assert_eq!(
            resolve("0a:1B:2c:3D:4e:5F"),
            Resolution::Address(HardwareAddress::new([0x0A, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F]))
        );
    }

    #[test]
    fn test_resolve_requests_discovery() {
        for raw in [
            "not-a-mac",
            "",
            "AA:BB:CC:DD:EE",
            "AA-BB-CC-DD-EE-FF",
            "AA:BB:CC:DD:EE:GG",
            "A:BB:CC:DD:EE:FFF",
            "AA:BB:CC:DD:EE:F",
            "AA:BB:CC:DD::EEF",
            "+A:BB:CC:DD:EE:FF",
            "AA:BB:CC:DD:EE:FF ",
            "AA:BB:CC:DD:EE:FF:00",
            "Ambrogio mower in the garden",
        ] {
            assert_eq!(resolve(raw), Resolution::DiscoveryRequested, "{raw:?}");
        }
    }

    #[test]
    fn test_resolve_parse_error() {
        assert!(matches!(resolve("AA:BB\n"), Resolution::ParseError(_)));
        assert!(matches!(
            resolve("AA:BB:CC:DD:EE:FF\0"),
            Resolution::ParseError(_)
        ));
    }

    #[test]
    fn test_address_display_roundtrip() {
        let addr: HardwareAddress = "de:ad:be:ef:00:01".parse().unwrap();
        assert_eq!(addr.to_string(), "DE:AD:BE:EF:00:01");
        assert_eq!(addr.bytes(), [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
        assert!("nope".parse::<HardwareAddress>().is_err());
    }

    #[test]
    fn test_discovery_log_lifecycle() {
        let log = DiscoveryLog::new();
        assert!(log.render().starts_with("No scan output"));

        log.begin_scan();
        let sink = log.sink();
        sink.record("11:22:33:44:55:66", "Ambrogio L60");
        sink.record("AA:AA:AA:AA:AA:AA", "");
        assert_eq!(log.len(), 2);

        let text = log.render();
        assert!(text.starts_with("Scanning"));
        assert!(text.contains("11:22:33:44:55:66 - Ambrogio L60"));

        log.begin_scan();
        assert!(log.is_empty());
    }

    #[test]
    fn test_sink_from_other_thread() {
        let log = DiscoveryLog::new();
        log.begin_scan();
        let sink = log.sink();
        std::thread::spawn(move || sink.record("01:02:03:04:05:06", "far"))
            .join()
            .unwrap();
        assert_eq!(log.devices()[0].name, "far");
    }
}
