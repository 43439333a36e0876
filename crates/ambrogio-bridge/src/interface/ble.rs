//! Bluetooth Low Energy link to the device
//!
//! Talks to a device exposing a Nordic-UART style GATT service: bytes for
//! the device are written to the RX characteristic, bytes from the device
//! arrive as notifications on the TX characteristic.
//!
//! # Requirements
//!
//! Enable the `ble` feature in Cargo.toml to use this link.
//!
//! On Linux, you'll also need:
//! ```bash
//! apt install libdbus-1-dev
//! ```

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::discovery::{DiscoverySink, HardwareAddress};
use crate::error::{BridgeError, Result};
use crate::interface::DeviceLink;

/// UART service RX characteristic (host → device)
pub const UART_RX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

/// UART service TX characteristic (device → host)
pub const UART_TX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

/// Largest write that fits the default ATT MTU
const WRITE_CHUNK: usize = 20;

/// How long to look for the target before giving up on a connect
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// BLE link to the device
pub struct BleLink {
    adapter_index: usize,
    connect_timeout: Duration,
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    rx_char: Option<Characteristic>,
    received_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    listener: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    name: String,
}

impl BleLink {
    /// Create a link on the given host adapter (0 for the first)
    pub fn new(adapter_index: usize) -> Self {
        Self {
            adapter_index,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            adapter: None,
            peripheral: None,
            rx_char: None,
            received_rx: None,
            listener: None,
            alive: Arc::new(AtomicBool::new(false)),
            name: format!("ble:hci{}", adapter_index),
        }
    }

    /// Create with custom connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn adapter(&mut self) -> Result<Adapter> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let adapter = open_adapter(self.adapter_index).await?;
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    async fn find_peripheral(adapter: &Adapter, target: BDAddr) -> Result<Peripheral> {
        loop {
            for peripheral in adapter.peripherals().await? {
                if peripheral.address() == target {
                    return Ok(peripheral);
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.rx_char = None;
        self.received_rx = None;
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// GATT state of a connected peripheral, ready for the listener task
struct UartSession {
    rx_char: Characteristic,
    notifications: Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
    events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
}

/// Find the UART characteristics and subscribe to device output
async fn open_uart(
    adapter: &Adapter,
    peripheral: &Peripheral,
    address: HardwareAddress,
) -> Result<UartSession> {
    peripheral.discover_services().await?;

    let characteristics = peripheral.characteristics();
    let missing = |uuid: Uuid| BridgeError::LinkConnectFailed {
        target: address.to_string(),
        reason: format!("characteristic {} not offered", uuid),
    };
    let rx_char = characteristics
        .iter()
        .find(|c| c.uuid == UART_RX_CHARACTERISTIC)
        .cloned()
        .ok_or_else(|| missing(UART_RX_CHARACTERISTIC))?;
    let tx_char = characteristics
        .iter()
        .find(|c| c.uuid == UART_TX_CHARACTERISTIC)
        .cloned()
        .ok_or_else(|| missing(UART_TX_CHARACTERISTIC))?;

    peripheral.subscribe(&tx_char).await?;
    let notifications = peripheral.notifications().await?;
    let events = adapter.events().await?;

    Ok(UartSession {
        rx_char,
        notifications,
        events,
    })
}

/// Await `setup`; if it fails, run `release` before returning the setup error
///
/// A connected peripheral that is not kept must be disconnected, otherwise
/// the host stack holds the connection open.
async fn release_on_failure<T, S, R>(setup: S, release: R) -> Result<T>
where
    S: Future<Output = Result<T>>,
    R: Future<Output = Result<()>>,
{
    match setup.await {
        Ok(value) => Ok(value),
        Err(e) => {
            if let Err(release_err) = release.await {
                warn!(error = %release_err, "Releasing half-open BLE connection failed");
            }
            Err(e)
        }
    }
}

async fn open_adapter(index: usize) -> Result<Adapter> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .nth(index)
        .ok_or_else(|| BridgeError::DeviceNotFound(format!("bluetooth adapter {}", index)))
}

async fn scan(index: usize, budget: Duration, sink: DiscoverySink) -> Result<()> {
    let adapter = open_adapter(index).await?;
    let mut events = adapter.events().await?;
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| BridgeError::DiscoveryFailed(e.to_string()))?;

    let deadline = tokio::time::sleep(budget);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => match event {
                Some(CentralEvent::DeviceDiscovered(id)) => {
                    let Ok(peripheral) = adapter.peripheral(&id).await else {
                        continue;
                    };
                    let name = peripheral
                        .properties()
                        .await
                        .ok()
                        .flatten()
                        .and_then(|props| props.local_name)
                        .unwrap_or_default();
                    sink.record(peripheral.address().to_string(), name);
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    adapter.stop_scan().await?;
    info!("Discovery scan finished");
    Ok(())
}

#[async_trait]
impl DeviceLink for BleLink {
    async fn connect(&mut self, address: HardwareAddress) -> Result<()> {
        self.close();
        let adapter = self.adapter().await?;
        let target = BDAddr::from(address.bytes());
        info!(%address, "Connecting BLE link");

        adapter.start_scan(ScanFilter::default()).await?;
        let found =
            tokio::time::timeout(self.connect_timeout, Self::find_peripheral(&adapter, target))
                .await;
        if let Err(e) = adapter.stop_scan().await {
            debug!(error = %e, "Stopping scan failed");
        }
        let peripheral = found.map_err(|_| BridgeError::ConnectionTimeout {
            duration_ms: self.connect_timeout.as_millis() as u64,
        })??;

        peripheral.connect().await?;
        let UartSession {
            rx_char,
            mut notifications,
            mut events,
        } = release_on_failure(open_uart(&adapter, &peripheral, address), async {
            peripheral.disconnect().await.map_err(BridgeError::from)
        })
        .await?;
        let peripheral_id = peripheral.id();

        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let task_alive = alive.clone();

        self.listener = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = notifications.next() => match notification {
                        Some(n) if n.uuid == UART_TX_CHARACTERISTIC => {
                            trace!(bytes = n.value.len(), "BLE notification");
                            if tx.send(Bytes::from(n.value)).is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => break,
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            task_alive.store(false, Ordering::SeqCst);
        }));

        self.alive = alive;
        self.rx_char = Some(rx_char);
        self.received_rx = Some(rx);
        self.peripheral = Some(peripheral);

        info!(%address, "BLE link connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.close();
        if let Some(peripheral) = self.peripheral.take() {
            peripheral.disconnect().await?;
        }
        info!("BLE link disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.rx_char.is_some() && self.alive.load(Ordering::SeqCst)
    }

    fn poll_received(&mut self) -> Option<Bytes> {
        self.received_rx.as_mut()?.try_recv().ok()
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let (Some(peripheral), Some(rx_char)) = (&self.peripheral, &self.rx_char) else {
            return Err(BridgeError::Disconnected);
        };

        debug!(size = data.len(), "Writing to BLE link");
        for chunk in data.chunks(WRITE_CHUNK) {
            peripheral
                .write(rx_char, chunk, WriteType::WithoutResponse)
                .await
                .map_err(|e| BridgeError::WriteError(e.to_string()))?;
        }
        Ok(())
    }

    fn start_discovery(&mut self, budget: Duration, sink: DiscoverySink) -> Result<()> {
        let index = self.adapter_index;
        tokio::spawn(async move {
            if let Err(e) = scan(index, budget, sink).await {
                warn!(error = %e, "Discovery scan failed");
            }
        });
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_starts_disconnected() {
        let mut link = BleLink::new(0);
        assert!(!link.is_connected());
        assert!(link.poll_received().is_none());
        assert_eq!(link.name(), "ble:hci0");
    }

    #[test]
    fn test_uart_uuids() {
        assert_eq!(
            UART_RX_CHARACTERISTIC.to_string(),
            "6e400002-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            UART_TX_CHARACTERISTIC.to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }

    #[tokio::test]
    async fn test_failed_setup_releases_connection() {
        let released = AtomicBool::new(false);
        let result: Result<()> = release_on_failure(
            async {
                Err(BridgeError::LinkConnectFailed {
                    target: "AA:BB:CC:DD:EE:FF".to_string(),
                    reason: "characteristic not offered".to_string(),
                })
            },
            async {
                released.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(BridgeError::LinkConnectFailed { .. })));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_successful_setup_keeps_connection() {
        let released = AtomicBool::new(false);
        let result = release_on_failure(async { Ok(7u8) }, async {
            released.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert!(!released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_release_error_keeps_setup_error() {
        let result: Result<()> = release_on_failure(
            async { Err(BridgeError::Disconnected) },
            async { Err(BridgeError::Internal("adapter gone".to_string())) },
        )
        .await;
        assert!(matches!(result, Err(BridgeError::Disconnected)));
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let mut link = BleLink::new(0);
        assert!(matches!(
            link.write(b"x").await,
            Err(BridgeError::Disconnected)
        ));
    }
}
