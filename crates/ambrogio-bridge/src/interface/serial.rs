//! Serial port link to the device
//!
//! For Bluetooth Classic SPP the kernel exposes the remote device as an
//! RFCOMM tty (`rfcomm bind /dev/rfcomm0 <address>`); USB adapters appear
//! as ordinary serial ports. Either way this link only moves bytes: a
//! reader task pushes every read chunk into a channel, and framing is left
//! to the bridge's frame splitter.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, trace, warn};

use crate::discovery::{DiscoverySink, HardwareAddress};
use crate::error::{BridgeError, Result};
use crate::interface::DeviceLink;

/// Buffer size for reading from serial port
const READ_BUFFER_SIZE: usize = 512;

/// Default baud rate for serial links
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default read timeout
const DEFAULT_TIMEOUT_MS: u64 = 10000;

/// Serial link to the device
pub struct SerialLink {
    /// Serial port path
    port_path: PathBuf,

    /// Baud rate
    baud_rate: u32,

    /// Read timeout
    timeout: Duration,

    /// Write half (when connected)
    writer: Option<WriteHalf<SerialStream>>,

    /// Chunks read by the reader task
    received_rx: Option<mpsc::UnboundedReceiver<Bytes>>,

    /// Reader task
    reader: Option<JoinHandle<()>>,

    /// Cleared by the reader task when the port goes away
    alive: Arc<AtomicBool>,

    /// Link name for logging
    name: String,
}

impl SerialLink {
    /// Create a new serial link
    pub fn new(port: impl AsRef<Path>) -> Self {
        let port_path = port.as_ref().to_path_buf();
        let name = format!("serial:{}", port_path.display());

        Self {
            port_path,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            writer: None,
            received_rx: None,
            reader: None,
            alive: Arc::new(AtomicBool::new(false)),
            name,
        }
    }

    /// Create with custom baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Create with custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the port path
    pub fn port_path(&self) -> &Path {
        &self.port_path
    }

    async fn read_loop(
        mut reader: ReadHalf<SerialStream>,
        alive: Arc<AtomicBool>,
        tx: mpsc::UnboundedSender<Bytes>,
    ) {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    // EOF - device went away
                    info!("Serial port closed by device");
                    break;
                }
                Ok(n) => {
                    trace!(bytes = n, "Read from serial port");
                    if tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    error!(error = %e, "Serial read error");
                    break;
                }
            }
        }
        alive.store(false, Ordering::SeqCst);
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer = None;
        self.received_rx = None;
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceLink for SerialLink {
    async fn connect(&mut self, address: HardwareAddress) -> Result<()> {
        self.close();
        info!(port = %self.port_path.display(), %address, baud = self.baud_rate, "Opening serial link");

        // Check if port exists
        if !self.port_path.exists() {
            return Err(BridgeError::DeviceNotFound(
                self.port_path.display().to_string(),
            ));
        }

        let stream = tokio_serial::new(self.port_path.to_string_lossy(), self.baud_rate)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| BridgeError::LinkConnectFailed {
                target: self.port_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();

        self.alive = Arc::new(AtomicBool::new(true));
        self.reader = Some(tokio::spawn(Self::read_loop(
            read_half,
            self.alive.clone(),
            tx,
        )));
        self.writer = Some(write_half);
        self.received_rx = Some(rx);

        info!(port = %self.port_path.display(), "Serial link open");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.close();
        info!(port = %self.port_path.display(), "Serial link closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some() && self.alive.load(Ordering::SeqCst)
    }

    fn poll_received(&mut self) -> Option<Bytes> {
        self.received_rx.as_mut()?.try_recv().ok()
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(BridgeError::Disconnected)?;

        debug!(size = data.len(), "Writing to serial link");
        if let Err(e) = writer.write_all(data).await {
            error!(error = %e, "Serial write error");
            self.alive.store(false, Ordering::SeqCst);
            return Err(BridgeError::WriteError(e.to_string()));
        }

        writer
            .flush()
            .await
            .map_err(|e| BridgeError::WriteError(format!("Flush failed: {}", e)))
    }

    fn start_discovery(&mut self, _budget: Duration, sink: DiscoverySink) -> Result<()> {
        // Serial "discovery" lists the ports an RFCOMM binding could use
        tokio::task::spawn_blocking(move || match serialport::available_ports() {
            Ok(ports) => {
                for port in ports {
                    let label = match &port.port_type {
                        serialport::SerialPortType::UsbPort(usb) => usb
                            .product
                            .clone()
                            .unwrap_or_else(|| format!("USB {:04X}:{:04X}", usb.vid, usb.pid)),
                        serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                        _ => String::new(),
                    };
                    sink.record(port.port_name, label);
                }
            }
            Err(e) => warn!(error = %e, "Could not enumerate serial ports"),
        });
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.port_path)
            .field("baud_rate", &self.baud_rate)
            .field("connected", &self.is_connected())
            .finish()
    }
}
