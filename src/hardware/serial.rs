//! Serial transport for the scale.
//!
//! The session only needs a bidirectional byte stream. Anything implementing
//! `AsyncRead + AsyncWrite + Unpin + Send` qualifies:
//! - `tokio_serial::SerialStream` (real hardware)
//! - `tokio::io::DuplexStream` (tests and the simulator)
//!
//! A [`Connector`] produces such a stream on demand so a session can be
//! reconnected without knowing where the bytes come from.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Trait alias for async serial port I/O.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Opens the byte stream a session reads from.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh connection to the device.
    async fn open(&self) -> anyhow::Result<DynSerial>;

    /// Human-readable description for logs, e.g. the port path.
    fn describe(&self) -> String;
}

/// Connector for a physical serial port (8N1, no flow control).
#[cfg(feature = "tokio_serial")]
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    baud_rate: u32,
}

#[cfg(feature = "tokio_serial")]
impl SerialConnector {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }

    /// Connector for the port and baud rate in the serial configuration.
    pub fn from_config(config: &crate::config::SerialConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate)
    }
}

#[cfg(feature = "tokio_serial")]
#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self) -> anyhow::Result<DynSerial> {
        let port = open_serial_async(&self.port, self.baud_rate, "scale").await?;
        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port, self.baud_rate)
    }
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
#[cfg(feature = "tokio_serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// A serial port visible to the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Path to pass as `serial.port`
    pub name: String,
    /// USB vendor/product or port type
    pub description: String,
}

/// Enumerate serial ports.
#[cfg(feature = "tokio_serial")]
pub fn available_ports() -> anyhow::Result<Vec<PortInfo>> {
    use anyhow::Context;
    use tokio_serial::SerialPortType;

    let ports = tokio_serial::available_ports().context("Failed to enumerate serial ports")?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: p.port_name,
                description: description.trim().to_string(),
            }
        })
        .collect())
}

/// Enumerate serial ports. Always empty without the `tokio_serial` feature.
#[cfg(not(feature = "tokio_serial"))]
pub fn available_ports() -> anyhow::Result<Vec<PortInfo>> {
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_dyn_serial_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut port: DynSerial = Box::new(device);

        host.write_all(b"HEARTBEAT\n").await.unwrap();

        let mut buf = [0u8; 10];
        port.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"HEARTBEAT\n");

        port.write_all(b"TARE\n").await.unwrap();
        let mut reply = [0u8; 5];
        host.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"TARE\n");
    }

    #[cfg(feature = "tokio_serial")]
    #[tokio::test]
    async fn test_open_missing_port_fails_with_context() {
        let connector = SerialConnector::new("/dev/does-not-exist-scale", 9600);
        let err = match connector.open().await {
            Ok(_) => panic!("opening a missing port should fail"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("/dev/does-not-exist-scale"));
        assert_eq!(connector.describe(), "/dev/does-not-exist-scale @ 9600 baud");
    }
}
