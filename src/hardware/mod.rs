//! Transport layer: serial connectors and the in-memory mock scale.

pub mod mock;
pub mod serial;

pub use mock::{EmulatorConfig, MockConnector, MockScale};
pub use serial::{available_ports, Connector, DynSerial, PortInfo, SerialPortIO};

#[cfg(feature = "tokio_serial")]
pub use serial::{open_serial_async, SerialConnector};
