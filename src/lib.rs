//! # Scale DAQ Core Library
//!
//! Reads a serial weighing scale: turns its byte stream into lines, classifies
//! each line, follows the firmware's interactive calibration handshake, and
//! keeps the current reading with a bounded chart history and a tolerance
//! verdict. Confirmed weighings are handed to a record store.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: The device line protocol. `LineFramer` turns chunks into
//!   lines, `LineClassifier` decides what each line is, `DeviceCommand`
//!   encodes what the host sends back. Phrase tables are configuration.
//! - **`calibration`**: `CalibrationMachine`, the host-side view of the
//!   calibration dialogue.
//! - **`measurement`**: `MeasurementSink` folds records into the current
//!   reading; `ChartHistory` and `ToleranceRule` live here too.
//! - **`hardware`**: The transport boundary (`Connector`, `DynSerial`), the
//!   tokio-serial connector and the in-memory `MockScale`.
//! - **`session`**: `ScaleSession`, which owns one session loop per connection
//!   and publishes snapshots and events.
//! - **`storage`**: The `RecordStore` persistence boundary, `MemoryStore`, the
//!   `sacos` record and the CSV backup.
//! - **`config`**: Figment-based configuration (`config/scale_daq.toml` plus
//!   `SCALE_DAQ_` environment variables).
//! - **`tracing_setup`**: `tracing-subscriber` initialization.
//! - **`error`**: The crate-wide `ScaleError`.

pub mod calibration;
pub mod config;
pub mod error;
pub mod hardware;
pub mod measurement;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod tracing_setup;

pub use calibration::{CalibrationKind, CalibrationMachine, CalibrationState};
pub use config::ScaleConfig;
pub use error::{ScaleError, ScaleResult};
pub use session::{ConnectionStatus, ScaleSession, SessionEvent, SessionSnapshot};
