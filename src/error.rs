//! Custom error types for the scale reader.
//!
//! This module defines the primary error type, `ScaleError`, for the whole crate.
//! Using the `thiserror` crate, it gives a single place to describe every way the
//! weighing pipeline can fail, from a malformed device line to a dead serial port.
//!
//! ## Error Hierarchy
//!
//! - **`Decode`**: A line matched no known device format. The classifier recovers
//!   these locally and reports the line as noise, so this variant never leaves the
//!   protocol layer in normal operation.
//! - **`InvalidCalibrationInput`** / **`InvalidState`**: Rejected calibration
//!   submissions. The state machine is left exactly as it was.
//! - **`InvalidCommand`**: A tare/target request with an unusable value.
//! - **`Transport`**: A read or write failure that was not caused by an explicit
//!   disconnect. The session loop exits and the connection status becomes
//!   `Error`.
//! - **`TransportClosed`**: The operator disconnected. The status moves cleanly
//!   to `Disconnected`; device commands issued afterwards get this variant.
//! - **`NotConnected`**: A device command with no session loop for any other
//!   reason (never connected, the device closed the link, or a failure).
//! - **`Config`** / **`Configuration`**: Figment extraction failures and semantic
//!   validation failures respectively.
//!
//! By using `#[from]`, `ScaleError` can be created from the underlying error types,
//! so the `?` operator works across the crate.

use crate::calibration::CalibrationKind;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ScaleResult<T> = std::result::Result<T, ScaleError>;

/// Every failure the weighing pipeline can report.
#[derive(Error, Debug)]
pub enum ScaleError {
    #[error("Unrecognized device line: {0}")]
    Decode(String),

    #[error("Invalid calibration input: {0}")]
    InvalidCalibrationInput(String),

    #[error("Calibration is not awaiting {expected}")]
    InvalidState {
        /// Which prompt the rejected submission answers.
        expected: CalibrationKind,
    },

    #[error("Invalid device command: {0}")]
    InvalidCommand(String),

    #[error("Transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Scale session is not connected")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Weighing cannot be saved: {0}")]
    SaveRejected(String),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<figment::Error> for ScaleError {
    fn from(value: figment::Error) -> Self {
        ScaleError::Config(Box::new(value))
    }
}
