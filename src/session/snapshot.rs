//! Published session state.

use crate::calibration::CalibrationState;
use crate::measurement::{ChartPoint, MeasurementSink, ToleranceVerdict};
use crate::protocol::MeasurementRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state shown to the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No session loop is running
    #[default]
    Disconnected,
    /// The transport is being opened
    Connecting,
    /// The session loop is reading from the device
    Connected,
    /// The session ended on a transport failure
    Error(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
            ConnectionStatus::Connecting => f.write_str("connecting"),
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Point-in-time copy of everything the operator sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub calibration: CalibrationState,
    pub current_weight: f64,
    pub target_weight: Option<f64>,
    pub difference: Option<f64>,
    pub verdict: ToleranceVerdict,
    /// Last sack code reported by the device
    pub device_sack_code: Option<String>,
    /// Last factory label reported by the device
    pub device_factory_label: Option<String>,
    /// Operator-facing sack code
    pub sack_code: String,
    /// Operator-selected factory
    pub factory_id: Option<String>,
    pub last_received_at: Option<DateTime<Utc>>,
    /// A record arrived within the freshness window
    pub data_fresh: bool,
    /// Records accepted since the session was created
    pub measurements: u64,
    /// Chart points, oldest first
    pub history: Vec<ChartPoint>,
}

impl SessionSnapshot {
    pub(crate) fn capture(
        status: ConnectionStatus,
        calibration: CalibrationState,
        sink: &MeasurementSink,
    ) -> Self {
        Self {
            status,
            calibration,
            current_weight: sink.current_weight(),
            target_weight: sink.target_weight(),
            difference: sink.difference(),
            verdict: sink.verdict(),
            device_sack_code: sink.device_sack_code().map(str::to_string),
            device_factory_label: sink.device_factory_label().map(str::to_string),
            sack_code: sink.sack_code().to_string(),
            factory_id: sink.factory_id().map(str::to_string),
            last_received_at: sink.last_received_at(),
            data_fresh: sink.is_fresh(),
            measurements: sink.accepted(),
            history: sink.history().to_vec(),
        }
    }
}

/// Everything the session observed, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A record was accepted by the sink
    Measurement(MeasurementRecord),
    /// The device sent an informational line
    Heartbeat,
    /// The calibration state changed
    Calibration(CalibrationState),
    /// The connection status changed
    Status(ConnectionStatus),
    /// A line was classified as noise
    Noise(String),
}
