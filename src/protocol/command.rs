//! Commands written back to the scale.

use crate::error::{ScaleError, ScaleResult};
use std::fmt;

/// A command the host can send to the firmware.
///
/// Weights are always rendered with three decimals, the resolution the
/// firmware parses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    /// Zero the scale (`TARE`)
    Tare,
    /// Load a target weight in kilograms (`OBJ:12.000`)
    SetTarget(f64),
    /// Answer a calibration prompt with the known reference weight (`5.250`)
    ReferenceWeight(f64),
    /// Answer a calibration confirmation prompt (`ok`)
    Confirm,
}

impl DeviceCommand {
    /// Validated target command. Negative and non-finite weights are refused.
    pub fn set_target(kg: f64) -> ScaleResult<Self> {
        if !kg.is_finite() || kg < 0.0 {
            return Err(ScaleError::InvalidCommand(format!(
                "target weight must be a non-negative number, got {kg}"
            )));
        }
        Ok(Self::SetTarget(kg))
    }

    /// Bytes to write, including the terminator.
    pub fn to_wire(&self, terminator: &str) -> Vec<u8> {
        let mut wire = self.to_string();
        wire.push_str(terminator);
        wire.into_bytes()
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::Tare => f.write_str("TARE"),
            DeviceCommand::SetTarget(kg) => write!(f, "OBJ:{kg:.3}"),
            DeviceCommand::ReferenceWeight(kg) => write!(f, "{kg:.3}"),
            DeviceCommand::Confirm => f.write_str("ok"),
        }
    }
}
