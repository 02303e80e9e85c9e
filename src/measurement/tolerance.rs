//! Tolerance rules and the derived verdict.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How far from the target a reading may be and still count as OK.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ToleranceRule {
    /// `|difference| <= kg`
    Absolute {
        /// Allowed deviation in kilograms
        kg: f64,
    },
    /// `|difference| / target <= fraction`
    Relative {
        /// Allowed deviation as a fraction of the target (0.03 = 3%)
        fraction: f64,
    },
}

impl Default for ToleranceRule {
    fn default() -> Self {
        ToleranceRule::Absolute { kg: 0.005 }
    }
}

impl ToleranceRule {
    /// Reject bounds that can never be satisfied.
    pub fn validate(&self) -> Result<(), String> {
        let (name, value) = match self {
            ToleranceRule::Absolute { kg } => ("measurement.tolerance.kg", *kg),
            ToleranceRule::Relative { fraction } => ("measurement.tolerance.fraction", *fraction),
        };
        if !value.is_finite() || value <= 0.0 {
            return Err(format!("{name} must be a positive number, got {value}"));
        }
        Ok(())
    }

    /// Verdict for a reading.
    ///
    /// Without a positive target there is nothing to compare against and the
    /// verdict is `Normal`. When the device has not reported a difference it is
    /// derived from the current weight.
    pub fn verdict(&self, current: f64, target: Option<f64>, difference: Option<f64>) -> ToleranceVerdict {
        let Some(target) = target.filter(|t| *t > 0.0) else {
            return ToleranceVerdict::Normal;
        };
        let deviation = effective_difference(current, Some(target), difference)
            .unwrap_or(current - target)
            .abs();
        let within = match self {
            ToleranceRule::Absolute { kg } => deviation <= *kg,
            ToleranceRule::Relative { fraction } => deviation / target <= *fraction,
        };
        if within {
            ToleranceVerdict::Ok
        } else {
            ToleranceVerdict::OutOfRange
        }
    }
}

/// The difference a verdict is judged on: the device's own when it sent one,
/// otherwise `current - target` for a positive target.
pub fn effective_difference(current: f64, target: Option<f64>, difference: Option<f64>) -> Option<f64> {
    difference.or_else(|| target.filter(|t| *t > 0.0).map(|t| current - t))
}

/// Derived classification of the current reading against the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToleranceVerdict {
    /// No target set
    Normal,
    /// Within tolerance
    Ok,
    /// Outside tolerance
    OutOfRange,
}

impl ToleranceVerdict {
    /// Value stored in the `estado` column of a saved weighing.
    pub fn estado(&self) -> &'static str {
        match self {
            ToleranceVerdict::Normal | ToleranceVerdict::Ok => "OK",
            ToleranceVerdict::OutOfRange => "FUERA_RANGO",
        }
    }
}

impl fmt::Display for ToleranceVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToleranceVerdict::Normal => "NORMAL",
            ToleranceVerdict::Ok => "OK",
            ToleranceVerdict::OutOfRange => "OUT_OF_RANGE",
        })
    }
}
