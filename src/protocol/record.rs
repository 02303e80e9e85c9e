//! Measurement records and their wire decoding.
//!
//! The firmware emits one JSON object per reading using Spanish field names:
//!
//! ```text
//! {"peso":12.340,"objetivo":12.000,"diferencia":0.340,"codigo_saco":"S-17","fabrica":"Norte","timestamp":81234}
//! ```
//!
//! Older builds print the delimited form `OBJ:<target>;ACT:<actual>;DIF:<difference>`.
//! Both decode into [`MeasurementRecord`], where every field except the current
//! weight is optional so that "absent" stays distinguishable from "zero".

use crate::error::{ScaleError, ScaleResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which wire format a record was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    /// The whole line was a JSON object
    Json,
    /// A JSON object embedded in surrounding text
    EmbeddedJson,
    /// `OBJ:..;ACT:..;DIF:..`
    Delimited,
}

/// One decoded reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Weight on the scale in kilograms
    pub current_weight: f64,
    /// Target weight configured on the device
    pub target_weight: Option<f64>,
    /// `current_weight - target_weight` as computed by the device
    pub difference: Option<f64>,
    /// Sack code loaded on the device, never the no-code sentinel
    pub sack_code: Option<String>,
    /// Factory label loaded on the device
    pub factory_label: Option<String>,
    /// Device uptime stamp, informational only
    pub device_timestamp: Option<f64>,
    /// Capture time, stamped by the sink when the record is accepted
    pub received_at: Option<DateTime<Utc>>,
    /// Wire format the record came from
    pub format: FrameFormat,
}

impl MeasurementRecord {
    /// Record carrying only a weight.
    pub fn with_weight(current_weight: f64, format: FrameFormat) -> Self {
        Self {
            current_weight,
            target_weight: None,
            difference: None,
            sack_code: None,
            factory_label: None,
            device_timestamp: None,
            received_at: None,
            format,
        }
    }
}

/// A JSON value the firmware may send as a number or as a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl WireValue {
    fn as_number(&self) -> Option<f64> {
        let value = match self {
            WireValue::Number(n) => *n,
            WireValue::Text(s) => s.trim().parse::<f64>().ok()?,
            WireValue::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }

    fn as_text(&self) -> Option<String> {
        let text = match self {
            WireValue::Text(s) => s.trim().to_string(),
            WireValue::Number(n) => n.to_string(),
            WireValue::Other(_) => return None,
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Device JSON record. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct WireRecord {
    #[serde(default)]
    peso: Option<WireValue>,
    #[serde(default)]
    objetivo: Option<WireValue>,
    #[serde(default)]
    diferencia: Option<WireValue>,
    #[serde(default)]
    codigo_saco: Option<WireValue>,
    #[serde(default)]
    fabrica: Option<WireValue>,
    #[serde(default)]
    timestamp: Option<WireValue>,
}

/// Decode a JSON object into a record.
///
/// A numeric `peso` is the minimum viable record. Optional fields that are
/// missing, null or non-numeric are reported as absent. A sack code equal to
/// `no_code_sentinel` is dropped.
pub fn decode_json(text: &str, no_code_sentinel: &str, format: FrameFormat) -> ScaleResult<MeasurementRecord> {
    let wire: WireRecord = serde_json::from_str(text)
        .map_err(|e| ScaleError::Decode(format!("invalid JSON: {e}")))?;

    let current_weight = wire
        .peso
        .as_ref()
        .and_then(WireValue::as_number)
        .ok_or_else(|| ScaleError::Decode("record has no numeric 'peso'".to_string()))?;

    let sack_code = wire
        .codigo_saco
        .as_ref()
        .and_then(WireValue::as_text)
        .filter(|code| code != no_code_sentinel);

    Ok(MeasurementRecord {
        current_weight,
        target_weight: wire.objetivo.as_ref().and_then(WireValue::as_number),
        difference: wire.diferencia.as_ref().and_then(WireValue::as_number),
        sack_code,
        factory_label: wire.fabrica.as_ref().and_then(WireValue::as_text),
        device_timestamp: wire.timestamp.as_ref().and_then(WireValue::as_number),
        received_at: None,
        format,
    })
}

/// Find the first brace-balanced object inside `line` that decodes as a record.
///
/// Braces inside JSON strings are skipped, so `{"fabrica":"a{b"}` balances.
pub fn decode_embedded_json(line: &str, no_code_sentinel: &str) -> ScaleResult<MeasurementRecord> {
    let mut last_error = None;
    for (start, _) in line.match_indices('{') {
        let Some(end) = balanced_end(&line[start..]) else {
            continue;
        };
        match decode_json(&line[start..start + end], no_code_sentinel, FrameFormat::EmbeddedJson) {
            Ok(record) => return Ok(record),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| ScaleError::Decode("no balanced object in line".to_string())))
}

/// Byte length of the balanced object starting at `text[0] == '{'`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

static DELIMITED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"OBJ:([-\d.]+);ACT:([-\d.]+);DIF:([-\d.]+)").expect("valid regex")
});

/// Decode `OBJ:<target>;ACT:<actual>;DIF:<difference>`. All three fields are required.
pub fn decode_delimited(line: &str) -> ScaleResult<MeasurementRecord> {
    let caps = DELIMITED
        .captures(line)
        .ok_or_else(|| ScaleError::Decode("not an OBJ/ACT/DIF frame".to_string()))?;

    let field = |idx: usize, name: &str| -> ScaleResult<f64> {
        caps.get(idx)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .ok_or_else(|| ScaleError::Decode(format!("{name} is not a number")))
    };

    let target = field(1, "OBJ")?;
    let actual = field(2, "ACT")?;
    let difference = field(3, "DIF")?;

    Ok(MeasurementRecord {
        target_weight: Some(target),
        difference: Some(difference),
        ..MeasurementRecord::with_weight(actual, FrameFormat::Delimited)
    })
}
