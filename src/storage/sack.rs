//! The `sacos` record written by confirm-and-save.

use crate::error::{ScaleError, ScaleResult};
use crate::measurement::effective_difference;
use crate::session::SessionSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One confirmed sack weighing, with the column names of the `sacos` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SackWeighing {
    /// Sack code
    #[serde(rename = "codigo")]
    pub code: String,
    /// Factory the sack belongs to
    #[serde(rename = "fabrica_id")]
    pub factory_id: String,
    /// Target weight in kg, 0 when none was set
    #[serde(rename = "peso_objetivo")]
    pub target_weight: f64,
    /// Measured weight in kg
    #[serde(rename = "peso_real")]
    pub actual_weight: f64,
    /// Measured minus target in kg: the device's value, or derived from the
    /// weights when it sent none. 0 when no target was set.
    #[serde(rename = "diferencia")]
    pub difference: f64,
    /// `OK` or `FUERA_RANGO`
    #[serde(rename = "estado")]
    pub status: String,
    /// When the weighing was confirmed
    #[serde(rename = "fecha_pesaje")]
    pub weighed_at: DateTime<Utc>,
}

impl SackWeighing {
    /// Package the operator-visible state into a record.
    ///
    /// Rejected unless a factory is selected, the sack code is non-empty and
    /// the scale shows a positive weight.
    pub fn from_snapshot(snapshot: &SessionSnapshot, weighed_at: DateTime<Utc>) -> ScaleResult<Self> {
        let factory_id = snapshot
            .factory_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ScaleError::SaveRejected("no factory selected".to_string()))?;

        let code = snapshot.sack_code.trim();
        if code.is_empty() {
            return Err(ScaleError::SaveRejected("sack code is empty".to_string()));
        }

        if snapshot.current_weight.is_nan() || snapshot.current_weight <= 0.0 {
            return Err(ScaleError::SaveRejected(format!(
                "weight must be greater than zero, scale shows {:.3} kg",
                snapshot.current_weight
            )));
        }

        Ok(Self {
            code: code.to_string(),
            factory_id: factory_id.to_string(),
            target_weight: snapshot.target_weight.unwrap_or(0.0),
            actual_weight: snapshot.current_weight,
            difference: effective_difference(
                snapshot.current_weight,
                snapshot.target_weight,
                snapshot.difference,
            )
            .unwrap_or(0.0),
            status: snapshot.verdict.estado().to_string(),
            weighed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationState;
    use crate::measurement::MeasurementSink;
    use crate::protocol::{FrameFormat, MeasurementRecord};
    use crate::session::ConnectionStatus;

    fn snapshot_with(weight: f64, target: Option<f64>, difference: Option<f64>) -> SessionSnapshot {
        let mut sink = MeasurementSink::default();
        sink.accept(MeasurementRecord {
            target_weight: target,
            difference,
            ..MeasurementRecord::with_weight(weight, FrameFormat::Json)
        });
        sink.set_sack_code("S-9");
        sink.select_factory(Some("F-2".to_string()));
        SessionSnapshot::capture(ConnectionStatus::Connected, CalibrationState::Idle, &sink)
    }

    #[test]
    fn packages_snapshot() {
        let at = Utc::now();
        let weighing = SackWeighing::from_snapshot(&snapshot_with(12.34, Some(12.0), Some(0.34)), at).unwrap();
        assert_eq!(weighing.code, "S-9");
        assert_eq!(weighing.factory_id, "F-2");
        assert_eq!(weighing.target_weight, 12.0);
        assert_eq!(weighing.status, "FUERA_RANGO");
        assert_eq!(weighing.weighed_at, at);

        let value = serde_json::to_value(&weighing).unwrap();
        for column in ["codigo", "fabrica_id", "peso_objetivo", "peso_real", "diferencia", "estado", "fecha_pesaje"] {
            assert!(value.get(column).is_some(), "missing column {column}");
        }
    }

    #[test]
    fn no_target_saves_as_ok() {
        let weighing = SackWeighing::from_snapshot(&snapshot_with(3.0, None, None), Utc::now()).unwrap();
        assert_eq!(weighing.status, "OK");
        assert_eq!(weighing.target_weight, 0.0);
        assert_eq!(weighing.difference, 0.0);
    }

    #[test]
    fn missing_device_difference_is_derived_like_the_verdict() {
        let weighing =
            SackWeighing::from_snapshot(&snapshot_with(12.5, Some(12.0), None), Utc::now()).unwrap();
        assert_eq!(weighing.difference, 0.5);
        assert_eq!(weighing.status, "FUERA_RANGO");

        let weighing =
            SackWeighing::from_snapshot(&snapshot_with(12.003, Some(12.0), None), Utc::now()).unwrap();
        assert!((weighing.difference - 0.003).abs() < 1e-9);
        assert_eq!(weighing.status, "OK");
    }

    #[test]
    fn validation_failures() {
        let mut snapshot = snapshot_with(3.0, None, None);
        snapshot.factory_id = None;
        assert!(matches!(
            SackWeighing::from_snapshot(&snapshot, Utc::now()),
            Err(ScaleError::SaveRejected(_))
        ));

        let mut snapshot = snapshot_with(3.0, None, None);
        snapshot.sack_code = "   ".to_string();
        assert!(SackWeighing::from_snapshot(&snapshot, Utc::now()).is_err());

        let snapshot = snapshot_with(0.0, None, None);
        assert!(SackWeighing::from_snapshot(&snapshot, Utc::now()).is_err());
    }
}
