//! Measurement stream sink.
//!
//! Folds decoded records into the "current reading" state shown to the
//! operator: last weight, carried-forward target and difference, chart
//! history, the tolerance verdict and a freshness flag.

use super::history::{ChartHistory, ChartPoint};
use super::tolerance::{ToleranceRule, ToleranceVerdict};
use crate::config::MeasurementConfig;
use crate::protocol::MeasurementRecord;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Current-reading state built from accepted records.
#[derive(Debug, Clone)]
pub struct MeasurementSink {
    current_weight: f64,
    target_weight: Option<f64>,
    difference: Option<f64>,
    device_sack_code: Option<String>,
    device_factory_label: Option<String>,
    sack_code: String,
    factory_id: Option<String>,
    last_received_at: Option<DateTime<Utc>>,
    last_seen: Option<Instant>,
    data_fresh: bool,
    accepted: u64,
    history: ChartHistory,
    tolerance: ToleranceRule,
    freshness_window: Duration,
}

impl Default for MeasurementSink {
    fn default() -> Self {
        Self::new(&MeasurementConfig::default())
    }
}

impl MeasurementSink {
    pub fn new(config: &MeasurementConfig) -> Self {
        Self {
            current_weight: 0.0,
            target_weight: None,
            difference: None,
            device_sack_code: None,
            device_factory_label: None,
            sack_code: String::new(),
            factory_id: None,
            last_received_at: None,
            last_seen: None,
            data_fresh: false,
            accepted: 0,
            history: ChartHistory::new(config.history_capacity),
            tolerance: config.tolerance,
            freshness_window: config.freshness_window(),
        }
    }

    /// Accept a record stamped with the current time.
    pub fn accept(&mut self, record: MeasurementRecord) -> MeasurementRecord {
        self.accept_at(record, Utc::now(), Instant::now())
    }

    /// Accept a record with explicit wall-clock and monotonic capture times.
    ///
    /// The weight always replaces the previous one. Target and difference
    /// only change when the record carries them. The device sack code fills
    /// the operator's field only while that field is empty.
    pub fn accept_at(
        &mut self,
        mut record: MeasurementRecord,
        received_at: DateTime<Utc>,
        seen: Instant,
    ) -> MeasurementRecord {
        record.received_at = Some(received_at);

        self.current_weight = record.current_weight;
        if let Some(target) = record.target_weight {
            self.target_weight = Some(target);
        }
        if let Some(difference) = record.difference {
            self.difference = Some(difference);
        }
        if let Some(code) = &record.sack_code {
            self.device_sack_code = Some(code.clone());
            if self.sack_code.trim().is_empty() {
                self.sack_code = code.clone();
            }
        }
        if let Some(label) = &record.factory_label {
            self.device_factory_label = Some(label.clone());
        }

        self.history.push(ChartPoint {
            at: received_at,
            weight: self.current_weight,
            target: self.target_weight,
        });

        self.last_received_at = Some(received_at);
        self.last_seen = Some(seen);
        self.data_fresh = true;
        self.accepted += 1;

        tracing::debug!(
            weight_kg = self.current_weight,
            target_kg = ?self.target_weight,
            difference_kg = ?self.difference,
            "Measurement accepted"
        );
        record
    }

    /// Flip the freshness flag off once no record arrived within the window.
    /// Returns `true` if the flag changed.
    pub fn check_freshness(&mut self, now: Instant) -> bool {
        let stale = match self.last_seen {
            Some(seen) => now.saturating_duration_since(seen) > self.freshness_window,
            None => true,
        };
        if stale && self.data_fresh {
            self.data_fresh = false;
            tracing::info!(window = ?self.freshness_window, "Scale data is no longer fresh");
            return true;
        }
        false
    }

    /// Local effect of a tare acknowledged by the transport.
    pub fn apply_tare(&mut self) {
        self.current_weight = 0.0;
        self.difference = Some(0.0);
    }

    /// Local effect of a target command written to the device.
    pub fn set_target_weight(&mut self, kg: f64) {
        self.target_weight = Some(kg);
    }

    /// Operator-entered sack code.
    pub fn set_sack_code(&mut self, code: impl Into<String>) {
        self.sack_code = code.into();
    }

    /// Empty the operator's sack code, e.g. after a save.
    pub fn clear_sack_code(&mut self) {
        self.sack_code.clear();
    }

    /// Select the factory the next weighings belong to.
    pub fn select_factory(&mut self, factory_id: Option<String>) {
        self.factory_id = factory_id.filter(|id| !id.trim().is_empty());
    }

    /// Mark data stale, used when the connection goes away.
    pub fn mark_stale(&mut self) {
        self.data_fresh = false;
    }

    pub fn verdict(&self) -> ToleranceVerdict {
        self.tolerance
            .verdict(self.current_weight, self.target_weight, self.difference)
    }

    pub fn current_weight(&self) -> f64 {
        self.current_weight
    }

    pub fn target_weight(&self) -> Option<f64> {
        self.target_weight
    }

    pub fn difference(&self) -> Option<f64> {
        self.difference
    }

    pub fn device_sack_code(&self) -> Option<&str> {
        self.device_sack_code.as_deref()
    }

    pub fn device_factory_label(&self) -> Option<&str> {
        self.device_factory_label.as_deref()
    }

    pub fn sack_code(&self) -> &str {
        &self.sack_code
    }

    pub fn factory_id(&self) -> Option<&str> {
        self.factory_id.as_deref()
    }

    pub fn last_received_at(&self) -> Option<DateTime<Utc>> {
        self.last_received_at
    }

    pub fn is_fresh(&self) -> bool {
        self.data_fresh
    }

    /// Number of records accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn history(&self) -> &ChartHistory {
        &self.history
    }

    pub fn tolerance(&self) -> ToleranceRule {
        self.tolerance
    }
}
