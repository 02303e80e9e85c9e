//! Measurement state: chart history, tolerance verdict and the sink that
//! folds decoded records into the current reading.

pub mod history;
pub mod sink;
pub mod tolerance;

pub use history::{ChartHistory, ChartPoint};
pub use sink::MeasurementSink;
pub use tolerance::{effective_difference, ToleranceRule, ToleranceVerdict};
