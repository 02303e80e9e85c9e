//! Device line protocol: framing, classification and command encoding.

pub mod classifier;
pub mod command;
pub mod framer;
pub mod phrases;
pub mod record;

pub use classifier::{Classification, LineClassifier};
pub use command::DeviceCommand;
pub use framer::LineFramer;
pub use phrases::PhraseTable;
pub use record::{FrameFormat, MeasurementRecord};
