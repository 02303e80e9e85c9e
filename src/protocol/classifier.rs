//! Line classification.
//!
//! Every framed line maps to exactly one [`Classification`]. The checks run in
//! a fixed order and the first match wins:
//!
//! 1. blank line: noise
//! 2. heartbeat token or prefix
//! 3. reference-weight prompt
//! 4. confirmation prompt
//! 5. calibration completion
//! 6. whole-line JSON object
//! 7. JSON object embedded in other text
//! 8. `OBJ:..;ACT:..;DIF:..`
//! 9. anything else: noise
//!
//! Calibration phrases are checked before any structured decode, so a prompt
//! that happens to contain braces is still a prompt.

use super::phrases::{FoldedPhrases, PhraseTable};
use super::record::{decode_delimited, decode_embedded_json, decode_json, FrameFormat, MeasurementRecord};
use crate::calibration::CalibrationKind;

/// Longest excerpt of an unrecognized line written to the log.
const NOISE_EXCERPT_CHARS: usize = 50;

/// Result of classifying one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Blank, chatter or unrecognized text
    Noise,
    /// Informational device message
    Heartbeat,
    /// The device is asking for calibration input
    CalibrationPrompt {
        /// What the device is asking for
        kind: CalibrationKind,
        /// The prompt line as received
        text: String,
    },
    /// The device finished calibrating
    CalibrationDone,
    /// A decoded reading
    Measurement(MeasurementRecord),
}

/// Classifies lines against a phrase table.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    phrases: PhraseTable,
    folded: FoldedPhrases,
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new(PhraseTable::default())
    }
}

impl LineClassifier {
    pub fn new(phrases: PhraseTable) -> Self {
        let folded = phrases.folded();
        Self { phrases, folded }
    }

    pub fn phrases(&self) -> &PhraseTable {
        &self.phrases
    }

    /// Classify one line. Never fails; anything unrecognized is `Noise`.
    pub fn classify(&self, line: &str) -> Classification {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            tracing::trace!("Blank line");
            return Classification::Noise;
        }

        if self.phrases.is_heartbeat(trimmed) {
            tracing::trace!(line = %trimmed, "Heartbeat");
            return Classification::Heartbeat;
        }

        let folded = trimmed.to_lowercase();
        if FoldedPhrases::any_in(&self.folded.reference_weight, &folded) {
            return Classification::CalibrationPrompt {
                kind: CalibrationKind::ReferenceWeight,
                text: trimmed.to_string(),
            };
        }
        if FoldedPhrases::any_in(&self.folded.confirmation, &folded) {
            return Classification::CalibrationPrompt {
                kind: CalibrationKind::Confirmation,
                text: trimmed.to_string(),
            };
        }
        if FoldedPhrases::any_in(&self.folded.completion, &folded) {
            return Classification::CalibrationDone;
        }

        let sentinel = self.phrases.no_code_sentinel.as_str();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            match decode_json(trimmed, sentinel, FrameFormat::Json) {
                Ok(record) => return Classification::Measurement(record),
                Err(e) => tracing::trace!(error = %e, "Whole-line JSON decode failed"),
            }
        }

        if trimmed.contains('{') {
            if let Ok(record) = decode_embedded_json(trimmed, sentinel) {
                return Classification::Measurement(record);
            }
        }

        if let Ok(record) = decode_delimited(trimmed) {
            return Classification::Measurement(record);
        }

        if self.phrases.is_chatter(trimmed) {
            tracing::debug!(line = %trimmed, "Device chatter");
        } else {
            let excerpt: String = trimmed.chars().take(NOISE_EXCERPT_CHARS).collect();
            tracing::warn!(line = %excerpt, "Unrecognized device line");
        }
        Classification::Noise
    }
}
