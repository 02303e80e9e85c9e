//! Device phrase tables.
//!
//! The scale firmware announces heartbeats, calibration prompts and completion
//! with free-form text. The exact wording changes between firmware builds, so
//! the phrases live in configuration rather than in the classifier.

use serde::{Deserialize, Serialize};

/// Ordered phrase tables consulted by the line classifier.
///
/// Exact tokens and prefixes are case-sensitive; the three calibration
/// categories are matched as case-insensitive substrings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhraseTable {
    /// Lines that are informational when matched exactly (after trimming)
    pub heartbeat_tokens: Vec<String>,
    /// Lines that are informational when they start with one of these
    pub heartbeat_prefixes: Vec<String>,
    /// The device is asking for a known reference weight
    pub reference_weight_phrases: Vec<String>,
    /// The device is asking the operator to confirm with `ok`
    pub confirmation_phrases: Vec<String>,
    /// The device finished calibrating
    pub completion_phrases: Vec<String>,
    /// Menu and status chatter that is dropped without a warning
    pub chatter_markers: Vec<String>,
    /// Sack code the firmware sends when no code is loaded
    pub no_code_sentinel: String,
}

impl Default for PhraseTable {
    fn default() -> Self {
        Self {
            heartbeat_tokens: strings(&["HEARTBEAT", "Arduino listo.", "Tara realizada"]),
            heartbeat_prefixes: strings(&["Nuevo objetivo:"]),
            reference_weight_phrases: strings(&[
                "peso conocido",
                "ingrese el peso",
                "cual es el peso",
            ]),
            confirmation_phrases: strings(&["escribir ok", "escriba ok", "ingrese ok"]),
            completion_phrases: strings(&[
                "calibracion completa",
                "calibración completa",
                "listo para pesar",
                "iniciando pesaje",
            ]),
            chatter_markers: strings(&["Peso:", "MENU", "Tara", "Calibración"]),
            no_code_sentinel: "SIN-CODIGO".to_string(),
        }
    }
}

impl PhraseTable {
    /// Check that every calibration category can match something.
    pub fn validate(&self) -> Result<(), String> {
        let categories = [
            ("reference_weight_phrases", &self.reference_weight_phrases),
            ("confirmation_phrases", &self.confirmation_phrases),
            ("completion_phrases", &self.completion_phrases),
        ];
        for (name, phrases) in categories {
            if phrases.iter().all(|p| p.trim().is_empty()) {
                return Err(format!("protocol.{name} must contain at least one phrase"));
            }
        }
        Ok(())
    }

    pub(crate) fn is_heartbeat(&self, line: &str) -> bool {
        self.heartbeat_tokens.iter().any(|t| t == line)
            || self
                .heartbeat_prefixes
                .iter()
                .any(|p| !p.is_empty() && line.starts_with(p.as_str()))
    }

    pub(crate) fn is_chatter(&self, line: &str) -> bool {
        self.chatter_markers
            .iter()
            .any(|m| !m.is_empty() && line.contains(m.as_str()))
    }

    /// Lowercased copy used for the case-insensitive categories.
    pub(crate) fn folded(&self) -> FoldedPhrases {
        FoldedPhrases {
            reference_weight: fold(&self.reference_weight_phrases),
            confirmation: fold(&self.confirmation_phrases),
            completion: fold(&self.completion_phrases),
        }
    }
}

/// Calibration phrases lowercased once at classifier construction.
#[derive(Debug, Clone)]
pub(crate) struct FoldedPhrases {
    pub reference_weight: Vec<String>,
    pub confirmation: Vec<String>,
    pub completion: Vec<String>,
}

impl FoldedPhrases {
    pub(crate) fn any_in(phrases: &[String], folded_line: &str) -> bool {
        phrases.iter().any(|p| folded_line.contains(p.as_str()))
    }
}

fn fold(phrases: &[String]) -> Vec<String> {
    phrases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
