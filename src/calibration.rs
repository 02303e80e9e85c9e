//! Calibration handshake tracking.
//!
//! The firmware calibrates interactively: it prints a prompt asking for a known
//! reference weight, then asks the operator to type `ok`, then announces that
//! calibration is complete. [`CalibrationMachine`] follows that conversation
//! from the classified lines and gates the operator's answers. It only tracks
//! what the host believes; it never checks that the device acted on a reply.

use crate::error::{ScaleError, ScaleResult};
use crate::protocol::DeviceCommand;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which answer a calibration prompt is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationKind {
    /// A known weight placed on the scale
    ReferenceWeight,
    /// The bare `ok` token
    Confirmation,
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationKind::ReferenceWeight => f.write_str("a reference weight"),
            CalibrationKind::Confirmation => f.write_str("a confirmation"),
        }
    }
}

/// Host-side view of the calibration conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "prompt", rename_all = "snake_case")]
pub enum CalibrationState {
    /// No prompt outstanding
    #[default]
    Idle,
    /// The device asked for a reference weight; holds the prompt text
    AwaitingReferenceWeight(String),
    /// The device asked for `ok`; holds the prompt text
    AwaitingConfirmation(String),
}

impl CalibrationState {
    /// The kind of answer currently expected, if any.
    pub fn awaiting(&self) -> Option<CalibrationKind> {
        match self {
            CalibrationState::Idle => None,
            CalibrationState::AwaitingReferenceWeight(_) => Some(CalibrationKind::ReferenceWeight),
            CalibrationState::AwaitingConfirmation(_) => Some(CalibrationKind::Confirmation),
        }
    }

    /// Prompt text of the outstanding request.
    pub fn prompt(&self) -> Option<&str> {
        match self {
            CalibrationState::Idle => None,
            CalibrationState::AwaitingReferenceWeight(text)
            | CalibrationState::AwaitingConfirmation(text) => Some(text),
        }
    }
}

/// Calibration state machine driven by classifier output and operator input.
#[derive(Debug, Clone, Default)]
pub struct CalibrationMachine {
    state: CalibrationState,
}

impl CalibrationMachine {
    /// Machine in `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    /// Apply a prompt seen on the wire. Returns `true` if the state changed.
    ///
    /// The device drives the conversation, so a prompt always moves the
    /// machine to the matching waiting state. Re-prompts refresh the text.
    pub fn on_prompt(&mut self, kind: CalibrationKind, text: impl Into<String>) -> bool {
        let next = match kind {
            CalibrationKind::ReferenceWeight => CalibrationState::AwaitingReferenceWeight(text.into()),
            CalibrationKind::Confirmation => CalibrationState::AwaitingConfirmation(text.into()),
        };
        self.transition(next)
    }

    /// Apply a completion marker. Always returns to `Idle`.
    pub fn on_done(&mut self) -> bool {
        self.transition(CalibrationState::Idle)
    }

    /// Answer a reference-weight prompt.
    ///
    /// On success the machine is back in `Idle` and the returned command must
    /// be written to the device. On error nothing changes.
    pub fn submit_reference_weight(&mut self, kg: f64) -> ScaleResult<DeviceCommand> {
        if !matches!(self.state, CalibrationState::AwaitingReferenceWeight(_)) {
            return Err(ScaleError::InvalidState {
                expected: CalibrationKind::ReferenceWeight,
            });
        }
        if !kg.is_finite() || kg <= 0.0 {
            return Err(ScaleError::InvalidCalibrationInput(format!(
                "reference weight must be a positive number, got {kg}"
            )));
        }
        self.transition(CalibrationState::Idle);
        Ok(DeviceCommand::ReferenceWeight(kg))
    }

    /// Answer a confirmation prompt with `ok`.
    pub fn submit_confirmation(&mut self) -> ScaleResult<DeviceCommand> {
        if !matches!(self.state, CalibrationState::AwaitingConfirmation(_)) {
            return Err(ScaleError::InvalidState {
                expected: CalibrationKind::Confirmation,
            });
        }
        self.transition(CalibrationState::Idle);
        Ok(DeviceCommand::Confirm)
    }

    /// Put back a state captured before a submission whose command never
    /// reached the device.
    pub(crate) fn restore(&mut self, state: CalibrationState) {
        self.state = state;
    }

    fn transition(&mut self, next: CalibrationState) -> bool {
        if self.state == next {
            return false;
        }
        tracing::info!(from = ?self.state, to = ?next, "Calibration state changed");
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_weight_round_trip() {
        let mut machine = CalibrationMachine::new();
        assert!(machine.on_prompt(CalibrationKind::ReferenceWeight, "Por favor ingrese el peso conocido"));
        assert_eq!(machine.state().awaiting(), Some(CalibrationKind::ReferenceWeight));

        let command = machine.submit_reference_weight(5.25).unwrap();
        assert_eq!(command.to_string(), "5.250");
        assert_eq!(machine.state(), &CalibrationState::Idle);
    }

    #[test]
    fn confirmation_round_trip() {
        let mut machine = CalibrationMachine::new();
        machine.on_prompt(CalibrationKind::Confirmation, "Escriba OK para continuar");
        assert_eq!(machine.submit_confirmation().unwrap(), DeviceCommand::Confirm);
        assert_eq!(machine.state(), &CalibrationState::Idle);
    }

    #[test]
    fn confirmation_in_idle_is_rejected() {
        let mut machine = CalibrationMachine::new();
        let err = machine.submit_confirmation().unwrap_err();
        assert!(matches!(
            err,
            ScaleError::InvalidState {
                expected: CalibrationKind::Confirmation
            }
        ));
        assert_eq!(machine.state(), &CalibrationState::Idle);
    }

    #[test]
    fn wrong_answer_kind_is_rejected() {
        let mut machine = CalibrationMachine::new();
        machine.on_prompt(CalibrationKind::Confirmation, "escribir ok");
        assert!(machine.submit_reference_weight(1.0).is_err());
        assert_eq!(machine.state().awaiting(), Some(CalibrationKind::Confirmation));
    }

    #[test]
    fn invalid_reference_weight_keeps_waiting() {
        let mut machine = CalibrationMachine::new();
        machine.on_prompt(CalibrationKind::ReferenceWeight, "peso conocido");
        for bad in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            let err = machine.submit_reference_weight(bad).unwrap_err();
            assert!(matches!(err, ScaleError::InvalidCalibrationInput(_)));
        }
        assert_eq!(machine.state().prompt(), Some("peso conocido"));
    }

    #[test]
    fn done_always_resets() {
        let mut machine = CalibrationMachine::new();
        machine.on_prompt(CalibrationKind::ReferenceWeight, "peso conocido");
        assert!(machine.on_done());
        assert_eq!(machine.state(), &CalibrationState::Idle);
        assert!(!machine.on_done());
    }

    #[test]
    fn repeated_prompt_refreshes_text() {
        let mut machine = CalibrationMachine::new();
        machine.on_prompt(CalibrationKind::Confirmation, "escriba ok");
        assert!(!machine.on_prompt(CalibrationKind::Confirmation, "escriba ok"));
        assert!(machine.on_prompt(CalibrationKind::Confirmation, "ingrese ok ahora"));
        assert_eq!(machine.state().prompt(), Some("ingrese ok ahora"));
    }

    #[test]
    fn restore_undoes_a_submission() {
        let mut machine = CalibrationMachine::new();
        machine.on_prompt(CalibrationKind::Confirmation, "escriba ok");
        let before = machine.state().clone();
        machine.submit_confirmation().unwrap();
        machine.restore(before.clone());
        assert_eq!(machine.state(), &before);
    }
}
