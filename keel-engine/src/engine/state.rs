//! Per-step state machine
//!
//! Transitions are explicit and validated so the executor cannot record an
//! outcome the step never reached:
//!
//! ```text
//! Pending  -> Running | Skipped | Failed
//! Running  -> Succeeded | Failed | Aborted
//! Failed   -> Retrying | SucceededWithWarning
//! Retrying -> Running | Failed | Aborted
//! ```
//!
//! `Pending -> Failed` covers inputs or credentials that were unavailable
//! before the first attempt, `Retrying -> Failed` the same for a retry.

use keel_core::domain::StepStatus;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: StepStatus,
    pub to: StepStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid step transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

#[derive(Debug, Clone)]
pub struct StepMachine {
    state: StepStatus,
    attempts: u32,
}

impl Default for StepMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StepMachine {
    pub fn new() -> Self {
        Self {
            state: StepStatus::Pending,
            attempts: 0,
        }
    }

    pub fn state(&self) -> StepStatus {
        self.state
    }

    /// Attempts that entered `Running`
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn validate_state(&self, allowed: &[StepStatus], to: StepStatus) -> Result<(), InvalidTransition> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.state,
                to,
            })
        }
    }

    fn transition(&mut self, allowed: &[StepStatus], to: StepStatus) -> Result<(), InvalidTransition> {
        self.validate_state(allowed, to)?;
        self.state = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(&[StepStatus::Pending, StepStatus::Retrying], StepStatus::Running)?;
        self.attempts += 1;
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<(), InvalidTransition> {
        self.transition(&[StepStatus::Running], StepStatus::Succeeded)
    }

    pub fn fail(&mut self) -> Result<(), InvalidTransition> {
        self.transition(
            &[StepStatus::Pending, StepStatus::Running, StepStatus::Retrying],
            StepStatus::Failed,
        )
    }

    pub fn retry(&mut self) -> Result<(), InvalidTransition> {
        self.transition(&[StepStatus::Failed], StepStatus::Retrying)
    }

    /// Records a non-blocking failure as a warning
    pub fn tolerate(&mut self) -> Result<(), InvalidTransition> {
        self.transition(&[StepStatus::Failed], StepStatus::SucceededWithWarning)
    }

    pub fn skip(&mut self) -> Result<(), InvalidTransition> {
        self.transition(&[StepStatus::Pending], StepStatus::Skipped)
    }

    pub fn abort(&mut self) -> Result<(), InvalidTransition> {
        self.transition(
            &[StepStatus::Pending, StepStatus::Running, StepStatus::Retrying],
            StepStatus::Aborted,
        )
    }
}
