//! Step domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::capability::Capability;
use crate::error::{ErrorKind, KeelError};

/// Declarative unit of work
///
/// Produced by the definition loader and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub name: String,
    pub ordinal: usize,
    pub capability: Capability,
    /// Capability parameters, values may contain `${...}` references
    pub params: BTreeMap<String, String>,
    /// Credential names materialized for each attempt of this step
    pub credentials: Vec<String>,
    /// Earlier steps whose outputs this step consumes
    pub needs: Vec<String>,
    pub outputs: Vec<String>,
    pub retry: RetryPolicy,
    pub timeout_ms: u64,
    pub continue_on_failure: bool,
    pub when: Condition,
}

impl StepDescriptor {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_blocking(&self) -> bool {
        !self.continue_on_failure
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Exponential { factor: f64 },
}

/// Per-step retry policy
///
/// `max_retries` is the number of retries after the first attempt, so a step
/// runs at most `max_retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay_ms: u64,
    pub backoff: Backoff,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
            backoff: Backoff::Fixed,
            max_delay_ms: 0,
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        let delay_ms = delay.as_millis() as u64;
        Self {
            max_retries,
            delay_ms,
            backoff: Backoff::Fixed,
            max_delay_ms: delay_ms,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let millis = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential { factor } => {
                let exponent = retry.saturating_sub(1).min(32) as i32;
                let scaled = self.delay_ms as f64 * factor.powi(exponent);
                scaled.min(self.max_delay_ms as f64) as u64
            }
        };
        Duration::from_millis(millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Whether a step runs for a given trigger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    /// Disabled stage, recorded as skipped
    Never,
    /// Branch glob patterns, any match enables the step
    Branch(Vec<String>),
    /// Environment binding names
    Environment(Vec<String>),
}

/// Step state, both transient and terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Retrying,
    Succeeded,
    SucceededWithWarning,
    Failed,
    Skipped,
    Aborted,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Retrying => "retrying",
            StepStatus::Succeeded => "succeeded",
            StepStatus::SucceededWithWarning => "succeeded_with_warning",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded
                | StepStatus::SucceededWithWarning
                | StepStatus::Failed
                | StepStatus::Skipped
                | StepStatus::Aborted
        )
    }

    /// Outputs of a step in this state may feed later steps
    ///
    /// A tolerated failure records `SucceededWithWarning`, which satisfies no
    /// dependency.
    pub fn produced_outputs(&self) -> bool {
        matches!(self, StepStatus::Succeeded)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&KeelError> for StepError {
    fn from(err: &KeelError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one step within a run
///
/// Appended to the run's log once the step reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub ordinal: usize,
    pub status: StepStatus,
    /// Number of attempts that entered `Running`
    pub attempts: u32,
    pub outputs: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<StepError>,
}

impl StepResult {
    pub fn skipped(step: &StepDescriptor) -> Self {
        Self {
            step: step.name.clone(),
            ordinal: step.ordinal,
            status: StepStatus::Skipped,
            attempts: 0,
            outputs: BTreeMap::new(),
            started_at: Utc::now(),
            duration_ms: 0,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_retry_delay_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_retry_delay_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            delay_ms: 100,
            backoff: Backoff::Exponential { factor: 2.0 },
            max_delay_ms: 500,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Retrying.is_terminal());
        assert!(StepStatus::SucceededWithWarning.is_terminal());
        assert!(StepStatus::Succeeded.produced_outputs());
        assert!(!StepStatus::SucceededWithWarning.produced_outputs());
        assert!(!StepStatus::Skipped.produced_outputs());
    }
}
