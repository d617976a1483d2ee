//! Pipeline run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::step::{StepResult, StepStatus};
use crate::error::ErrorKind;

/// One trigger-to-completion execution of a pipeline
///
/// Created by the engine when a run is prepared and finalized when the last
/// step reaches a terminal state. `steps` is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    /// Monotonic build number per pipeline, starting at 1
    pub number: u64,
    pub pipeline: String,
    pub branch: String,
    pub environment: String,
    pub parameters: BTreeMap<String, String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepResult>,
    /// Results of rollback steps executed after a blocking failure
    #[serde(default)]
    pub rollback: Vec<StepResult>,
    pub failure: Option<RunFailure>,
}

/// First failing step and its error, surfaced verbatim to notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unstable,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Unstable => "unstable",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Unstable | RunStatus::Aborted
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "succeeded" | "success" => Ok(RunStatus::Succeeded),
            "failed" | "failure" => Ok(RunStatus::Failed),
            "unstable" => Ok(RunStatus::Unstable),
            "aborted" => Ok(RunStatus::Aborted),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

impl PipelineRun {
    pub fn new(
        number: u64,
        pipeline: impl Into<String>,
        branch: impl Into<String>,
        environment: impl Into<String>,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            pipeline: pipeline.into(),
            branch: branch.into(),
            environment: environment.into(),
            parameters,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            rollback: Vec::new(),
            failure: None,
        }
    }

    /// Append a finished step result
    pub fn record(&mut self, result: StepResult) {
        self.steps.push(result);
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|r| r.step == name)
    }

    pub fn failed_step(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.step.as_str())
    }

    /// Status implied by the recorded step results
    ///
    /// A failed or aborted step dominates a warning, and a warning dominates
    /// success.
    pub fn derive_status(&self) -> RunStatus {
        if self.steps.iter().any(|r| r.status == StepStatus::Aborted) {
            RunStatus::Aborted
        } else if self.steps.iter().any(|r| r.status == StepStatus::Failed) {
            RunStatus::Failed
        } else if self
            .steps
            .iter()
            .any(|r| r.status == StepStatus::SucceededWithWarning)
        {
            RunStatus::Unstable
        } else {
            RunStatus::Succeeded
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(step: &str, status: StepStatus) -> StepResult {
        StepResult {
            step: step.to_string(),
            ordinal: 0,
            status,
            attempts: 1,
            outputs: BTreeMap::new(),
            started_at: Utc::now(),
            duration_ms: 0,
            error: None,
        }
    }

    #[test]
    fn test_derive_status_precedence() {
        let mut run = PipelineRun::new(1, "app", "main", "prod", BTreeMap::new());
        run.record(result("Build", StepStatus::Succeeded));
        assert_eq!(run.derive_status(), RunStatus::Succeeded);

        run.record(result("Scan", StepStatus::SucceededWithWarning));
        assert_eq!(run.derive_status(), RunStatus::Unstable);

        run.record(result("Deploy", StepStatus::Failed));
        run.record(result("Verify", StepStatus::Skipped));
        assert_eq!(run.derive_status(), RunStatus::Failed);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("UNSTABLE".parse::<RunStatus>(), Ok(RunStatus::Unstable));
        assert!("exploded".parse::<RunStatus>().is_err());
        assert!(RunStatus::Aborted.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
