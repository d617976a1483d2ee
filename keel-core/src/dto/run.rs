//! Run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus};
use crate::domain::step::StepResult;

/// Request to trigger a run of a named pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRun {
    pub pipeline: String,
    pub branch: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Run without its step results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub number: u64,
    pub pipeline: String,
    pub branch: String,
    pub environment: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_step: Option<String>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            number: run.number,
            pipeline: run.pipeline.clone(),
            branch: run.branch.clone(),
            environment: run.environment.clone(),
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            failed_step: run.failed_step().map(str::to_string),
        }
    }
}

/// Step results of a run, rollback steps kept apart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSteps {
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub rollback: Vec<StepResult>,
}

impl From<&PipelineRun> for RunSteps {
    fn from(run: &PipelineRun) -> Self {
        Self {
            steps: run.steps.clone(),
            rollback: run.rollback.clone(),
        }
    }
}
