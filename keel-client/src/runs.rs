//! Run-related API endpoints

use crate::KeelClient;
use crate::error::{ClientError, Result};
use keel_core::domain::{LogEntry, PipelineRun};
use keel_core::dto::run::{RunSteps, RunSummary, TriggerRun};
use uuid::Uuid;

impl KeelClient {
    // =============================================================================
    // Run Lifecycle
    // =============================================================================

    /// Trigger a run; the returned run is still pending
    pub async fn trigger_run(&self, req: TriggerRun) -> Result<PipelineRun> {
        if req.pipeline.is_empty() || req.branch.is_empty() {
            return Err(ClientError::InvalidRequest(
                "pipeline and branch are required".to_string(),
            ));
        }

        let response = self
            .client
            .post(self.url("/api/runs"))
            .json(&req)
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Request cancellation of an active run
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<RunSummary> {
        let url = self.url(&format!("/api/runs/{}/cancel", run_id));
        let response = self.client.post(&url).send().await?;
        self.handle_response(response).await
    }

    // =============================================================================
    // Queries
    // =============================================================================

    /// List runs newest first, optionally for one pipeline
    pub async fn list_runs(&self, pipeline: Option<&str>, limit: Option<u32>) -> Result<Vec<RunSummary>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(pipeline) = pipeline {
            query.push(("pipeline", pipeline.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .client
            .get(self.url("/api/runs"))
            .query(&query)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let url = self.url(&format!("/api/runs/{}", run_id));
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    pub async fn get_run_steps(&self, run_id: Uuid) -> Result<RunSteps> {
        let url = self.url(&format!("/api/runs/{}/steps", run_id));
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    pub async fn get_run_logs(&self, run_id: Uuid) -> Result<Vec<LogEntry>> {
        let url = self.url(&format!("/api/runs/{}/logs", run_id));
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }
}
