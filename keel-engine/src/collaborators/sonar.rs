use async_trait::async_trait;
use keel_core::{KeelError, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{CommandRunner, GateStatus, Invocation, StaticAnalysis};
use crate::context::StepContext;
use crate::credentials::Secret;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// `sonar-scanner` for analysis, the SonarQube web API for the quality gate
pub struct SonarQubeAnalysis {
    runner: CommandRunner,
    http: reqwest::Client,
    url: Option<String>,
}

impl SonarQubeAnalysis {
    pub fn new(runner: CommandRunner, http: reqwest::Client, url: Option<String>) -> Self {
        Self { runner, http, url }
    }

    fn url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .ok_or_else(|| KeelError::execution("KEEL_SONAR_URL is not configured"))
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        secret: Option<&Secret>,
    ) -> Result<T> {
        let mut request = self
            .http
            .get(format!("{}{}", self.url()?, path))
            .query(query);
        if let Some(secret) = secret {
            request = request.basic_auth(secret.expose(), Some(""));
        }

        let response = request
            .send()
            .await
            .map_err(|e| KeelError::execution(format!("SonarQube request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(KeelError::execution(format!(
                "SonarQube returned {} for {}",
                response.status(),
                path
            )));
        }
        response
            .json()
            .await
            .map_err(|e| KeelError::execution(format!("invalid SonarQube response: {}", e)))
    }

    async fn poll_gate(&self, ctx: &StepContext<'_>, task_id: &str, secret: Option<&Secret>) -> Result<GateStatus> {
        let analysis_id = loop {
            let task: CeTaskResponse = self.get("/api/ce/task", &[("id", task_id)], secret).await?;
            debug!("SonarQube task {} is {}", task_id, task.task.status);
            match task.task.status.as_str() {
                "SUCCESS" => {
                    break task.task.analysis_id.ok_or_else(|| {
                        KeelError::execution(format!("task {} has no analysis", task_id))
                    })?;
                }
                "FAILED" | "CANCELED" => {
                    return Err(KeelError::execution(format!(
                        "SonarQube task {} ended {}",
                        task_id, task.task.status
                    )));
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        };

        let gate: GateResponse = self
            .get(
                "/api/qualitygates/project_status",
                &[("analysisId", analysis_id.as_str())],
                secret,
            )
            .await?;

        ctx.info(format!("Quality gate: {}", gate.project_status.status));
        Ok(match gate.project_status.status.as_str() {
            "OK" | "WARN" => GateStatus::Passed,
            _ => GateStatus::Failed(gate.project_status.failing_conditions()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CeTaskResponse {
    task: CeTask,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CeTask {
    status: String,
    analysis_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GateResponse {
    project_status: ProjectStatus,
}

#[derive(Debug, Deserialize)]
struct ProjectStatus {
    status: String,
    #[serde(default)]
    conditions: Vec<GateCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GateCondition {
    status: String,
    metric_key: String,
    actual_value: Option<String>,
    error_threshold: Option<String>,
}

impl ProjectStatus {
    fn failing_conditions(&self) -> String {
        let failing: Vec<String> = self
            .conditions
            .iter()
            .filter(|c| c.status == "ERROR")
            .map(|c| {
                format!(
                    "{} is {} (threshold {})",
                    c.metric_key,
                    c.actual_value.as_deref().unwrap_or("?"),
                    c.error_threshold.as_deref().unwrap_or("?")
                )
            })
            .collect();
        if failing.is_empty() {
            format!("status {}", self.status)
        } else {
            failing.join(", ")
        }
    }
}

/// Reads `ceTaskId` from a scanner `report-task.txt`
pub fn task_id_from_report(report: &str) -> Option<String> {
    report.lines().find_map(|line| {
        line.split_once('=')
            .filter(|(key, _)| key.trim() == "ceTaskId")
            .map(|(_, value)| value.trim().to_string())
    })
}

#[async_trait]
impl StaticAnalysis for SonarQubeAnalysis {
    async fn analyze(
        &self,
        ctx: &StepContext<'_>,
        project: &str,
        secret: Option<&Secret>,
    ) -> Result<String> {
        let mut invocation = Invocation::new("sonar-scanner")
            .arg(format!("-Dsonar.projectKey={}", project))
            .arg(format!("-Dsonar.host.url={}", self.url()?));
        if let Some(secret) = secret {
            invocation = invocation.env("SONAR_TOKEN", secret.expose());
        }
        self.runner.run(ctx, invocation).await?;

        let report = self
            .runner
            .workspace()
            .join(".scannerwork")
            .join("report-task.txt");
        Ok(report.display().to_string())
    }

    async fn wait_for_gate(
        &self,
        ctx: &StepContext<'_>,
        report: &str,
        timeout: Duration,
        secret: Option<&Secret>,
    ) -> Result<GateStatus> {
        let content = tokio::fs::read_to_string(report)
            .await
            .map_err(|e| KeelError::execution(format!("cannot read {}: {}", report, e)))?;
        let task_id = task_id_from_report(&content)
            .ok_or_else(|| KeelError::execution(format!("{} has no ceTaskId", report)))?;

        tokio::time::timeout(timeout, self.poll_gate(ctx, &task_id, secret))
            .await
            .map_err(|_| KeelError::StepTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_from_report() {
        let report = "projectKey=petclinic\n\
                      serverUrl=https://sonar.local\n\
                      ceTaskId=AY1234\n\
                      ceTaskUrl=https://sonar.local/api/ce/task?id=AY1234\n";
        assert_eq!(task_id_from_report(report).as_deref(), Some("AY1234"));
        assert_eq!(task_id_from_report("projectKey=x"), None);
    }

    #[test]
    fn test_failing_conditions() {
        let gate: GateResponse = serde_json::from_str(
            r#"{ "projectStatus": { "status": "ERROR", "conditions": [
                { "status": "OK", "metricKey": "bugs", "actualValue": "0" },
                { "status": "ERROR", "metricKey": "new_coverage", "actualValue": "41.2", "errorThreshold": "80" }
            ]}}"#,
        )
        .unwrap();
        assert_eq!(
            gate.project_status.failing_conditions(),
            "new_coverage is 41.2 (threshold 80)"
        );
    }

    #[test]
    fn test_missing_url_is_reported() {
        let analysis = SonarQubeAnalysis::new(
            CommandRunner::new("."),
            reqwest::Client::new(),
            None,
        );
        assert!(analysis.url().is_err());
    }
}
