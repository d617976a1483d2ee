//! Capability dispatch
//!
//! Maps a step's capability and rendered parameters onto a collaborator
//! call and turns the collaborator's answer into step outputs. Only the
//! outputs the step declares are returned.

use keel_core::domain::Capability;
use keel_core::{KeelError, Result};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::collaborators::{GateStatus, Health, RolloutStatus, Severity, Toolchain};
use crate::context::StepContext;
use crate::credentials::{AttemptCredentials, Secret};

const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_ROLLOUT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_SCAN_THRESHOLD: Severity = Severity::High;

/// Rendered parameters of one attempt
struct Params<'a> {
    values: &'a BTreeMap<String, String>,
    credentials: &'a AttemptCredentials,
}

impl<'a> Params<'a> {
    fn required(&self, name: &str) -> Result<&'a str> {
        self.values
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| KeelError::execution(format!("missing parameter '{}'", name)))
    }

    fn optional(&self, name: &str) -> Option<&'a str> {
        self.values.get(name).map(String::as_str)
    }

    fn timeout(&self, default: Duration) -> Result<Duration> {
        match self.optional("timeout") {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| KeelError::execution(format!("invalid timeout '{}'", raw))),
        }
    }

    /// Secret named by the `credential` parameter
    fn secret(&self) -> Result<Option<&'a Secret>> {
        match self.optional("credential") {
            None => Ok(None),
            Some(name) => self
                .credentials
                .secret(name)
                .map(Some)
                .ok_or_else(|| KeelError::CredentialNotFound(name.to_string())),
        }
    }
}

/// Environment variable name for a credential, e.g. `docker-hub` -> `DOCKER_HUB`
pub fn credential_env_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Invokes the step's capability
pub async fn dispatch(
    tools: &Toolchain,
    ctx: &StepContext<'_>,
    params: &BTreeMap<String, String>,
    credentials: &AttemptCredentials,
) -> Result<BTreeMap<String, String>> {
    let p = Params {
        values: params,
        credentials,
    };
    let mut outputs = BTreeMap::new();

    match ctx.step.capability {
        Capability::Build => {
            let build = tools.build.build(ctx, p.required("project")?).await?;
            outputs.insert("artifact", build.artifact);
            if let Some(report) = build.test_report {
                outputs.insert("test_report", report);
            }
        }
        Capability::ImageBuild => {
            let image = tools
                .images
                .build_image(ctx, p.required("context")?, p.required("tag")?)
                .await?;
            outputs.insert("image", image);
        }
        Capability::ImagePush => {
            let digest = tools
                .images
                .push(ctx, p.required("image")?, p.required("registry")?, p.secret()?)
                .await?;
            outputs.insert("digest", digest);
        }
        Capability::Scan => {
            let target = p.required("target")?;
            let threshold = match p.optional("severity") {
                Some(raw) => raw.parse::<Severity>().map_err(KeelError::Template)?,
                None => DEFAULT_SCAN_THRESHOLD,
            };
            let report = tools.scanner.scan(ctx, target).await?;
            let blocking = report.at_or_above(threshold);
            let summary = report.summary();
            ctx.info(format!(
                "Scan of {}: {}",
                target,
                if summary.is_empty() { "no findings" } else { summary.as_str() }
            ));
            if blocking > 0 {
                return Err(KeelError::GateRejected(format!(
                    "{} findings at or above {} in {} ({})",
                    blocking, threshold, target, summary
                )));
            }
            outputs.insert("report", report.report);
            outputs.insert("findings", summary);
        }
        Capability::AnalysisRun => {
            let report = tools
                .analysis
                .analyze(ctx, p.required("project")?, p.secret()?)
                .await?;
            outputs.insert("report", report);
        }
        Capability::AnalysisGate => {
            let status = tools
                .analysis
                .wait_for_gate(
                    ctx,
                    p.required("report")?,
                    p.timeout(DEFAULT_GATE_TIMEOUT)?,
                    p.secret()?,
                )
                .await?;
            match status {
                GateStatus::Passed => {
                    outputs.insert("gate", "passed".to_string());
                }
                GateStatus::Failed(reason) => return Err(KeelError::GateRejected(reason)),
            }
        }
        Capability::ArtifactPublish => {
            let location = tools
                .artifacts
                .publish(ctx, p.required("artifact")?, p.secret()?)
                .await?;
            outputs.insert("location", location);
        }
        Capability::GitOpsUpdate => {
            let commit = tools
                .gitops
                .update_manifest(
                    ctx,
                    p.required("repo")?,
                    p.required("path")?,
                    p.required("tag")?,
                    p.secret()?,
                )
                .await?;
            outputs.insert("commit", commit);
        }
        Capability::ReconcilerSync => {
            let sync_id = tools
                .reconciler
                .sync(ctx, p.required("app")?, p.secret()?)
                .await?;
            outputs.insert("sync_id", sync_id);
        }
        Capability::ReconcilerWaitHealthy => {
            let app = p.required("app")?;
            let health = tools
                .reconciler
                .wait_healthy(ctx, app, p.timeout(DEFAULT_HEALTH_TIMEOUT)?, p.secret()?)
                .await?;
            match health {
                Health::Healthy => {
                    outputs.insert("health", "healthy".to_string());
                }
                Health::Unhealthy(reason) => return Err(KeelError::DeploymentUnhealthy(reason)),
            }
        }
        Capability::ClusterApply => {
            let applied = tools
                .cluster
                .apply_manifest(ctx, p.required("manifest")?, p.optional("namespace"), p.secret()?)
                .await?;
            outputs.insert("applied", applied);
        }
        Capability::ClusterRolloutStatus => {
            let deployment = p.required("deployment")?;
            let status = tools
                .cluster
                .rollout_status(
                    ctx,
                    deployment,
                    p.required("namespace")?,
                    p.timeout(DEFAULT_ROLLOUT_TIMEOUT)?,
                    p.secret()?,
                )
                .await?;
            match status {
                RolloutStatus::Ready => {
                    outputs.insert("rollout", "complete".to_string());
                }
                RolloutStatus::Timeout(detail) => {
                    return Err(KeelError::DeploymentUnhealthy(format!(
                        "rollout of {} did not complete: {}",
                        deployment, detail
                    )));
                }
            }
        }
        Capability::ClusterGetPods => {
            let pods = tools
                .cluster
                .get_pods(ctx, p.required("selector")?, p.required("namespace")?, p.secret()?)
                .await?;
            outputs.insert("count", pods.len().to_string());
            outputs.insert(
                "pods",
                pods.iter()
                    .map(|pod| pod.name.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        Capability::Shell => {
            let mut env = BTreeMap::new();
            for name in &ctx.step.credentials {
                if let Some(secret) = credentials.secret(name) {
                    let var = credential_env_name(name);
                    if let Some(username) = secret.username() {
                        env.insert(format!("{}_USER", var), username.to_string());
                    }
                    env.insert(var, secret.expose().to_string());
                }
            }
            let stdout = tools.shell.run(ctx, p.required("command")?, &env).await?;
            outputs.insert("stdout", stdout);
        }
    }

    Ok(outputs
        .into_iter()
        .filter(|(name, _)| ctx.step.outputs.iter().any(|o| o == name))
        .map(|(name, value)| (name.to_string(), value))
        .collect())
}
