use async_trait::async_trait;
use keel_core::{KeelError, Result};
use serde::Deserialize;
use std::time::Duration;

use super::process::failure_message;
use super::{ClusterApi, CommandRunner, Invocation, PodInfo, RolloutStatus};
use crate::context::StepContext;
use crate::credentials::Secret;

/// Cluster access through kubectl, bearer token from the step credential
pub struct KubectlCluster {
    runner: CommandRunner,
}

impl KubectlCluster {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn kubectl(&self, namespace: Option<&str>, secret: Option<&Secret>) -> Invocation {
        let mut invocation = Invocation::new("kubectl");
        if let Some(namespace) = namespace {
            invocation = invocation.args(["--namespace", namespace]);
        }
        if let Some(secret) = secret {
            invocation = invocation.arg(format!("--token={}", secret.expose()));
        }
        invocation
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    ready: bool,
}

/// Reads `kubectl get pods -o json`
pub fn parse_pods(json: &str) -> Result<Vec<PodInfo>> {
    let list: PodList = serde_json::from_str(json)
        .map_err(|e| KeelError::execution(format!("invalid kubectl output: {}", e)))?;
    Ok(list
        .items
        .into_iter()
        .map(|pod| PodInfo {
            ready: !pod.status.container_statuses.is_empty()
                && pod.status.container_statuses.iter().all(|c| c.ready),
            name: pod.metadata.name,
            phase: pod.status.phase,
        })
        .collect())
}

fn is_rollout_timeout(stderr: &str) -> bool {
    stderr.contains("timed out waiting") || stderr.contains("exceeded its progress deadline")
}

#[async_trait]
impl ClusterApi for KubectlCluster {
    async fn apply_manifest(
        &self,
        ctx: &StepContext<'_>,
        manifest: &str,
        namespace: Option<&str>,
        secret: Option<&Secret>,
    ) -> Result<String> {
        let output = self
            .runner
            .run(
                ctx,
                self.kubectl(namespace, secret).args(["apply", "-f", manifest]),
            )
            .await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn rollout_status(
        &self,
        ctx: &StepContext<'_>,
        deployment: &str,
        namespace: &str,
        timeout: Duration,
        secret: Option<&Secret>,
    ) -> Result<RolloutStatus> {
        let output = self
            .runner
            .output(
                ctx,
                self.kubectl(Some(namespace), secret)
                    .args(["rollout", "status"])
                    .arg(format!("deployment/{}", deployment))
                    .arg(format!("--timeout={}s", timeout.as_secs().max(1))),
            )
            .await?;

        if output.success() {
            Ok(RolloutStatus::Ready)
        } else if is_rollout_timeout(&output.stderr) {
            Ok(RolloutStatus::Timeout(ctx.redact(output.stderr.trim())))
        } else {
            Err(KeelError::execution(failure_message(ctx, "kubectl", &output)))
        }
    }

    async fn get_pods(
        &self,
        ctx: &StepContext<'_>,
        selector: &str,
        namespace: &str,
        secret: Option<&Secret>,
    ) -> Result<Vec<PodInfo>> {
        let output = self
            .runner
            .run(
                ctx,
                self.kubectl(Some(namespace), secret)
                    .args(["get", "pods", "--selector", selector, "-o", "json"])
                    .quiet(),
            )
            .await?;
        let pods = parse_pods(&output.stdout)?;
        for pod in &pods {
            ctx.info(format!("{} {} ready={}", pod.name, pod.phase, pod.ready));
        }
        Ok(pods)
    }
}
