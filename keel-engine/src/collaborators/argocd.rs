use async_trait::async_trait;
use keel_core::{KeelError, Result};
use serde::Deserialize;
use std::time::Duration;

use super::process::failure_message;
use super::{ClusterReconciler, CommandRunner, Health, Invocation};
use crate::context::StepContext;
use crate::credentials::Secret;

/// Argo CD application sync and health through the argocd CLI
pub struct ArgoCdReconciler {
    runner: CommandRunner,
    server: Option<String>,
}

impl ArgoCdReconciler {
    pub fn new(runner: CommandRunner, server: Option<String>) -> Self {
        Self { runner, server }
    }

    fn argocd(&self, secret: Option<&Secret>) -> Invocation {
        let mut invocation = Invocation::new("argocd");
        if let Some(secret) = secret {
            invocation = invocation.env("ARGOCD_AUTH_TOKEN", secret.expose());
        }
        invocation
    }

    fn server_args(&self) -> Vec<String> {
        match &self.server {
            Some(server) => vec!["--server".to_string(), server.clone(), "--grpc-web".to_string()],
            None => Vec::new(),
        }
    }

    async fn app_status(
        &self,
        ctx: &StepContext<'_>,
        app: &str,
        secret: Option<&Secret>,
    ) -> Result<AppStatus> {
        let output = self
            .runner
            .run(
                ctx,
                self.argocd(secret)
                    .args(["app", "get", app, "-o", "json"])
                    .args(self.server_args())
                    .quiet(),
            )
            .await?;
        let application: Application = serde_json::from_str(&output.stdout)
            .map_err(|e| KeelError::execution(format!("invalid argocd output: {}", e)))?;
        Ok(application.status)
    }
}

#[derive(Debug, Deserialize)]
struct Application {
    status: AppStatus,
}

#[derive(Debug, Default, Deserialize)]
struct AppStatus {
    #[serde(default)]
    sync: SyncStatus,
    #[serde(default)]
    health: HealthStatus,
}

#[derive(Debug, Default, Deserialize)]
struct SyncStatus {
    #[serde(default)]
    status: String,
    revision: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HealthStatus {
    #[serde(default)]
    status: String,
    message: Option<String>,
}

#[async_trait]
impl ClusterReconciler for ArgoCdReconciler {
    async fn sync(&self, ctx: &StepContext<'_>, app: &str, secret: Option<&Secret>) -> Result<String> {
        self.runner
            .run(
                ctx,
                self.argocd(secret)
                    .args(["app", "sync", app])
                    .args(self.server_args()),
            )
            .await?;

        let status = self.app_status(ctx, app, secret).await?;
        ctx.info(format!("{} sync status: {}", app, status.sync.status));
        status
            .sync
            .revision
            .ok_or_else(|| KeelError::execution(format!("{} reports no synced revision", app)))
    }

    async fn wait_healthy(
        &self,
        ctx: &StepContext<'_>,
        app: &str,
        timeout: Duration,
        secret: Option<&Secret>,
    ) -> Result<Health> {
        let output = self
            .runner
            .output(
                ctx,
                self.argocd(secret)
                    .args(["app", "wait", app, "--health", "--timeout"])
                    .arg(timeout.as_secs().max(1).to_string())
                    .args(self.server_args()),
            )
            .await?;
        if output.success() {
            return Ok(Health::Healthy);
        }

        // The wait failed: report the application's own account of its health
        match self.app_status(ctx, app, secret).await {
            Ok(status) => Ok(Health::Unhealthy(format!(
                "{} is {}{}",
                app,
                if status.health.status.is_empty() {
                    "Unknown"
                } else {
                    status.health.status.as_str()
                },
                status
                    .health
                    .message
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            ))),
            Err(_) => Ok(Health::Unhealthy(failure_message(ctx, "argocd", &output))),
        }
    }
}
