//! External collaborators
//!
//! Every capability a step can invoke is backed by one of the traits below.
//! The engine only talks to these traits; [`Toolchain::cli`] wires the
//! adapters that drive the usual command-line tools and HTTP APIs, and tests
//! substitute scripted fakes.

mod argocd;
mod docker;
mod git;
mod kubectl;
mod maven;
mod nexus;
mod process;
mod shell;
mod sonar;
mod trivy;

pub use argocd::ArgoCdReconciler;
pub use docker::DockerImageBuilder;
pub use git::{GitManifestRepository, rewrite_image};
pub use kubectl::KubectlCluster;
pub use maven::MavenBuildRunner;
pub use nexus::NexusRepository;
pub use process::{CommandOutput, CommandRunner, Invocation};
pub use shell::ShRunner;
pub use sonar::SonarQubeAnalysis;
pub use trivy::{TrivyScanner, parse_trivy_report};

use async_trait::async_trait;
use keel_core::Result;
pub use keel_core::domain::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ToolConfig;
use crate::context::StepContext;
use crate::credentials::Secret;

// =============================================================================
// Collaborator results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub artifact: String,
    pub test_report: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Location of the full report
    pub report: String,
    pub findings: BTreeMap<Severity, u32>,
}

impl ScanReport {
    /// Number of findings at `threshold` or worse
    pub fn at_or_above(&self, threshold: Severity) -> u32 {
        self.findings
            .iter()
            .filter(|(severity, _)| **severity >= threshold)
            .map(|(_, count)| count)
            .sum()
    }

    /// Compact summary such as `CRITICAL=1,HIGH=3`
    pub fn summary(&self) -> String {
        self.findings
            .iter()
            .rev()
            .filter(|(_, count)| **count > 0)
            .map(|(severity, count)| format!("{}={}", severity, count))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStatus {
    Passed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutStatus {
    Ready,
    Timeout(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub phase: String,
    pub ready: bool,
}

// =============================================================================
// Collaborator traits
// =============================================================================

#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn build(&self, ctx: &StepContext<'_>, project: &str) -> Result<BuildOutput>;
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Builds `context` and tags the image; returns the image reference
    async fn build_image(&self, ctx: &StepContext<'_>, context: &str, tag: &str) -> Result<String>;

    /// Pushes an image; returns its digest
    async fn push(
        &self,
        ctx: &StepContext<'_>,
        image: &str,
        registry: &str,
        secret: Option<&Secret>,
    ) -> Result<String>;
}

#[async_trait]
pub trait VulnerabilityScanner: Send + Sync {
    async fn scan(&self, ctx: &StepContext<'_>, target: &str) -> Result<ScanReport>;
}

#[async_trait]
pub trait StaticAnalysis: Send + Sync {
    /// Runs the analysis; returns a report reference for [`wait_for_gate`](Self::wait_for_gate)
    async fn analyze(
        &self,
        ctx: &StepContext<'_>,
        project: &str,
        secret: Option<&Secret>,
    ) -> Result<String>;

    async fn wait_for_gate(
        &self,
        ctx: &StepContext<'_>,
        report: &str,
        timeout: Duration,
        secret: Option<&Secret>,
    ) -> Result<GateStatus>;
}

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Uploads an artifact; returns where it was stored
    async fn publish(
        &self,
        ctx: &StepContext<'_>,
        artifact: &str,
        secret: Option<&Secret>,
    ) -> Result<String>;
}

#[async_trait]
pub trait GitOpsRepository: Send + Sync {
    /// Points the manifest at `path` to image `tag`; returns the commit
    async fn update_manifest(
        &self,
        ctx: &StepContext<'_>,
        repo: &str,
        path: &str,
        tag: &str,
        secret: Option<&Secret>,
    ) -> Result<String>;
}

#[async_trait]
pub trait ClusterReconciler: Send + Sync {
    /// Triggers a sync; returns the synced revision
    async fn sync(&self, ctx: &StepContext<'_>, app: &str, secret: Option<&Secret>) -> Result<String>;

    async fn wait_healthy(
        &self,
        ctx: &StepContext<'_>,
        app: &str,
        timeout: Duration,
        secret: Option<&Secret>,
    ) -> Result<Health>;
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Applies a manifest; returns the tool's summary of changed objects
    async fn apply_manifest(
        &self,
        ctx: &StepContext<'_>,
        manifest: &str,
        namespace: Option<&str>,
        secret: Option<&Secret>,
    ) -> Result<String>;

    async fn rollout_status(
        &self,
        ctx: &StepContext<'_>,
        deployment: &str,
        namespace: &str,
        timeout: Duration,
        secret: Option<&Secret>,
    ) -> Result<RolloutStatus>;

    async fn get_pods(
        &self,
        ctx: &StepContext<'_>,
        selector: &str,
        namespace: &str,
        secret: Option<&Secret>,
    ) -> Result<Vec<PodInfo>>;
}

#[async_trait]
pub trait ShellRunner: Send + Sync {
    /// Runs a command; returns its standard output
    async fn run(
        &self,
        ctx: &StepContext<'_>,
        command: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<String>;
}

// =============================================================================
// Toolchain
// =============================================================================

/// One implementation of every collaborator
#[derive(Clone)]
pub struct Toolchain {
    pub build: Arc<dyn BuildRunner>,
    pub images: Arc<dyn ImageBuilder>,
    pub scanner: Arc<dyn VulnerabilityScanner>,
    pub analysis: Arc<dyn StaticAnalysis>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub gitops: Arc<dyn GitOpsRepository>,
    pub reconciler: Arc<dyn ClusterReconciler>,
    pub cluster: Arc<dyn ClusterApi>,
    pub shell: Arc<dyn ShellRunner>,
}

impl Toolchain {
    /// Adapters over mvn, docker, trivy, sonar-scanner, Nexus, git, argocd,
    /// kubectl and sh
    pub fn cli(config: &ToolConfig) -> Self {
        let runner = CommandRunner::new(config.workspace.clone());
        let http = reqwest::Client::new();

        Self {
            build: Arc::new(MavenBuildRunner::new(runner.clone())),
            images: Arc::new(DockerImageBuilder::new(runner.clone())),
            scanner: Arc::new(TrivyScanner::new(runner.clone())),
            analysis: Arc::new(SonarQubeAnalysis::new(
                runner.clone(),
                http.clone(),
                config.sonar_url.clone(),
            )),
            artifacts: Arc::new(NexusRepository::new(
                http,
                config.workspace.clone(),
                config.nexus_url.clone(),
            )),
            gitops: Arc::new(GitManifestRepository::new(runner.clone())),
            reconciler: Arc::new(ArgoCdReconciler::new(
                runner.clone(),
                config.argocd_server.clone(),
            )),
            cluster: Arc::new(KubectlCluster::new(runner.clone())),
            shell: Arc::new(ShRunner::new(runner)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_parsing() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Unknown);
        assert_eq!("medium".parse::<Severity>(), Ok(Severity::Medium));
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn test_scan_report_threshold() {
        let report = ScanReport {
            report: "trivy.json".to_string(),
            findings: BTreeMap::from([
                (Severity::Low, 10),
                (Severity::High, 2),
                (Severity::Critical, 1),
            ]),
        };
        assert_eq!(report.at_or_above(Severity::High), 3);
        assert_eq!(report.at_or_above(Severity::Critical), 1);
        assert_eq!(report.at_or_above(Severity::Unknown), 13);
        assert_eq!(report.summary(), "CRITICAL=1,HIGH=2,LOW=10");
    }
}
