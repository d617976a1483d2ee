//! Capabilities a step can invoke
//!
//! A capability names one operation on an external collaborator (build tool,
//! image registry, scanner, cluster, ...). The loader checks a step's `with`
//! parameters against the table below before anything runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "build")]
    Build,
    #[serde(rename = "image.build")]
    ImageBuild,
    #[serde(rename = "image.push")]
    ImagePush,
    #[serde(rename = "scan")]
    Scan,
    #[serde(rename = "analysis.run")]
    AnalysisRun,
    #[serde(rename = "analysis.gate")]
    AnalysisGate,
    #[serde(rename = "artifact.publish")]
    ArtifactPublish,
    #[serde(rename = "gitops.update")]
    GitOpsUpdate,
    #[serde(rename = "reconciler.sync")]
    ReconcilerSync,
    #[serde(rename = "reconciler.wait_healthy")]
    ReconcilerWaitHealthy,
    #[serde(rename = "cluster.apply")]
    ClusterApply,
    #[serde(rename = "cluster.rollout_status")]
    ClusterRolloutStatus,
    #[serde(rename = "cluster.get_pods")]
    ClusterGetPods,
    #[serde(rename = "shell")]
    Shell,
}

impl Capability {
    pub const ALL: [Capability; 14] = [
        Capability::Build,
        Capability::ImageBuild,
        Capability::ImagePush,
        Capability::Scan,
        Capability::AnalysisRun,
        Capability::AnalysisGate,
        Capability::ArtifactPublish,
        Capability::GitOpsUpdate,
        Capability::ReconcilerSync,
        Capability::ReconcilerWaitHealthy,
        Capability::ClusterApply,
        Capability::ClusterRolloutStatus,
        Capability::ClusterGetPods,
        Capability::Shell,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Build => "build",
            Capability::ImageBuild => "image.build",
            Capability::ImagePush => "image.push",
            Capability::Scan => "scan",
            Capability::AnalysisRun => "analysis.run",
            Capability::AnalysisGate => "analysis.gate",
            Capability::ArtifactPublish => "artifact.publish",
            Capability::GitOpsUpdate => "gitops.update",
            Capability::ReconcilerSync => "reconciler.sync",
            Capability::ReconcilerWaitHealthy => "reconciler.wait_healthy",
            Capability::ClusterApply => "cluster.apply",
            Capability::ClusterRolloutStatus => "cluster.rollout_status",
            Capability::ClusterGetPods => "cluster.get_pods",
            Capability::Shell => "shell",
        }
    }

    /// Parameters that must be present in the step's `with` table
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Capability::Build => &["project"],
            Capability::ImageBuild => &["context", "tag"],
            Capability::ImagePush => &["image", "registry", "credential"],
            Capability::Scan => &["target"],
            Capability::AnalysisRun => &["project"],
            Capability::AnalysisGate => &["report"],
            Capability::ArtifactPublish => &["artifact", "credential"],
            Capability::GitOpsUpdate => &["repo", "path", "tag", "credential"],
            Capability::ReconcilerSync => &["app", "credential"],
            Capability::ReconcilerWaitHealthy => &["app"],
            Capability::ClusterApply => &["manifest"],
            Capability::ClusterRolloutStatus => &["deployment", "namespace"],
            Capability::ClusterGetPods => &["selector", "namespace"],
            Capability::Shell => &["command"],
        }
    }

    pub fn optional_params(&self) -> &'static [&'static str] {
        match self {
            Capability::Scan => &["severity"],
            Capability::AnalysisRun => &["credential"],
            Capability::AnalysisGate => &["timeout", "credential"],
            Capability::ReconcilerWaitHealthy => &["timeout", "credential"],
            Capability::ClusterApply => &["namespace", "credential"],
            Capability::ClusterRolloutStatus => &["timeout", "credential"],
            Capability::ClusterGetPods => &["credential"],
            _ => &[],
        }
    }

    /// Outputs the capability produces on success
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            Capability::Build => &["artifact", "test_report"],
            Capability::ImageBuild => &["image"],
            Capability::ImagePush => &["digest"],
            Capability::Scan => &["report", "findings"],
            Capability::AnalysisRun => &["report"],
            Capability::AnalysisGate => &["gate"],
            Capability::ArtifactPublish => &["location"],
            Capability::GitOpsUpdate => &["commit"],
            Capability::ReconcilerSync => &["sync_id"],
            Capability::ReconcilerWaitHealthy => &["health"],
            Capability::ClusterApply => &["applied"],
            Capability::ClusterRolloutStatus => &["rollout"],
            Capability::ClusterGetPods => &["pods", "count"],
            Capability::Shell => &["stdout"],
        }
    }

    pub fn accepts_param(&self, name: &str) -> bool {
        self.required_params().contains(&name) || self.optional_params().contains(&name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Capability::Build => "Build and test a project, producing an artifact",
            Capability::ImageBuild => "Build a container image from a context directory",
            Capability::ImagePush => "Push a container image to a registry",
            Capability::Scan => "Scan an image or directory for vulnerabilities",
            Capability::AnalysisRun => "Run static analysis on a project",
            Capability::AnalysisGate => "Wait for the static-analysis quality gate",
            Capability::ArtifactPublish => "Publish an artifact to a repository",
            Capability::GitOpsUpdate => "Update the image tag in a GitOps manifest",
            Capability::ReconcilerSync => "Trigger a sync of a reconciled application",
            Capability::ReconcilerWaitHealthy => "Wait for a reconciled application to become healthy",
            Capability::ClusterApply => "Apply a manifest to the cluster",
            Capability::ClusterRolloutStatus => "Wait for a deployment rollout to complete",
            Capability::ClusterGetPods => "List pods matching a selector",
            Capability::Shell => "Run a shell command",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown capability '{}'", s))
    }
}

/// Vulnerability severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "UNKNOWN",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNKNOWN" => Ok(Severity::Unknown),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every_capability_name() {
        for capability in Capability::ALL {
            assert_eq!(capability.as_str().parse::<Capability>(), Ok(capability));
        }
        assert!("deploy.everything".parse::<Capability>().is_err());
    }

    #[test]
    fn test_serde_uses_dotted_names() {
        let json = serde_json::to_string(&Capability::ClusterRolloutStatus).unwrap();
        assert_eq!(json, "\"cluster.rollout_status\"");
    }

    #[test]
    fn test_severity_parse_and_order() {
        assert_eq!("critical".parse::<Severity>(), Ok(Severity::Critical));
        assert_eq!("HIGH".parse::<Severity>(), Ok(Severity::High));
        assert!("SEVERE".parse::<Severity>().is_err());
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Unknown);
    }

    #[test]
    fn test_accepts_param() {
        assert!(Capability::Scan.accepts_param("target"));
        assert!(Capability::Scan.accepts_param("severity"));
        assert!(!Capability::Scan.accepts_param("registry"));
    }
}
