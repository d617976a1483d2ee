//! Pipeline definition types

use serde::{Deserialize, Serialize};

use super::environment::EnvironmentTable;
use super::notification::NotificationTarget;
use super::step::StepDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDeclaration {
    pub name: String,
    pub description: Option<String>,
}

/// Validated pipeline definition
///
/// Output of the definition loader: ordered steps plus the global
/// configuration shared by every run of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub description: Option<String>,
    pub credentials: Vec<CredentialDeclaration>,
    pub environments: EnvironmentTable,
    pub notify: Vec<NotificationTarget>,
    pub steps: Vec<StepDescriptor>,
    /// Steps run best-effort after a blocking failure
    pub rollback: Vec<StepDescriptor>,
}

impl PipelineDefinition {
    pub fn step(&self, name: &str) -> Option<&StepDescriptor> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn declares_credential(&self, name: &str) -> bool {
        self.credentials.iter().any(|c| c.name == name)
    }
}
