//! Error taxonomy shared across Keel crates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeelError>;

/// Errors the loader, resolvers and engine report
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KeelError {
    /// Definition rejected before any step executes
    #[error("malformed pipeline definition: {0}")]
    MalformedDefinition(String),

    #[error("no environment matches branch '{branch}'")]
    NoEnvironmentMatch { branch: String },

    #[error("credential '{0}' not found")]
    CredentialNotFound(String),

    #[error("credential '{name}' expired at {expired_at}")]
    CredentialExpired {
        name: String,
        expired_at: DateTime<Utc>,
    },

    #[error("step timed out after {timeout_ms}ms")]
    StepTimeout { timeout_ms: u64 },

    /// Collaborator reported a failure
    #[error("{0}")]
    StepExecutionFailed(String),

    #[error("quality gate rejected: {0}")]
    GateRejected(String),

    #[error("deployment unhealthy: {0}")]
    DeploymentUnhealthy(String),

    #[error("run aborted")]
    Aborted,

    #[error("template error: {0}")]
    Template(String),

    #[error("store error: {0}")]
    Store(String),
}

/// Serializable tag of a [`KeelError`], recorded on step results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedDefinition,
    NoEnvironmentMatch,
    CredentialNotFound,
    CredentialExpired,
    StepTimeout,
    StepExecutionFailed,
    GateRejected,
    DeploymentUnhealthy,
    Aborted,
    Template,
    Store,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedDefinition => "malformed_definition",
            ErrorKind::NoEnvironmentMatch => "no_environment_match",
            ErrorKind::CredentialNotFound => "credential_not_found",
            ErrorKind::CredentialExpired => "credential_expired",
            ErrorKind::StepTimeout => "step_timeout",
            ErrorKind::StepExecutionFailed => "step_execution_failed",
            ErrorKind::GateRejected => "gate_rejected",
            ErrorKind::DeploymentUnhealthy => "deployment_unhealthy",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Template => "template",
            ErrorKind::Store => "store",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            ErrorKind::MalformedDefinition,
            ErrorKind::NoEnvironmentMatch,
            ErrorKind::CredentialNotFound,
            ErrorKind::CredentialExpired,
            ErrorKind::StepTimeout,
            ErrorKind::StepExecutionFailed,
            ErrorKind::GateRejected,
            ErrorKind::DeploymentUnhealthy,
            ErrorKind::Aborted,
            ErrorKind::Template,
            ErrorKind::Store,
        ]
        .into_iter()
        .find(|k| k.as_str() == s)
    }

    /// Transient failures against eventually-consistent systems
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::StepTimeout | ErrorKind::StepExecutionFailed | ErrorKind::DeploymentUnhealthy
        )
    }
}

impl KeelError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::StepExecutionFailed(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            KeelError::MalformedDefinition(_) => ErrorKind::MalformedDefinition,
            KeelError::NoEnvironmentMatch { .. } => ErrorKind::NoEnvironmentMatch,
            KeelError::CredentialNotFound(_) => ErrorKind::CredentialNotFound,
            KeelError::CredentialExpired { .. } => ErrorKind::CredentialExpired,
            KeelError::StepTimeout { .. } => ErrorKind::StepTimeout,
            KeelError::StepExecutionFailed(_) => ErrorKind::StepExecutionFailed,
            KeelError::GateRejected(_) => ErrorKind::GateRejected,
            KeelError::DeploymentUnhealthy(_) => ErrorKind::DeploymentUnhealthy,
            KeelError::Aborted => ErrorKind::Aborted,
            KeelError::Template(_) => ErrorKind::Template,
            KeelError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Rewrites the free-form message of failures reported by collaborators
    pub fn map_message(self, f: impl FnOnce(&str) -> String) -> Self {
        match self {
            KeelError::StepExecutionFailed(m) => KeelError::StepExecutionFailed(f(&m)),
            KeelError::GateRejected(m) => KeelError::GateRejected(f(&m)),
            KeelError::DeploymentUnhealthy(m) => KeelError::DeploymentUnhealthy(f(&m)),
            KeelError::Template(m) => KeelError::Template(f(&m)),
            other => other,
        }
    }

    /// Errors that must stop a run before any step executes
    pub fn is_pre_run(&self) -> bool {
        matches!(
            self,
            KeelError::MalformedDefinition(_) | KeelError::NoEnvironmentMatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(KeelError::StepTimeout { timeout_ms: 10 }.is_retryable());
        assert!(KeelError::execution("exit 1").is_retryable());
        assert!(KeelError::DeploymentUnhealthy("degraded".into()).is_retryable());
        assert!(!KeelError::CredentialNotFound("x".into()).is_retryable());
        assert!(!KeelError::GateRejected("ERROR".into()).is_retryable());
        assert!(!KeelError::Aborted.is_retryable());
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        let kind = KeelError::GateRejected("x".into()).kind();
        assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
    }

    #[test]
    fn test_map_message_keeps_kind() {
        let err = KeelError::GateRejected("token abc".into()).map_message(|m| m.replace("abc", "****"));
        assert_eq!(err, KeelError::GateRejected("token ****".into()));
        assert_eq!(KeelError::Aborted.map_message(|_| "x".into()), KeelError::Aborted);
    }

    #[test]
    fn test_execution_failure_message_is_verbatim() {
        let err = KeelError::execution("kubectl apply exited with status 1");
        assert_eq!(err.to_string(), "kubectl apply exited with status 1");
    }
}
