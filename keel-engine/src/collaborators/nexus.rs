use async_trait::async_trait;
use keel_core::{KeelError, Result};
use std::path::{Path, PathBuf};

use super::ArtifactRepository;
use crate::context::StepContext;
use crate::credentials::Secret;

/// Raw upload to a Nexus repository path
///
/// The configured URL points at the target directory, e.g.
/// `https://nexus.local/repository/releases/com/acme/petclinic`; the
/// artifact is stored under its file name.
pub struct NexusRepository {
    http: reqwest::Client,
    workspace: PathBuf,
    url: Option<String>,
}

impl NexusRepository {
    pub fn new(http: reqwest::Client, workspace: PathBuf, url: Option<String>) -> Self {
        Self {
            http,
            workspace,
            url,
        }
    }
}

pub fn upload_url(base: &str, artifact: &Path) -> Option<String> {
    let name = artifact.file_name()?.to_str()?;
    Some(format!("{}/{}", base.trim_end_matches('/'), name))
}

#[async_trait]
impl ArtifactRepository for NexusRepository {
    async fn publish(
        &self,
        ctx: &StepContext<'_>,
        artifact: &str,
        secret: Option<&Secret>,
    ) -> Result<String> {
        let base = self
            .url
            .as_deref()
            .ok_or_else(|| KeelError::execution("KEEL_NEXUS_URL is not configured"))?;

        let path = self.workspace.join(artifact);
        let location = upload_url(base, &path)
            .ok_or_else(|| KeelError::execution(format!("invalid artifact path '{}'", artifact)))?;
        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| KeelError::execution(format!("cannot read {}: {}", path.display(), e)))?;

        ctx.info(format!("Uploading {} ({} bytes) to {}", artifact, body.len(), location));

        let mut request = self.http.put(&location).body(body);
        if let Some(secret) = secret {
            request = request.basic_auth(secret.username().unwrap_or("admin"), Some(secret.expose()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| KeelError::execution(format!("upload to {} failed: {}", location, e)))?;
        if !response.status().is_success() {
            return Err(KeelError::execution(format!(
                "upload to {} returned {}",
                location,
                response.status()
            )));
        }

        Ok(location)
    }
}
