//! Directory-backed credential store
//!
//! Layout, one credential per name:
//! - `<dir>/<name>`: the secret value, trailing newline trimmed
//! - `<dir>/<name>.username`: optional username
//! - `<dir>/<name>.expires`: optional RFC 3339 expiry timestamp

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{CredentialError, CredentialStore, Secret};

#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_optional(&self, file: &Path, name: &str) -> Result<Option<String>, CredentialError> {
        match tokio::fs::read_to_string(file).await {
            Ok(content) => Ok(Some(content.trim_end_matches(['\r', '\n']).to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CredentialError::Backend {
                name: name.to_string(),
                message: format!("cannot read {}: {}", file.display(), e),
            }),
        }
    }
}

/// Names map to file names, so path separators and leading dots are refused
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn fetch(&self, name: &str) -> Result<Secret, CredentialError> {
        if !valid_name(name) {
            return Err(CredentialError::Backend {
                name: name.to_string(),
                message: "invalid credential name".to_string(),
            });
        }

        let value = self
            .read_optional(&self.dir.join(name), name)
            .await?
            .ok_or_else(|| CredentialError::NotFound(name.to_string()))?;
        let mut secret = Secret::new(value);

        if let Some(username) = self
            .read_optional(&self.dir.join(format!("{}.username", name)), name)
            .await?
        {
            secret = secret.with_username(username.trim());
        }

        if let Some(expires) = self
            .read_optional(&self.dir.join(format!("{}.expires", name)), name)
            .await?
        {
            let expires_at = DateTime::parse_from_rfc3339(expires.trim())
                .map_err(|e| CredentialError::Backend {
                    name: name.to_string(),
                    message: format!("invalid expiry '{}': {}", expires.trim(), e),
                })?
                .with_timezone(&Utc);
            secret = secret.with_expiry(expires_at);
        }

        Ok(secret)
    }
}
