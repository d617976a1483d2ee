//! Credential resolution
//!
//! Secrets are fetched from a [`CredentialStore`] for each step attempt and
//! handed out as [`CredentialHandle`]s. A handle is released exactly once,
//! explicitly or on drop, so every exit path of an attempt (success,
//! failure, timeout, abort) gives the secret back. The resolver keeps a
//! ledger of acquisitions and releases.

mod file;
mod memory;

pub use file::FileCredentialStore;
pub use memory::StaticCredentialStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::KeelError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

// =============================================================================
// Secret
// =============================================================================

/// Secret material, never serialized and redacted in `Debug`
#[derive(Clone)]
pub struct Secret {
    username: Option<String>,
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            username: None,
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("username", &self.username)
            .field("value", &"****")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential '{0}' not found")]
    NotFound(String),

    #[error("credential '{name}' expired at {expired_at}")]
    Expired {
        name: String,
        expired_at: DateTime<Utc>,
    },

    #[error("credential store error for '{name}': {message}")]
    Backend { name: String, message: String },
}

impl From<CredentialError> for KeelError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotFound(name) => KeelError::CredentialNotFound(name),
            CredentialError::Expired { name, expired_at } => {
                KeelError::CredentialExpired { name, expired_at }
            }
            backend @ CredentialError::Backend { .. } => {
                KeelError::StepExecutionFailed(backend.to_string())
            }
        }
    }
}

/// Source of secret material
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Secret, CredentialError>;
}

// =============================================================================
// Resolver
// =============================================================================

#[derive(Debug, Default)]
struct Ledger {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Hands out scoped credential handles and tracks them
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
    ledger: Arc<Ledger>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            ledger: Arc::new(Ledger::default()),
        }
    }

    /// Fetches a credential and checks it has not expired
    pub async fn acquire(&self, name: &str) -> keel_core::Result<CredentialHandle> {
        let secret = self.store.fetch(name).await?;

        if let Some(expired_at) = secret.expires_at().filter(|_| secret.is_expired(Utc::now())) {
            return Err(CredentialError::Expired {
                name: name.to_string(),
                expired_at,
            }
            .into());
        }

        self.ledger.acquired.fetch_add(1, Ordering::SeqCst);
        debug!("Acquired credential '{}'", name);

        Ok(CredentialHandle {
            name: name.to_string(),
            secret,
            ledger: self.ledger.clone(),
            released: false,
        })
    }

    /// Acquires every credential of an attempt
    ///
    /// On failure the handles acquired so far are released before returning.
    pub async fn acquire_all(&self, names: &[String]) -> keel_core::Result<AttemptCredentials> {
        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            handles.push(self.acquire(name).await?);
        }
        Ok(AttemptCredentials { handles })
    }

    pub fn acquired(&self) -> u64 {
        self.ledger.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.ledger.released.load(Ordering::SeqCst)
    }

    /// Handles acquired and not yet released
    pub fn active(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

/// A credential on loan for one step attempt
pub struct CredentialHandle {
    name: String,
    secret: Secret,
    ledger: Arc<Ledger>,
    released: bool,
}

impl CredentialHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    pub fn release(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.released {
            self.released = true;
            self.ledger.released.fetch_add(1, Ordering::SeqCst);
            debug!("Released credential '{}'", self.name);
        }
    }
}

impl Drop for CredentialHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("name", &self.name)
            .field("released", &self.released)
            .finish()
    }
}

/// Credentials held by one step attempt
#[derive(Debug, Default)]
pub struct AttemptCredentials {
    handles: Vec<CredentialHandle>,
}

impl AttemptCredentials {
    pub fn secret(&self, name: &str) -> Option<&Secret> {
        self.handles
            .iter()
            .find(|h| h.name() == name)
            .map(CredentialHandle::secret)
    }

    pub fn secrets(&self) -> impl Iterator<Item = &Secret> {
        self.handles.iter().map(CredentialHandle::secret)
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn release(self) {
        for handle in self.handles {
            handle.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn resolver() -> CredentialResolver {
        let store = StaticCredentialStore::new()
            .with("docker-hub", Secret::new("s3cret").with_username("ci"))
            .with(
                "old-token",
                Secret::new("abc").with_expiry(Utc::now() - Duration::hours(1)),
            );
        CredentialResolver::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_handle_released_once() {
        let resolver = resolver();
        let handle = resolver.acquire("docker-hub").await.unwrap();
        assert_eq!(handle.secret().expose(), "s3cret");
        assert_eq!(handle.secret().username(), Some("ci"));
        assert_eq!(resolver.active(), 1);

        handle.release();
        assert_eq!(resolver.acquired(), 1);
        assert_eq!(resolver.released(), 1);
        assert_eq!(resolver.active(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let resolver = resolver();
        {
            let _handle = resolver.acquire("docker-hub").await.unwrap();
            assert_eq!(resolver.active(), 1);
        }
        assert_eq!(resolver.active(), 0);
    }

    #[tokio::test]
    async fn test_missing_and_expired() {
        let resolver = resolver();
        let err = resolver.acquire("nope").await.unwrap_err();
        assert_eq!(err, KeelError::CredentialNotFound("nope".to_string()));

        let err = resolver.acquire("old-token").await.unwrap_err();
        assert!(matches!(err, KeelError::CredentialExpired { name, .. } if name == "old-token"));
        assert_eq!(resolver.acquired(), 0);
    }

    #[tokio::test]
    async fn test_acquire_all_releases_partial_on_failure() {
        let resolver = resolver();
        let names = vec!["docker-hub".to_string(), "nope".to_string()];
        assert!(resolver.acquire_all(&names).await.is_err());
        assert_eq!(resolver.acquired(), 1);
        assert_eq!(resolver.active(), 0);
    }

    #[test]
    fn test_debug_hides_value() {
        let secret = Secret::new("s3cret");
        assert!(!format!("{:?}", secret).contains("s3cret"));
    }
}
