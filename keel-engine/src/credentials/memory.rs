//! In-memory credential store

use async_trait::async_trait;
use std::collections::HashMap;

use super::{CredentialError, CredentialStore, Secret};

/// Fixed set of secrets, used by tests and embedders
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialStore {
    secrets: HashMap<String, Secret>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, secret: Secret) -> Self {
        self.insert(name, secret);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, secret: Secret) {
        self.secrets.insert(name.into(), secret);
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn fetch(&self, name: &str) -> Result<Secret, CredentialError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(name.to_string()))
    }
}
