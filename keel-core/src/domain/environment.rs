//! Environment binding types

use serde::{Deserialize, Serialize};

/// Deployment target selected by branch pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentBinding {
    /// Branch glob such as `main` or `feature/*`
    pub pattern: String,
    pub name: String,
    pub namespace: String,
    pub manifest: String,
    /// Image tag template rendered per run, e.g. `myapp:${run.number}`
    pub image_tag: Option<String>,
}

/// Ordered binding rules plus the fallback used when no rule matches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentTable {
    pub rules: Vec<EnvironmentBinding>,
    pub fallback: Option<EnvironmentBinding>,
}

impl EnvironmentTable {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.fallback.is_none()
    }

    /// Every binding, rules first, fallback last
    pub fn bindings(&self) -> impl Iterator<Item = &EnvironmentBinding> {
        self.rules.iter().chain(self.fallback.iter())
    }
}
