//! Loader configuration
//!
//! Everything a definition may depend on is passed in explicitly. Nothing is
//! read from process-wide state while loading.

use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Variables visible to `vars.*` and `${vars.NAME}`
    pub vars: BTreeMap<String, String>,
    /// Timeout of steps that do not set one
    pub default_timeout: Duration,
    /// Delay between attempts when a retry policy sets none
    pub default_retry_delay: Duration,
    /// Upper bound on any step's retry count
    pub max_retries: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            vars: BTreeMap::new(),
            default_timeout: Duration::from_secs(600),
            default_retry_delay: Duration::from_secs(10),
            max_retries: 10,
        }
    }
}

impl LoaderConfig {
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}
