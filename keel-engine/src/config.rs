//! Engine configuration
//!
//! Defines every tunable of the engine: default step bounds, where
//! credentials and run history live, the external tool endpoints and the
//! variables handed to definitions. Built once at startup and passed down
//! explicitly.

use keel_lua::LoaderConfig;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of environment variables exposed to definitions as `vars`
pub const VAR_PREFIX: &str = "KEEL_VAR_";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite URL for run history, `None` keeps runs in memory only
    pub database_url: Option<String>,

    /// Directory read by the file credential store
    pub credentials_dir: PathBuf,

    /// Timeout of steps that do not declare one
    pub step_timeout: Duration,

    /// Upper bound on any step's retry count
    pub max_retries: u32,

    /// Delay between attempts when a retry policy sets none
    pub retry_delay: Duration,

    /// Variables visible to definitions
    pub vars: BTreeMap<String, String>,

    pub tools: ToolConfig,

    pub notify: NotifyConfig,
}

/// Endpoints and working directory of the CLI/HTTP collaborators
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Directory commands run in and reports are written to
    pub workspace: PathBuf,
    pub sonar_url: Option<String>,
    pub nexus_url: Option<String>,
    pub argocd_server: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub sendmail: PathBuf,
    pub mail_from: String,
    pub mail_timeout: Duration,
    pub webhook_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            credentials_dir: PathBuf::from(".keel/credentials"),
            step_timeout: Duration::from_secs(600),
            max_retries: 10,
            retry_delay: Duration::from_secs(10),
            vars: BTreeMap::new(),
            tools: ToolConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            sonar_url: None,
            nexus_url: None,
            argocd_server: None,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sendmail: PathBuf::from("/usr/sbin/sendmail"),
            mail_from: "keel@localhost".to_string(),
            mail_timeout: Duration::from_secs(30),
            webhook_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Creates configuration from the process environment
    ///
    /// Recognized variables:
    /// - KEEL_DATABASE_URL (optional, e.g. sqlite://.keel/runs.db?mode=rwc)
    /// - KEEL_CREDENTIALS_DIR (optional, default: .keel/credentials)
    /// - KEEL_STEP_TIMEOUT (optional, seconds, default: 600)
    /// - KEEL_MAX_RETRIES (optional, default: 10)
    /// - KEEL_RETRY_DELAY (optional, seconds, default: 10)
    /// - KEEL_WORKSPACE (optional, default: .)
    /// - KEEL_SONAR_URL, KEEL_NEXUS_URL, KEEL_ARGOCD_SERVER (optional)
    /// - KEEL_SENDMAIL (optional, default: /usr/sbin/sendmail)
    /// - KEEL_MAIL_FROM (optional, default: keel@localhost)
    /// - KEEL_MAIL_TIMEOUT (optional, seconds, default: 30)
    /// - KEEL_WEBHOOK_TIMEOUT (optional, seconds, default: 10)
    /// - KEEL_VAR_<NAME> (any number, exposed to definitions as vars.NAME)
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Same as [`from_env`](Self::from_env) over an explicit variable list
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: BTreeMap<String, String> = vars.into_iter().collect();
        let get = |key: &str| env.get(key).filter(|v| !v.is_empty()).cloned();
        let secs = |key: &str| {
            get(key)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        let defaults = Self::default();

        let definition_vars = env
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(VAR_PREFIX)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();

        Self {
            database_url: get("KEEL_DATABASE_URL"),
            credentials_dir: get("KEEL_CREDENTIALS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.credentials_dir),
            step_timeout: secs("KEEL_STEP_TIMEOUT").unwrap_or(defaults.step_timeout),
            max_retries: get("KEEL_MAX_RETRIES")
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            retry_delay: secs("KEEL_RETRY_DELAY").unwrap_or(defaults.retry_delay),
            vars: definition_vars,
            tools: ToolConfig {
                workspace: get("KEEL_WORKSPACE")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.tools.workspace),
                sonar_url: get("KEEL_SONAR_URL"),
                nexus_url: get("KEEL_NEXUS_URL"),
                argocd_server: get("KEEL_ARGOCD_SERVER"),
            },
            notify: NotifyConfig {
                sendmail: get("KEEL_SENDMAIL")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.notify.sendmail),
                mail_from: get("KEEL_MAIL_FROM").unwrap_or(defaults.notify.mail_from),
                mail_timeout: secs("KEEL_MAIL_TIMEOUT").unwrap_or(defaults.notify.mail_timeout),
                webhook_timeout: secs("KEEL_WEBHOOK_TIMEOUT")
                    .unwrap_or(defaults.notify.webhook_timeout),
            },
        }
    }

    /// Adds a definition variable
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Loader settings derived from this configuration
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            vars: self.vars.clone(),
            default_timeout: self.step_timeout,
            default_retry_delay: self.retry_delay,
            max_retries: self.max_retries,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.step_timeout.is_zero() {
            anyhow::bail!("step_timeout must be greater than 0");
        }

        if self.max_retries > 100 {
            anyhow::bail!("max_retries must not exceed 100");
        }

        for (name, url) in [
            ("sonar_url", &self.tools.sonar_url),
            ("nexus_url", &self.tools.nexus_url),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    anyhow::bail!("{} must start with http:// or https://", name);
                }
            }
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("sqlite:") {
                anyhow::bail!("database_url must be a sqlite: URL");
            }
        }

        if !self.notify.mail_from.contains('@') {
            anyhow::bail!("mail_from must be a mail address");
        }

        Ok(())
    }
}
