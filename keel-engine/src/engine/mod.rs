//! Execution engine
//!
//! [`Engine::prepare`] turns a definition plus a trigger into a recorded,
//! pending run; [`Engine::execute`] drives its steps in declared order.
//! An engine is cheap to clone and may execute many runs at once; each run
//! owns its [`RunContext`] and nothing mutable is shared between runs.

mod executor;
pub mod state;

#[cfg(test)]
pub(crate) mod tests;

use anyhow::Context;
use keel_core::domain::{PipelineDefinition, PipelineRun};
use keel_core::{KeelError, Result};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::collaborators::Toolchain;
use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::credentials::{CredentialResolver, FileCredentialStore};
use crate::environment::{EnvironmentResolver, normalize_branch};
use crate::notifier::Notifier;
use crate::store;

pub use state::{InvalidTransition, StepMachine};

/// What started a run
#[derive(Debug, Clone, Default)]
pub struct Trigger {
    pub branch: String,
    pub parameters: BTreeMap<String, String>,
}

impl Trigger {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// A run that has a number and an environment but has not started
pub struct PreparedRun {
    pub definition: Arc<PipelineDefinition>,
    pub run: PipelineRun,
    context: RunContext,
}

impl PreparedRun {
    pub fn id(&self) -> Uuid {
        self.run.id
    }

    /// Image tag rendered from the environment binding
    pub fn image_tag(&self) -> Option<&str> {
        self.context.image_tag.as_deref()
    }
}

struct Shared {
    config: EngineConfig,
    toolchain: Toolchain,
    credentials: CredentialResolver,
    notifier: Notifier,
    store: Option<SqlitePool>,
    /// Last number handed out per pipeline; held while a run is inserted
    numbers: Mutex<HashMap<String, u64>>,
}

#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        toolchain: Toolchain,
        credentials: CredentialResolver,
        notifier: Notifier,
        store: Option<SqlitePool>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                toolchain,
                credentials,
                notifier,
                store,
                numbers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Engine wired to the command-line toolchain, file credentials and,
    /// when a database URL is configured, the SQLite run store
    pub async fn from_config(config: EngineConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let store = match &config.database_url {
            Some(url) => {
                let pool = store::create_pool(url)
                    .await
                    .with_context(|| format!("Failed to open run store at {}", url))?;
                store::run_migrations(&pool)
                    .await
                    .context("Failed to run store migrations")?;
                Some(pool)
            }
            None => None,
        };

        let toolchain = Toolchain::cli(&config.tools);
        let credentials =
            CredentialResolver::new(Arc::new(FileCredentialStore::new(config.credentials_dir.clone())));
        let notifier = Notifier::new(&config.notify);

        Ok(Self::new(config, toolchain, credentials, notifier, store))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn credentials(&self) -> &CredentialResolver {
        &self.shared.credentials
    }

    pub fn store(&self) -> Option<&SqlitePool> {
        self.shared.store.as_ref()
    }

    /// Resolves the environment, numbers and records a pending run
    ///
    /// # Errors
    /// `NoEnvironmentMatch` when the branch has no binding, `Template` when
    /// the binding's image tag does not render and `Store` when the run
    /// cannot be recorded. Nothing has executed in any of these cases.
    pub async fn prepare(
        &self,
        definition: Arc<PipelineDefinition>,
        trigger: Trigger,
    ) -> Result<PreparedRun> {
        let branch = normalize_branch(&trigger.branch).to_string();
        let binding = EnvironmentResolver::new(&definition.environments)
            .resolve(&branch)?
            .clone();

        let mut numbers = self.shared.numbers.lock().await;
        let mut number = numbers.get(&definition.name).map_or(1, |n| n + 1);
        if let Some(pool) = &self.shared.store {
            let stored = store::next_run_number(pool, &definition.name)
                .await
                .map_err(store_error)?;
            number = number.max(stored);
        }

        let run = PipelineRun::new(
            number,
            definition.name.clone(),
            branch.clone(),
            binding.name.clone(),
            trigger.parameters.clone(),
        );
        let mut context = RunContext::new(
            run.id,
            number,
            definition.name.clone(),
            branch,
            binding,
            trigger.parameters,
            self.shared.config.vars.clone(),
        );
        if let Some(template) = context.binding.image_tag.clone() {
            context.image_tag = Some(context.scope().render(&template)?);
        }

        if let Some(pool) = &self.shared.store {
            store::insert_run(pool, &run).await.map_err(store_error)?;
        }
        numbers.insert(definition.name.clone(), number);
        drop(numbers);

        info!(
            run_id = %run.id,
            pipeline = %run.pipeline,
            number = run.number,
            branch = %run.branch,
            environment = %run.environment,
            "Run prepared"
        );

        Ok(PreparedRun {
            definition,
            run,
            context,
        })
    }

    /// Executes a prepared run to completion and notifies its targets
    pub async fn execute(&self, prepared: PreparedRun, cancel: CancelSignal) -> PipelineRun {
        executor::Executor::new(&self.shared, prepared, cancel).run().await
    }

    /// Prepares and executes a run that cannot be cancelled
    pub async fn run(
        &self,
        definition: Arc<PipelineDefinition>,
        trigger: Trigger,
    ) -> Result<PipelineRun> {
        let prepared = self.prepare(definition, trigger).await?;
        Ok(self.execute(prepared, CancelSignal::never()).await)
    }
}

fn store_error(err: sqlx::Error) -> KeelError {
    KeelError::Store(err.to_string())
}
