//! Execution context for pipeline runs
//!
//! Holds the state shared by every step of one run:
//! - Log buffer, drained into the run store after each step
//! - Outputs published by finished steps
//!
//! Secret values to redact are held by [`StepContext`], never by the run.

use keel_core::Result;
use keel_core::domain::{EnvironmentBinding, LogEntry, LogLevel, StepDescriptor};
use keel_core::template::TemplateScope;
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

const REDACTED: &str = "****";

/// Execution context of one run
pub struct RunContext {
    pub run_id: Uuid,
    pub number: u64,
    pub pipeline: String,
    pub branch: String,
    pub binding: EnvironmentBinding,
    /// `binding.image_tag` rendered for this run
    pub image_tag: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub vars: BTreeMap<String, String>,

    log_buffer: Mutex<Vec<LogEntry>>,

    /// step name -> output name -> value, written once per step
    outputs: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        number: u64,
        pipeline: impl Into<String>,
        branch: impl Into<String>,
        binding: EnvironmentBinding,
        parameters: BTreeMap<String, String>,
        vars: BTreeMap<String, String>,
    ) -> Self {
        Self {
            run_id,
            number,
            pipeline: pipeline.into(),
            branch: branch.into(),
            binding,
            image_tag: None,
            parameters,
            vars,
            log_buffer: Mutex::new(Vec::new()),
            outputs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn log(&self, level: LogLevel, step: Option<&str>, message: impl AsRef<str>) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now(),
            level,
            step: step.map(str::to_string),
            message: message.as_ref().to_string(),
        };
        let mut buffer = self.log_buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(entry);
    }

    pub fn log_info(&self, step: Option<&str>, message: impl AsRef<str>) {
        self.log(LogLevel::Info, step, message);
    }

    pub fn log_warning(&self, step: Option<&str>, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, step, message);
    }

    pub fn log_error(&self, step: Option<&str>, message: impl AsRef<str>) {
        self.log(LogLevel::Error, step, message);
    }

    /// Drains all log entries from the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        let mut buffer = self.log_buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }

    /// Publishes the outputs of a finished step
    ///
    /// Outputs are immutable once published; a second publication for the
    /// same step is ignored and returns `false`.
    pub fn publish_outputs(&self, step: &str, values: BTreeMap<String, String>) -> bool {
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        if outputs.contains_key(step) {
            return false;
        }
        outputs.insert(step.to_string(), values);
        true
    }

    pub fn output(&self, step: &str, name: &str) -> Option<String> {
        let outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.get(step).and_then(|o| o.get(name)).cloned()
    }

    /// Template scope at this point of the run
    pub fn scope(&self) -> TemplateScope {
        let mut scope = TemplateScope::new();
        scope.insert("branch", self.branch.clone());
        scope.insert("run.number", self.number.to_string());
        scope.insert("run.id", self.run_id.to_string());
        scope.insert("pipeline", self.pipeline.clone());
        scope.insert("env.name", self.binding.name.clone());
        scope.insert("env.namespace", self.binding.namespace.clone());
        scope.insert("env.manifest", self.binding.manifest.clone());
        if let Some(tag) = &self.image_tag {
            scope.insert("env.image_tag", tag.clone());
        }
        scope.extend_prefixed("vars", &self.vars);
        scope.extend_prefixed("params", &self.parameters);

        let outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        for (step, values) in outputs.iter() {
            scope.extend_prefixed(&format!("steps.{}", step), values);
        }
        scope
    }
}

/// View of the run handed to collaborators while a step executes
///
/// Owns the secret values registered by the current attempt. Everything
/// logged through it is redacted against them.
pub struct StepContext<'a> {
    pub run: &'a RunContext,
    pub step: &'a StepDescriptor,
    secrets: Mutex<Vec<String>>,
}

impl<'a> StepContext<'a> {
    pub fn new(run: &'a RunContext, step: &'a StepDescriptor) -> Self {
        Self {
            run,
            step,
            secrets: Mutex::new(Vec::new()),
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.run.log_info(Some(&self.step.name), self.redact(message.as_ref()));
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.run.log_warning(Some(&self.step.name), self.redact(message.as_ref()));
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.run.log_error(Some(&self.step.name), self.redact(message.as_ref()));
    }

    /// Registers a value that must never appear in logs or results
    pub fn register_secret(&self, value: &str) {
        if value.is_empty() {
            return;
        }
        let mut secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        if !secrets.iter().any(|s| s == value) {
            secrets.push(value.to_string());
        }
    }

    pub fn redact(&self, text: &str) -> String {
        let secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }

    /// Attempt outcome with every registered secret redacted
    pub fn redact_outcome(
        &self,
        outcome: Result<BTreeMap<String, String>>,
    ) -> Result<BTreeMap<String, String>> {
        match outcome {
            Ok(values) => Ok(values
                .into_iter()
                .map(|(name, value)| (name, self.redact(&value)))
                .collect()),
            Err(err) => Err(err.map_message(|message| self.redact(message))),
        }
    }

    /// Drops the secret values registered so far
    pub fn forget_secrets(&self) {
        let mut secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        secrets.clear();
    }
}
