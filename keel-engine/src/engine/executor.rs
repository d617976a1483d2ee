use chrono::Utc;
use keel_core::domain::{
    LogLevel, PipelineDefinition, PipelineRun, RunFailure, RunStatus, StepDescriptor, StepError,
    StepResult, StepStatus,
};
use keel_core::{KeelError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::state::{InvalidTransition, StepMachine};
use super::{PreparedRun, Shared};
use crate::cancel::CancelSignal;
use crate::context::{RunContext, StepContext};
use crate::dispatch::dispatch;
use crate::environment::condition_allows;
use crate::store;

/// Drives one run from `Pending` to a terminal status
pub(super) struct Executor<'a> {
    shared: &'a Shared,
    definition: Arc<PipelineDefinition>,
    run: PipelineRun,
    ctx: RunContext,
    cancel: CancelSignal,
}

/// How the main sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Running,
    Halted,
    Aborted,
}

impl<'a> Executor<'a> {
    pub(super) fn new(shared: &'a Shared, prepared: PreparedRun, cancel: CancelSignal) -> Self {
        let PreparedRun {
            definition,
            run,
            context,
        } = prepared;
        Self {
            shared,
            definition,
            run,
            ctx: context,
            cancel,
        }
    }

    pub(super) async fn run(mut self) -> PipelineRun {
        let definition = self.definition.clone();

        self.run.status = RunStatus::Running;
        info!(
            run_id = %self.run.id,
            pipeline = %self.run.pipeline,
            number = self.run.number,
            "Run started"
        );
        self.ctx.log_info(
            None,
            format!(
                "Run #{} of {} on {} deploying to {} ({})",
                self.run.number,
                self.run.pipeline,
                self.run.branch,
                self.ctx.binding.name,
                self.ctx.binding.namespace
            ),
        );
        if let Some(pool) = &self.shared.store {
            if let Err(e) = store::mark_running(pool, self.run.id).await {
                warn!(run_id = %self.run.id, error = %e, "Failed to mark run as running");
            }
        }

        let mut progress = Progress::Running;
        for step in &definition.steps {
            if progress == Progress::Running && self.cancel.is_cancelled() {
                self.ctx.log_warning(None, "Run cancelled");
                progress = Progress::Aborted;
            }

            let result = if progress == Progress::Running {
                self.run_step(step).await
            } else {
                StepResult::skipped(step)
            };

            match result.status {
                StepStatus::Failed => {
                    progress = Progress::Halted;
                    if self.run.failure.is_none() {
                        self.run.failure = result.error.as_ref().map(|error| RunFailure {
                            step: step.name.clone(),
                            kind: error.kind,
                            message: error.message.clone(),
                        });
                    }
                }
                StepStatus::Aborted => progress = Progress::Aborted,
                _ => {}
            }

            self.record(result, false).await;
        }

        if progress == Progress::Halted && !definition.rollback.is_empty() {
            self.ctx.log_warning(
                None,
                format!("Running {} rollback step(s)", definition.rollback.len()),
            );
            for step in &definition.rollback {
                let result = if self.cancel.is_cancelled() {
                    StepResult::skipped(step)
                } else {
                    self.run_step(step).await
                };
                if result.status == StepStatus::Aborted {
                    progress = Progress::Aborted;
                }
                self.record(result, true).await;
            }
        }

        self.run.status = match progress {
            Progress::Aborted => RunStatus::Aborted,
            Progress::Halted => RunStatus::Failed,
            Progress::Running => self.run.derive_status(),
        };
        self.run.completed_at = Some(Utc::now());

        let summary = format!(
            "Run #{} finished {}",
            self.run.number,
            self.run.status.as_str().to_ascii_uppercase()
        );
        match &self.run.failure {
            Some(failure) => self
                .ctx
                .log_error(None, format!("{}: {} failed: {}", summary, failure.step, failure.message)),
            None => self.ctx.log_info(None, &summary),
        }
        info!(
            run_id = %self.run.id,
            status = %self.run.status,
            failed_step = self.run.failed_step().unwrap_or(""),
            "Run finished"
        );

        self.flush_logs().await;
        if let Some(pool) = &self.shared.store {
            if let Err(e) = store::finalize_run(pool, &self.run).await {
                warn!(run_id = %self.run.id, error = %e, "Failed to finalize run");
            }
        }

        self.shared
            .notifier
            .notify(&self.run, &definition.notify)
            .await;

        self.run
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Runs one step through its state machine to a terminal result
    async fn run_step(&self, step: &StepDescriptor) -> StepResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let step_ctx = StepContext::new(&self.ctx, step);
        let mut machine = StepMachine::new();
        let mut outputs = BTreeMap::new();
        let mut failure = None;

        if !condition_allows(&step.when, &self.ctx.branch, &self.ctx.binding.name) {
            self.transition(step, machine.skip());
            step_ctx.info("Skipped, condition not met");
        } else if let Some(missing) = step.needs.iter().find(|n| !self.need_met(n)) {
            let err = KeelError::execution(format!(
                "input from step '{}' unavailable, it did not succeed",
                missing
            ));
            step_ctx.error(err.to_string());
            self.transition(step, machine.fail());
            if step.continue_on_failure {
                self.transition(step, machine.tolerate());
            }
            failure = Some(err);
        } else {
            step_ctx.info(format!("Starting {} ({})", step.name, step.capability));
            let mut failures = 0u32;
            loop {
                let outcome = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(KeelError::Aborted),
                    outcome = self.attempt(&step_ctx, &mut machine) => outcome,
                };

                match outcome {
                    Ok(values) => {
                        self.transition(step, machine.succeed());
                        outputs = values;
                        break;
                    }
                    Err(KeelError::Aborted) => {
                        self.transition(step, machine.abort());
                        step_ctx.warn("Aborted");
                        failure = Some(KeelError::Aborted);
                        break;
                    }
                    Err(err) => {
                        failures += 1;
                        self.transition(step, machine.fail());
                        step_ctx.error(format!("Attempt {} failed: {}", failures, err));

                        if err.is_retryable() && failures <= step.retry.max_retries {
                            self.transition(step, machine.retry());
                            let delay = step.retry.delay_for(failures);
                            step_ctx.warn(format!(
                                "Retrying in {}ms ({} of {} retries)",
                                delay.as_millis(),
                                failures,
                                step.retry.max_retries
                            ));
                            let aborted = tokio::select! {
                                biased;
                                _ = self.cancel.cancelled() => true,
                                _ = tokio::time::sleep(delay) => false,
                            };
                            if aborted {
                                self.transition(step, machine.abort());
                                step_ctx.warn("Aborted while waiting to retry");
                                failure = Some(KeelError::Aborted);
                                break;
                            }
                            continue;
                        }

                        if step.continue_on_failure {
                            self.transition(step, machine.tolerate());
                            step_ctx.warn("Failure tolerated, continuing");
                        }
                        failure = Some(err);
                        break;
                    }
                }
            }
        }

        let result = StepResult {
            step: step.name.clone(),
            ordinal: step.ordinal,
            status: machine.state(),
            attempts: machine.attempts(),
            outputs,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            error: failure.as_ref().map(StepError::from),
        };

        if result.status.produced_outputs() {
            self.ctx.publish_outputs(&step.name, result.outputs.clone());
        }

        let level = match result.status {
            StepStatus::Failed | StepStatus::Aborted => LogLevel::Error,
            StepStatus::SucceededWithWarning => LogLevel::Warning,
            _ => LogLevel::Info,
        };
        self.ctx.log(
            level,
            Some(&step.name),
            format!("{} {} in {}ms", step.name, result.status, result.duration_ms),
        );
        info!(
            run_id = %self.run.id,
            step = %step.name,
            status = %result.status,
            attempts = result.attempts,
            duration_ms = result.duration_ms,
            "Step finished"
        );

        result
    }

    /// A needed step counts only once it has `Succeeded`
    fn need_met(&self, name: &str) -> bool {
        self.run
            .step(name)
            .or_else(|| self.run.rollback.iter().find(|r| r.step == name))
            .is_some_and(|r| r.status.produced_outputs())
    }

    /// One attempt: render, acquire, run under the step timeout, release
    ///
    /// Credentials and the secrets registered for redaction live only for the
    /// attempt. The outcome is redacted before both are dropped; dropping this
    /// future on cancellation drops them as well.
    async fn attempt(
        &self,
        step_ctx: &StepContext<'_>,
        machine: &mut StepMachine,
    ) -> Result<BTreeMap<String, String>> {
        let step = step_ctx.step;
        let params = self.ctx.scope().render_all(&step.params)?;

        let credentials = self.shared.credentials.acquire_all(&step.credentials).await?;
        for secret in credentials.secrets() {
            step_ctx.register_secret(secret.expose());
        }

        self.transition(step, machine.start());
        debug!(step = %step.name, attempt = machine.attempts(), "Attempt started");

        let outcome = match tokio::time::timeout(
            step.timeout(),
            dispatch(&self.shared.toolchain, step_ctx, &params, &credentials),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(KeelError::StepTimeout {
                timeout_ms: step.timeout_ms,
            }),
        };

        let outcome = step_ctx.redact_outcome(outcome);
        step_ctx.forget_secrets();
        credentials.release();
        outcome
    }

    fn transition(&self, step: &StepDescriptor, outcome: std::result::Result<(), InvalidTransition>) {
        if let Err(e) = outcome {
            error!(run_id = %self.run.id, step = %step.name, "{}", e);
        }
    }


    // =========================================================================
    // Persistence
    // =========================================================================

    async fn record(&mut self, result: StepResult, rollback: bool) {
        if let Some(pool) = &self.shared.store {
            if let Err(e) = store::append_step_result(pool, self.run.id, &result, rollback).await {
                warn!(run_id = %self.run.id, step = %result.step, error = %e, "Failed to store step result");
            }
        }
        self.flush_logs().await;

        if rollback {
            self.run.rollback.push(result);
        } else {
            self.run.record(result);
        }
    }

    /// Moves buffered run logs to the store and the process log
    async fn flush_logs(&self) {
        let entries = self.ctx.drain_logs();
        if entries.is_empty() {
            return;
        }

        for entry in &entries {
            let step = entry.step.as_deref().unwrap_or("-");
            match entry.level {
                LogLevel::Debug => debug!(run = self.run.number, step, "{}", entry.message),
                LogLevel::Info => info!(run = self.run.number, step, "{}", entry.message),
                LogLevel::Warning => warn!(run = self.run.number, step, "{}", entry.message),
                LogLevel::Error => error!(run = self.run.number, step, "{}", entry.message),
            }
        }

        if let Some(pool) = &self.shared.store {
            if let Err(e) = store::append_logs(pool, self.run.id, &entries).await {
                warn!(run_id = %self.run.id, error = %e, "Failed to store run logs");
            }
        }
    }
}
