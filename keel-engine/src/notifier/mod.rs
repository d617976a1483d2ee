//! Run notifications
//!
//! One [`RunReport`] is built per finalized run and sent once to every
//! target whose status filter matches. Delivery is best-effort: failures are
//! logged and never touch the run.

mod mail;
mod webhook;

pub use mail::{SendmailChannel, format_message};
pub use webhook::{LogChannel, WebhookChannel, WebhookPayload};

use async_trait::async_trait;
use keel_core::domain::{ChannelKind, NotificationTarget, PipelineRun, StepResult};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;

/// A destination for run reports
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Subject and body describing a finalized run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub subject: String,
    pub body: String,
}

impl RunReport {
    pub fn from_run(run: &PipelineRun) -> Self {
        let status = run.status.as_str().to_ascii_uppercase();
        let subject = format!("[keel] {} #{} {}", run.pipeline, run.number, status);

        let mut body = String::new();
        let _ = writeln!(body, "Pipeline:    {} #{}", run.pipeline, run.number);
        let _ = writeln!(body, "Run:         {}", run.id);
        let _ = writeln!(body, "Branch:      {}", run.branch);
        let _ = writeln!(body, "Environment: {}", run.environment);
        let _ = writeln!(body, "Status:      {}", status);
        if let Some(ms) = run.duration_ms() {
            let _ = writeln!(body, "Duration:    {}", format_duration(ms.max(0) as u64));
        }
        if let Some(failure) = &run.failure {
            let _ = writeln!(body, "Failed step: {}", failure.step);
            let _ = writeln!(body, "Error:       {}", failure.message);
        }

        let _ = writeln!(body, "\nSteps:");
        write_steps(&mut body, &run.steps);
        if !run.rollback.is_empty() {
            let _ = writeln!(body, "\nRollback:");
            write_steps(&mut body, &run.rollback);
        }

        Self { subject, body }
    }
}

fn write_steps(body: &mut String, steps: &[StepResult]) {
    let width = steps.iter().map(|s| s.step.len()).max().unwrap_or(0);
    for step in steps {
        let _ = write!(body, "  {:<width$}  {}", step.step, step.status, width = width);
        if step.attempts > 1 {
            let _ = write!(body, " after {} attempts", step.attempts);
        }
        if step.attempts > 0 {
            let _ = write!(body, " ({})", format_duration(step.duration_ms));
        }
        if let Some(error) = &step.error {
            let _ = write!(body, ": {}", error.message);
        }
        body.push('\n');
    }
}

/// `850ms`, `12.4s` or `3m07s`
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

/// Routes reports to the channel of each target
#[derive(Clone)]
pub struct Notifier {
    mail: Arc<dyn NotificationChannel>,
    webhook: Arc<dyn NotificationChannel>,
    log: Arc<dyn NotificationChannel>,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            mail: Arc::new(
                SendmailChannel::new(config.sendmail.clone(), config.mail_from.clone())
                    .with_timeout(config.mail_timeout),
            ),
            webhook: Arc::new(WebhookChannel::new(config.webhook_timeout)),
            log: Arc::new(LogChannel),
        }
    }

    pub fn with_channels(
        mail: Arc<dyn NotificationChannel>,
        webhook: Arc<dyn NotificationChannel>,
        log: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self { mail, webhook, log }
    }

    /// Sends the run's report to every matching target
    ///
    /// Returns the number of targets that accepted the report.
    pub async fn notify(&self, run: &PipelineRun, targets: &[NotificationTarget]) -> usize {
        if !run.status.is_terminal() {
            debug!(run_id = %run.id, status = %run.status, "Run not finished, nothing to notify");
            return 0;
        }

        let report = RunReport::from_run(run);
        let mut delivered = 0;

        for target in targets.iter().filter(|t| t.wants(run.status)) {
            let (channel, recipients) = match &target.channel {
                ChannelKind::Mail { recipients } => (&self.mail, recipients.clone()),
                ChannelKind::Webhook { url } => (&self.webhook, vec![url.clone()]),
                ChannelKind::Log => (&self.log, Vec::new()),
            };

            match channel.send(&recipients, &report.subject, &report.body).await {
                Ok(()) => {
                    delivered += 1;
                    info!(
                        run_id = %run.id,
                        channel = target.channel.as_str(),
                        "Sent notification: {}",
                        report.subject
                    );
                }
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(
                        run_id = %run.id,
                        channel = target.channel.as_str(),
                        error = %error,
                        "Failed to deliver notification"
                    );
                }
            }
        }

        delivered
    }
}
