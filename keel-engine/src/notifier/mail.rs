use anyhow::{Context, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::debug;

use super::NotificationChannel;

pub const DEFAULT_MAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Mail through the local `sendmail -t`
pub struct SendmailChannel {
    program: PathBuf,
    from: String,
    timeout: Duration,
}

impl SendmailChannel {
    pub fn new(program: PathBuf, from: String) -> Self {
        Self {
            program,
            from,
            timeout: DEFAULT_MAIL_TIMEOUT,
        }
    }

    /// Bound on handing one message to the program; the child is killed past it
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

async fn deliver(mut child: Child, message: &str) -> anyhow::Result<Output> {
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(message.as_bytes())
            .await
            .context("Failed to write message to sendmail")?;
    }
    child
        .wait_with_output()
        .await
        .context("Failed to wait for sendmail")
}

/// Plain-text RFC 5322 message; header values are kept on one line
pub fn format_message(from: &str, recipients: &[String], subject: &str, body: &str) -> String {
    let header = |value: &str| value.replace(['\r', '\n'], " ");

    let mut message = String::new();
    message.push_str(&format!("From: {}\n", header(from)));
    message.push_str(&format!("To: {}\n", header(&recipients.join(", "))));
    message.push_str(&format!("Subject: {}\n", header(subject)));
    message.push_str(&format!("Date: {}\n", chrono::Utc::now().to_rfc2822()));
    message.push_str("MIME-Version: 1.0\n");
    message.push_str("Content-Type: text/plain; charset=utf-8\n");
    message.push('\n');
    message.push_str(body);
    if !body.ends_with('\n') {
        message.push('\n');
    }
    message
}

#[async_trait]
impl NotificationChannel for SendmailChannel {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> anyhow::Result<()> {
        if recipients.is_empty() {
            bail!("no mail recipients");
        }
        let message = format_message(&self.from, recipients, subject, body);

        let child = Command::new(&self.program)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program.display()))?;

        let output = tokio::time::timeout(self.timeout, deliver(child, &message))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "{} timed out after {}ms",
                    self.program.display(),
                    self.timeout.as_millis()
                )
            })??;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        debug!(recipients = recipients.len(), "Mail handed to sendmail");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_headers() {
        let message = format_message(
            "keel@localhost",
            &["ops@example.com".to_string(), "dev@example.com".to_string()],
            "[keel] petclinic #3 FAILED\nBcc: evil@example.com",
            "Failed step: Deploy",
        );
        assert!(message.starts_with("From: keel@localhost\nTo: ops@example.com, dev@example.com\n"));
        assert!(message.contains("Subject: [keel] petclinic #3 FAILED Bcc: evil@example.com\n"));
        assert!(!message.contains("\nBcc:"));
        assert!(message.ends_with("\n\nFailed step: Deploy\n"));
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let channel = SendmailChannel::new(
            PathBuf::from("/nonexistent/sendmail"),
            "keel@localhost".to_string(),
        );
        let err = channel
            .send(&["ops@example.com".to_string()], "subject", "body")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to start /nonexistent/sendmail"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_message_is_piped_to_program() {
        // `cat -t` reads the whole message and exits 0
        let channel = SendmailChannel::new(PathBuf::from("cat"), "keel@localhost".to_string());
        channel
            .send(&["ops@example.com".to_string()], "subject", "body")
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hanging_program_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("sendmail");
        std::fs::write(&program, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let channel = SendmailChannel::new(program, "keel@localhost".to_string())
            .with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = channel
            .send(&["ops@example.com".to_string()], "subject", "body")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out after 200ms"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_no_recipients() {
        let channel = SendmailChannel::new(PathBuf::from("cat"), "keel@localhost".to_string());
        assert!(channel.send(&[], "subject", "body").await.is_err());
    }
}
