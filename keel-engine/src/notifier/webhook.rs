use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use super::NotificationChannel;

/// JSON body posted to webhooks
///
/// `text` carries subject and body together for chat services that render
/// a single field.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload<'a> {
    pub subject: &'a str,
    pub body: &'a str,
    pub text: String,
}

impl<'a> WebhookPayload<'a> {
    pub fn new(subject: &'a str, body: &'a str) -> Self {
        Self {
            subject,
            body,
            text: format!("{}\n\n{}", subject, body),
        }
    }
}

/// Posts reports to every recipient URL
pub struct WebhookChannel {
    http: reqwest::Client,
    timeout: Duration,
}

impl WebhookChannel {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> anyhow::Result<()> {
        let payload = WebhookPayload::new(subject, body);
        for url in recipients {
            self.http
                .post(url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await
                .with_context(|| format!("POST {} failed", url))?
                .error_for_status()
                .with_context(|| format!("POST {} was rejected", url))?;
        }
        Ok(())
    }
}

/// Writes reports to the process log
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, _recipients: &[String], subject: &str, body: &str) -> anyhow::Result<()> {
        info!(subject, "{}", body.trim_end());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let payload = WebhookPayload::new("[keel] petclinic #4 UNSTABLE", "Steps: ...");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["subject"], "[keel] petclinic #4 UNSTABLE");
        assert_eq!(json["text"], "[keel] petclinic #4 UNSTABLE\n\nSteps: ...");
    }

    #[tokio::test]
    async fn test_unreachable_webhook_errors() {
        let channel = WebhookChannel::new(Duration::from_secs(2));
        let err = channel
            .send(&["http://127.0.0.1:1/hook".to_string()], "subject", "body")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("POST http://127.0.0.1:1/hook failed"));
    }

    #[tokio::test]
    async fn test_log_channel_accepts() {
        assert!(LogChannel.send(&[], "subject", "body").await.is_ok());
    }
}
