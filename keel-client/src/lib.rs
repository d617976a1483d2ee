//! Keel HTTP Client
//!
//! A type-safe client for the Keel server API, used by the CLI's remote
//! commands.
//!
//! # Example
//!
//! ```no_run
//! use keel_client::KeelClient;
//! use keel_core::dto::run::TriggerRun;
//!
//! # async fn example() -> keel_client::Result<()> {
//! let client = KeelClient::new("http://localhost:8080");
//! let run = client
//!     .trigger_run(TriggerRun {
//!         pipeline: "petclinic".to_string(),
//!         branch: "main".to_string(),
//!         parameters: Default::default(),
//!     })
//!     .await?;
//! println!("Triggered run #{}", run.number);
//! # Ok(())
//! # }
//! ```

pub mod error;
mod pipelines;
mod runs;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Keel server API
#[derive(Debug, Clone)]
pub struct KeelClient {
    /// Base URL of the server (e.g., "http://localhost:8080")
    base_url: String,
    client: Client,
}

impl KeelClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client over a configured reqwest Client (timeouts, proxies, TLS)
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("API returned {}: {}", status, error_text);
            return Err(ClientError::from_body(status.as_u16(), &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = KeelClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.url("/api/runs"), "http://localhost:8080/api/runs");
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client = KeelClient::new("http://127.0.0.1:1");
        let err = client.list_pipelines().await.unwrap_err();
        assert!(matches!(err, ClientError::RequestFailed(_)));
    }
}
