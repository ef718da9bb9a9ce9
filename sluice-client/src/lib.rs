//! Sluice HTTP Client
//!
//! A small, type-safe HTTP client for the Sluice controller API, shared by the
//! CLI and any other caller that submits batches or follows monitors.
//!
//! # Example
//!
//! ```no_run
//! use sluice_client::ControllerClient;
//! use sluice_core::dto::monitor::StartMonitor;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ControllerClient::new("http://localhost:8080");
//!
//!     let handle = client.start_monitor(&StartMonitor {
//!         job_id: "job-1".to_string(),
//!     }).await?;
//!
//!     println!("Monitoring as {}", handle.instance_id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod monitors;
mod submissions;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Sluice controller API
///
/// - Batch submission
/// - Monitor start, status and cancel
#[derive(Debug, Clone)]
pub struct ControllerClient {
    /// Base URL of the controller (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl ControllerClient {
    /// Create a new controller client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the controller API (e.g., "http://localhost:8080")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new controller client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the controller
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a controller-relative URI (such as a monitor's status URI)
    pub fn resolve(&self, uri: &str) -> String {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            uri.to_string()
        } else {
            format!("{}/{}", self.base_url, uri.trim_start_matches('/'))
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
