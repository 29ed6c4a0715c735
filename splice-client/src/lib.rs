//! Splice HTTP Client
//!
//! A simple, type-safe HTTP client for communicating with the remote job queue.
//!
//! The runner uses this client to pull jobs, report state transitions, stream
//! log output and poll for server-side cancellation.
//!
//! # Example
//!
//! ```no_run
//! use splice_client::QueueClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = QueueClient::new("http://localhost:8080");
//!
//!     if let Some(job) = client.pull_job("runner-1").await? {
//!         println!("Got job {} for {}", job.id, job.repository.name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

/// HTTP client for the remote job queue
///
/// This client provides the four operations the runner needs:
/// - Job acquisition (pull semantics, at most one runner per job)
/// - State reporting (RUNNING and terminal states, with the patch on completion)
/// - Log streaming (append-only chunks)
/// - Job state queries (used for cancellation polling)
#[derive(Debug, Clone)]
pub struct QueueClient {
    /// Base URL of the queue (e.g., "http://localhost:8080")
    base_url: String,
    /// Access token sent as `Authorization: token <t>`
    access_token: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl QueueClient {
    /// Create a new queue client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the queue API (e.g., "http://localhost:8080")
    ///
    /// # Example
    /// ```
    /// use splice_client::QueueClient;
    ///
    /// let client = QueueClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new queue client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the queue API
    /// * `client` - A configured reqwest Client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: None,
            client,
        }
    }

    /// Attach an access token to every request
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.access_token = if token.is_empty() { None } else { Some(token) };
        self
    }

    /// Get the base URL of the queue
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a request with authentication applied
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.access_token {
            Some(token) => builder.header("Authorization", format!("token {}", token)),
            None => builder,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response where `204 No Content` means "nothing"
    async fn handle_optional_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        self.handle_response(response).await.map(Some)
    }

    /// Handle an API response that returns no content
    ///
    /// This method checks the status code and returns an error if the request failed.
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Ok(())
    }

    async fn error_from(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        ClientError::api_error(status.as_u16(), error_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = QueueClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = QueueClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let client = QueueClient::new("http://localhost:8080").with_access_token("");
        assert!(client.access_token.is_none());

        let client = client.with_access_token("secret");
        assert_eq!(client.access_token.as_deref(), Some("secret"));
    }
}
