//! Cluster API client
//!
//! [`ClusterClient`] is the narrow slice of the Kubernetes API hoist needs:
//! pod create/get/delete and claim create/get/delete in one namespace. The
//! backend and the claim repository only ever talk to the trait, so tests
//! script a fake and [`HttpClusterClient`] stays a thin REST shim.

use crate::kube::pod::{Pod, VolumeClaim};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Result type alias for cluster API operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur when talking to the cluster API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClusterError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Whether retrying the operation could plausibly succeed
    ///
    /// Transport failures, server errors and throttling are transient;
    /// 4xx responses other than 429 are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) => true,
            Self::ApiError { status, .. } => *status >= 500 || *status == 429,
            Self::ParseError(_) => false,
        }
    }
}

/// The cluster operations the runner needs
///
/// Get operations return `Ok(None)` for a missing resource; delete
/// operations treat a missing resource as already deleted.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;
    async fn get_pod(&self, name: &str) -> Result<Option<Pod>>;
    async fn delete_pod(&self, name: &str) -> Result<()>;

    async fn create_claim(&self, claim: &VolumeClaim) -> Result<VolumeClaim>;
    async fn get_claim(&self, name: &str) -> Result<Option<VolumeClaim>>;
    async fn delete_claim(&self, name: &str) -> Result<()>;
}

/// REST client for the cluster API
#[derive(Debug, Clone)]
pub struct HttpClusterClient {
    /// Base URL of the API server (e.g., "http://localhost:8001")
    base_url: String,
    /// Namespace all operations are scoped to
    namespace: String,
    /// HTTP client instance
    client: Client,
}

impl HttpClusterClient {
    /// Create a new cluster client
    pub fn new(base_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::with_client(base_url, namespace, Client::new())
    }

    /// Create a new cluster client with a custom HTTP client
    ///
    /// This allows configuring timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        namespace: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.into(),
            client,
        }
    }

    /// Get the base URL of the API server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn pods_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods",
            self.base_url, self.namespace
        )
    }

    fn claims_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/persistentvolumeclaims",
            self.base_url, self.namespace
        )
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClusterError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClusterError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle a response where 404 means the resource does not exist
    async fn handle_optional_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    /// Handle a deletion response; 404 counts as already deleted
    async fn handle_delete_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if status == StatusCode::NOT_FOUND || status.is_success() {
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ClusterError::api_error(status.as_u16(), error_text))
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let response = self.client.post(self.pods_url()).json(pod).send().await?;
        self.handle_response(response).await
    }

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>> {
        let url = format!("{}/{}", self.pods_url(), name);
        let response = self.client.get(&url).send().await?;
        self.handle_optional_response(response).await
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        let url = format!("{}/{}", self.pods_url(), name);
        let response = self.client.delete(&url).send().await?;
        self.handle_delete_response(response).await
    }

    async fn create_claim(&self, claim: &VolumeClaim) -> Result<VolumeClaim> {
        let response = self
            .client
            .post(self.claims_url())
            .json(claim)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn get_claim(&self, name: &str) -> Result<Option<VolumeClaim>> {
        let url = format!("{}/{}", self.claims_url(), name);
        let response = self.client.get(&url).send().await?;
        self.handle_optional_response(response).await
    }

    async fn delete_claim(&self, name: &str) -> Result<()> {
        let url = format!("{}/{}", self.claims_url(), name);
        let response = self.client.delete(&url).send().await?;
        self.handle_delete_response(response).await
    }
}
