//! Rancher management API client.
//!
//! Only the two calls the smoke test needs are implemented: a cheap
//! authenticated list to verify the token, and the `generateKubeconfig`
//! cluster action.
//!
//! API Documentation: <https://ranchermanager.docs.rancher.com/api/v3-rancher-api-guide>

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Path suffix of the management API.
const API_SUFFIX: &str = "/v3";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Action name exposed on cluster resources.
const GENERATE_KUBECONFIG: &str = "generateKubeconfig";

/// Cluster resource, trimmed to the fields used here.
#[derive(Debug, Deserialize)]
struct ClusterResource {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    actions: HashMap<String, String>,
}

/// Response body of the `generateKubeconfig` action.
#[derive(Deserialize)]
struct GenerateKubeconfigOutput {
    config: String,
}

/// Rancher error body (`{"type":"error","status":401,"message":"..."}`).
#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Normalize a Rancher server address into the management API base URL.
///
/// Adds `https://` when no scheme is present and makes sure the URL ends
/// with `/v3`.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    let url = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    if url.ends_with(API_SUFFIX) {
        url
    } else {
        format!("{url}{API_SUFFIX}")
    }
}

/// Authenticated Rancher API client.
#[derive(Clone)]
pub struct RancherClient {
    /// HTTP client.
    client: Client,
    /// Management API base URL, ending in `/v3`.
    base_url: String,
    /// API bearer token.
    token: String,
}

impl std::fmt::Debug for RancherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RancherClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RancherClient {
    /// Create a client for the Rancher server at `url`.
    ///
    /// # Arguments
    /// * `url` - Rancher server address, with or without scheme and `/v3`
    /// * `token` - API token (`token-xxxxx:secret`)
    /// * `insecure` - accept self-signed certificates
    ///
    /// # Errors
    /// Returns [`Error::Connect`] if the HTTP client cannot be created.
    pub fn connect(url: &str, token: impl Into<String>, insecure: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(Error::Connect)?;

        Ok(Self {
            client,
            base_url: normalize_url(url),
            token: token.into(),
        })
    }

    /// Management API base URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Confirm the token is accepted by listing at most one cluster.
    ///
    /// # Errors
    /// Returns [`Error::Auth`] on any transport or authorization failure.
    pub async fn verify_login(&self) -> Result<()> {
        let url = format!("{}/clusters", self.base_url);
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(&url)
            .query(&[("limit", "1")])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Auth(error_message(status, response).await));
        }

        info!(url = %self.base_url, "Rancher login verified");
        Ok(())
    }

    /// Generate a kubeconfig for the downstream cluster `cluster_id`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the cluster does not exist and
    /// [`Error::Action`] if the lookup or the action itself fails.
    pub async fn get_kubeconfig(&self, cluster_id: &str) -> Result<String> {
        let action_error = |message: String| Error::Action {
            cluster_id: cluster_id.to_string(),
            message,
        };

        let url = format!("{}/clusters/{cluster_id}", self.base_url);
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| action_error(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(cluster_id.to_string()));
        }
        if !status.is_success() {
            return Err(action_error(error_message(status, response).await));
        }

        let cluster: ClusterResource = response
            .json()
            .await
            .map_err(|e| action_error(format!("invalid cluster resource: {e}")))?;

        let action_url = cluster
            .actions
            .get(GENERATE_KUBECONFIG)
            .ok_or_else(|| {
                action_error(format!(
                    "action {GENERATE_KUBECONFIG} not available on cluster {}",
                    cluster.id
                ))
            })?;

        debug!(url = %action_url, cluster = %cluster.name, "POST request");
        let response = self
            .client
            .post(action_url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| action_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(action_error(error_message(status, response).await));
        }

        let output: GenerateKubeconfigOutput = response
            .json()
            .await
            .map_err(|e| action_error(format!("invalid action response: {e}")))?;

        info!(cluster_id, "kubeconfig generated");
        Ok(output.config)
    }
}

/// Extract a readable message from a failed response.
async fn error_message(status: StatusCode, response: Response) -> String {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&text) {
        Ok(err) if !err.message.is_empty() => {
            format!("{} {}: {}", status.as_u16(), err.code, err.message)
        }
        _ if text.is_empty() => status.to_string(),
        _ => format!("{}: {}", status.as_u16(), text.trim()),
    }
}
