//! GCE metadata server lookups
//!
//! Reads instance/project values from the metadata endpoint available inside
//! a Compute Engine VM. Lookups never fail hard: outside GCE they yield `None`.

use super::auth;
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// Metadata server reachable from inside every GCE VM
pub const METADATA_HOST: &str = "metadata.google.internal";

/// Project used when nothing else names one
pub const FALLBACK_PROJECT_ID: &str = "dev-project-412419";

/// Placeholder returned when the endpoint answers with an HTML page
pub const HTML_PLACEHOLDER: &str = "dummy";

const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for the metadata server
#[derive(Clone)]
pub struct MetadataClient {
    client: Client,
    base_url: String,
}

impl MetadataClient {
    /// Client for the default host, honoring `GCE_METADATA_HOST`
    pub fn new() -> Result<Self> {
        let host = std::env::var("GCE_METADATA_HOST").unwrap_or_else(|_| METADATA_HOST.to_string());
        Self::with_base_url(&format!("http://{}", host))
    }

    /// Client for an explicit base URL such as `http://127.0.0.1:8080`
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(METADATA_TIMEOUT)
            .build()
            .context("Failed to create metadata HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the value for a metadata key, e.g. `instance/hostname`
    pub async fn get(&self, key: &str) -> Option<String> {
        let url = format!("{}/computeMetadata/v1/{}", self.base_url, key);
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let body = match response {
            Ok(response) => response.text().await,
            Err(e) => {
                tracing::warn!("An error occurred while fetching metadata {}: {}", key, e);
                return None;
            },
        };

        match body {
            Ok(value) if value.starts_with("<!") => Some(HTML_PLACEHOLDER.to_string()),
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Failed to read metadata {}: {}", key, e);
                None
            },
        }
    }

    pub async fn get_hostname(&self) -> Option<String> {
        self.get("instance/hostname").await
    }

    /// Project of the VM we are running on
    pub async fn get_metadata_project_id(&self) -> Option<String> {
        self.get("project/project-id").await
    }
}

/// Fetch a metadata value from the default metadata server
pub async fn gcp_metadata(key: &str) -> Option<String> {
    match MetadataClient::new() {
        Ok(client) => client.get(key).await,
        Err(e) => {
            tracing::warn!("{:#}", e);
            None
        },
    }
}

pub async fn get_hostname() -> Option<String> {
    gcp_metadata("instance/hostname").await
}

/// The built-in project id
pub fn get_project_id() -> &'static str {
    FALLBACK_PROJECT_ID
}

/// Pick the project to operate on.
///
/// Order: explicit value, gcloud/env default, metadata server, built-in fallback.
pub async fn resolve_project_id(explicit: Option<&str>, metadata: &MetadataClient) -> String {
    if let Some(project) = explicit.filter(|p| !p.is_empty()) {
        return project.to_string();
    }

    if let Some(project) = auth::get_default_project() {
        return project;
    }

    match metadata.get_metadata_project_id().await {
        Some(project) if auth::validate_project_id(&project) => project,
        _ => {
            tracing::info!("No project configured, using {}", FALLBACK_PROJECT_ID);
            get_project_id().to_string()
        },
    }
}
