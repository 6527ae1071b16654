//! GCP Client
//!
//! Main client for interacting with the Compute Engine API, combining
//! authentication and HTTP functionality.

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Public Compute Engine v1 endpoint
pub const COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub project_id: String,
    pub zone: String,
    /// Compute API root, without trailing slash
    pub endpoint: String,
}

impl GcpClient {
    /// Create a new GCP client using Application Default Credentials
    pub async fn new(project_id: &str, zone: &str) -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;

        Self::with_credentials(credentials, project_id, zone)
    }

    /// Create a client from already-built credentials
    pub fn with_credentials(
        credentials: GcpCredentials,
        project_id: &str,
        zone: &str,
    ) -> Result<Self> {
        let http = GcpHttpClient::new()?;

        Ok(Self {
            credentials,
            http,
            project_id: project_id.to_string(),
            zone: zone.to_string(),
            endpoint: COMPUTE_ENDPOINT.to_string(),
        })
    }

    /// Point the client at another Compute API root (emulators, tests)
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        url::Url::parse(endpoint)
            .with_context(|| format!("Invalid compute endpoint: {}", endpoint))?;
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.get(url, &token).await
    }

    /// GET and deserialize into a typed resource
    pub async fn get_as<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let value = self.get(url).await?;
        serde_json::from_value(value).context("Unexpected resource shape")
    }

    /// Make a POST request to a GCP API
    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.post(url, &token, body).await
    }

    /// Make a DELETE request to a GCP API
    pub async fn delete(&self, url: &str) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.delete(url, &token).await
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> String {
        format!("{}/projects/{}/{}", self.endpoint, self.project_id, path)
    }

    /// Build zonal Compute Engine API URL for an explicit zone
    pub fn compute_zone_url(&self, zone: &str, resource: &str) -> String {
        self.compute_url(&format!("zones/{}/{}", zone, resource))
    }

    /// Build regional Compute Engine API URL
    pub fn compute_region_url(&self, region: &str, resource: &str) -> String {
        self.compute_url(&format!("regions/{}/{}", region, resource))
    }

    /// Build global Compute Engine API URL
    pub fn compute_global_url(&self, resource: &str) -> String {
        self.compute_url(&format!("global/{}", resource))
    }

    /// Build aggregated Compute Engine API URL (all zones)
    pub fn compute_aggregated_url(&self, resource: &str) -> String {
        self.compute_url(&format!("aggregated/{}", resource))
    }
}

/// Last path segment of a resource URL (`.../zones/us-central1-a` -> `us-central1-a`)
pub fn last_segment(link: &str) -> &str {
    link.rsplit('/').next().unwrap_or(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GcpClient {
        let creds = GcpCredentials::from_token("t");
        GcpClient::with_credentials(creds, "my-project", "europe-west1-b").unwrap()
    }

    #[test]
    fn builds_compute_urls() {
        let c = client();
        assert_eq!(
            c.compute_zone_url(&c.zone, "instances"),
            format!("{}/projects/my-project/zones/europe-west1-b/instances", COMPUTE_ENDPOINT)
        );
        assert_eq!(
            c.compute_global_url("images"),
            "https://compute.googleapis.com/compute/v1/projects/my-project/global/images"
        );
        assert_eq!(
            c.compute_aggregated_url("instances"),
            "https://compute.googleapis.com/compute/v1/projects/my-project/aggregated/instances"
        );
    }

    #[test]
    fn endpoint_override_strips_slash() {
        let c = client().with_endpoint("http://127.0.0.1:9000/compute/v1/").unwrap();
        assert_eq!(
            c.compute_region_url("europe-west1", "operations/op-1"),
            "http://127.0.0.1:9000/compute/v1/projects/my-project/regions/europe-west1/\
             operations/op-1"
        );
        assert!(client().with_endpoint("not a url").is_err());
    }

    #[test]
    fn last_path_segment() {
        assert_eq!(last_segment("zones/us-central1-a"), "us-central1-a");
        assert_eq!(last_segment("plain"), "plain");
    }
}
