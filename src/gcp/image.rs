//! Custom images

use super::client::GcpClient;
use super::http::is_not_found;
use super::operation::{self, Operation, DEFAULT_WAIT_TIMEOUT};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub name: String,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub source_disk: Option<String>,
    #[serde(default)]
    pub disk_size_gb: Option<String>,
    #[serde(default)]
    pub self_link: Option<String>,
    #[serde(default)]
    pub creation_timestamp: Option<String>,
}

/// Body of an `images.insert` call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    pub name: String,
    pub family: String,
    pub source_disk: String,
}

/// Create an image from a disk and block until it is ready
pub async fn create_image(
    client: &GcpClient,
    name: &str,
    family: &str,
    source_disk: &str,
) -> Result<Operation> {
    let request = ImageRequest {
        name: name.to_string(),
        family: family.to_string(),
        source_disk: source_disk.to_string(),
    };
    tracing::info!("Creating image {} (family {}) from {}", name, family, source_disk);

    let url = client.compute_global_url("images");
    let body = serde_json::to_value(&request)?;
    let response = client
        .post(&url, Some(&body))
        .await
        .with_context(|| format!("Failed to create image {}", name))?;

    let operation: Operation =
        serde_json::from_value(response).context("Unexpected operation shape")?;
    operation::wait_for_operation(client, operation, DEFAULT_WAIT_TIMEOUT).await
}

async fn get_optional(client: &GcpClient, url: &str) -> Result<Option<Image>> {
    match client.get_as(url).await {
        Ok(image) => Ok(Some(image)),
        Err(e) if is_not_found(&e) => {
            tracing::warn!("No image found at {}", url);
            Ok(None)
        },
        Err(e) => Err(e),
    }
}

pub async fn get_image(client: &GcpClient, name: &str) -> Result<Option<Image>> {
    get_optional(client, &client.compute_global_url(&format!("images/{}", name))).await
}

/// Newest non-deprecated image in a family
pub async fn get_image_from_family(client: &GcpClient, family: &str) -> Result<Option<Image>> {
    let url = client.compute_global_url(&format!("images/family/{}", family));
    get_optional(client, &url).await
}

/// Images whose name matches `pattern` (an RE2 expression evaluated by the API)
pub async fn list_images_matching(client: &GcpClient, pattern: &str) -> Result<Vec<Image>> {
    let filter = format!("name eq \"{}\"", pattern);
    let base = format!(
        "{}?filter={}",
        client.compute_global_url("images"),
        urlencoding::encode(&filter)
    );

    let mut images = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let url = match &page_token {
            Some(token) => format!("{}&pageToken={}", base, urlencoding::encode(token)),
            None => base.clone(),
        };
        let response = client.get(&url).await.context("Failed to list images")?;

        if let Some(items) = response.get("items").and_then(Value::as_array) {
            for item in items {
                let image = serde_json::from_value(item.clone()).context("Unexpected image shape")?;
                images.push(image);
            }
        }

        page_token = next_page_token(&response);
        if page_token.is_none() {
            break;
        }
    }

    Ok(images)
}

pub async fn delete_image(client: &GcpClient, name: &str, wait: bool) -> Result<Operation> {
    tracing::info!("Deleting image {}", name);

    let url = client.compute_global_url(&format!("images/{}", name));
    let response = client
        .delete(&url)
        .await
        .with_context(|| format!("Failed to delete image {}", name))?;

    operation::finish(client, response, wait).await
}

pub(crate) fn next_page_token(response: &Value) -> Option<String> {
    response
        .get("nextPageToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
