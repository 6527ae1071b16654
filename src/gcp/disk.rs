//! Persistent disks

use super::client::GcpClient;
use super::operation::{self, Operation};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Disk resource as returned by `disks.get`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    #[serde(default)]
    pub zone: Option<String>,
    /// int64 fields are strings on the wire
    #[serde(default)]
    pub size_gb: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub disk_type: Option<String>,
    #[serde(default)]
    pub source_image: Option<String>,
    #[serde(default)]
    pub source_disk: Option<String>,
    #[serde(default)]
    pub self_link: Option<String>,
}

/// Body of a `disks.insert` call
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiskRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_gb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,
}

/// Partial resource path usable as an image source
pub fn disk_path(project: &str, zone: &str, disk: &str) -> String {
    format!("projects/{}/zones/{}/disks/{}", project, zone, disk)
}

/// Fetch a disk
pub async fn get_disk(client: &GcpClient, zone: &str, disk: &str) -> Result<Disk> {
    let url = client.compute_zone_url(zone, &format!("disks/{}", disk));
    client
        .get_as(&url)
        .await
        .with_context(|| format!("Failed to get disk {}/{}", zone, disk))
}

/// The disk this disk was cloned from, if any
pub async fn get_source_disk(
    client: &GcpClient,
    zone: &str,
    disk: &str,
) -> Result<Option<String>> {
    Ok(get_disk(client, zone, disk).await?.source_disk)
}

pub async fn create_disk(
    client: &GcpClient,
    zone: &str,
    request: &DiskRequest,
    wait: bool,
) -> Result<Operation> {
    tracing::info!("Creating disk {} in {}", request.name, zone);

    let url = client.compute_zone_url(zone, "disks");
    let body = serde_json::to_value(request)?;
    let response = client
        .post(&url, Some(&body))
        .await
        .with_context(|| format!("Failed to create disk {}", request.name))?;

    operation::finish(client, response, wait).await
}

pub async fn delete_disk(
    client: &GcpClient,
    zone: &str,
    disk: &str,
    wait: bool,
) -> Result<Operation> {
    tracing::info!("Deleting disk {} in {}", disk, zone);

    let url = client.compute_zone_url(zone, &format!("disks/{}", disk));
    let response = client
        .delete(&url)
        .await
        .with_context(|| format!("Failed to delete disk {}", disk))?;

    operation::finish(client, response, wait).await
}
