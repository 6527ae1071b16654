//! VM instances
//!
//! Listing, lookup, creation and bulk start/stop/delete of Compute Engine
//! instances. Bulk actions resolve names against the project-wide aggregated
//! list, so callers only need instance names, not zones.

use super::client::{last_segment, GcpClient};
use super::http::{is_conflict, is_not_found};
use super::image::next_page_token;
use super::operation::{self, Operation};
use anyhow::{Context, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Zone used when a template does not name one
pub const DEFAULT_ZONE: &str = "us-central1-a";

/// Status reported by the API for a stopped instance
pub const STATUS_TERMINATED: &str = "TERMINATED";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub subnetwork: Option<String>,
    #[serde(default, rename = "networkIP")]
    pub network_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstanceMetadata {
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

/// Instance resource as returned by `instances.get`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub metadata: Option<InstanceMetadata>,
    #[serde(default)]
    pub self_link: Option<String>,
}

impl Instance {
    /// Internal IPs of every NIC, in interface order
    pub fn internal_ips(&self) -> Vec<String> {
        self.network_interfaces
            .iter()
            .filter_map(|nic| nic.network_ip.clone())
            .collect()
    }
}

/// Name and zone of an instance touched by a bulk action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRef {
    pub name: String,
    pub zone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceAction {
    Start,
    Stop,
    Delete,
}

impl InstanceAction {
    /// Key the report is published under
    pub fn report_key(self) -> &'static str {
        match self {
            Self::Start => "startlist",
            Self::Stop => "stoplist",
            Self::Delete => "deletelist",
        }
    }
}

/// Result of a bulk action: `{"<action>list": [{"name", "zone"}, ...]}`
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub action: InstanceAction,
    pub instances: Vec<InstanceRef>,
}

impl Serialize for ActionReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.action.report_key(), &self.instances)?;
        map.end()
    }
}

/// Instance creation input: a zone plus an `instances.insert` body
#[derive(Debug, Clone, Deserialize, Default)]
pub struct InstanceTemplate {
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default = "empty_resource")]
    pub instance_resource: Value,
    /// Reuse the same id when resubmitting so the API drops the duplicate insert
    #[serde(default)]
    pub request_id: Option<String>,
}

fn empty_resource() -> Value {
    Value::Object(Map::new())
}

impl InstanceTemplate {
    /// Load a template from a `.json`, `.yaml` or `.yml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template {}", path.display()))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML template {}", path.display())),
            _ => serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON template {}", path.display())),
        }
    }

    pub fn zone(&self) -> &str {
        self.zone.as_deref().unwrap_or(DEFAULT_ZONE)
    }

    pub fn instance_name(&self) -> &str {
        self.instance_resource
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    /// Insert body in REST form; a missing or null resource is `{}`
    pub fn resource_body(&self) -> Value {
        match &self.instance_resource {
            Value::Null => empty_resource(),
            resource => normalize_resource_keys(resource.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CreateOutcome {
    /// Insert finished; the instance and its internal IPs
    Created { instance: String, ip: Vec<String> },
    /// Insert accepted but not awaited
    Submitted { instance: String, operation: String },
    /// An instance with this name already exists
    Conflict { instance: String, conflict: bool },
}

// =============================================================================
// Resource body normalization
// =============================================================================

/// `machine_type` -> `machineType`, `network_i_p` -> `networkIP`, `type_` -> `type`
pub fn snake_to_camel(key: &str) -> String {
    let key = key.trim_end_matches('_');
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;

    for c in key.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }

    out
}

/// Rewrite object keys of an instance body into the REST form.
///
/// Keys under `labels` are user data and stay untouched.
pub fn normalize_resource_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let normalized: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| {
                    let key = snake_to_camel(&k);
                    let v = if key == "labels" { v } else { normalize_resource_keys(v) };
                    (key, v)
                })
                .collect();
            Value::Object(normalized)
        },
        Value::Array(items) => {
            Value::Array(items.into_iter().map(normalize_resource_keys).collect())
        },
        other => other,
    }
}

// =============================================================================
// Listing and filtering
// =============================================================================

/// Flatten an `aggregated/instances` page into `(name, zone)` pairs.
///
/// Scopes look like `zones/us-central1-a`; scopes without instances carry a
/// warning instead and are skipped.
pub fn flatten_aggregated(response: &Value) -> Vec<(String, String)> {
    let Some(scopes) = response.get("items").and_then(Value::as_object) else {
        return Vec::new();
    };

    scopes
        .iter()
        .filter_map(|(scope, body)| {
            let instances = body.get("instances").and_then(Value::as_array)?;
            let zone = last_segment(scope).to_string();
            Some(instances.iter().filter_map(move |inst| {
                inst.get("name")
                    .and_then(Value::as_str)
                    .map(|name| (name.to_string(), zone.clone()))
            }))
        })
        .flatten()
        .collect()
}

/// Instances in `vm_list` whose name appears in `names`
pub fn select_targets(vm_list: &BTreeMap<String, String>, names: &[String]) -> Vec<InstanceRef> {
    let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
    vm_list
        .iter()
        .filter(|(name, _)| wanted.contains(name.as_str()))
        .map(|(name, zone)| InstanceRef {
            name: name.clone(),
            zone: zone.clone(),
        })
        .collect()
}

/// Every instance in the project, name -> zone
pub async fn list_instances(client: &GcpClient) -> Result<BTreeMap<String, String>> {
    let base = client.compute_aggregated_url("instances");
    let mut vm_list = BTreeMap::new();
    let mut page_token: Option<String> = None;

    loop {
        let url = match &page_token {
            Some(token) => format!("{}?pageToken={}", base, urlencoding::encode(token)),
            None => base.clone(),
        };
        let response = client.get(&url).await.context("Failed to list instances")?;

        vm_list.extend(flatten_aggregated(&response));

        page_token = next_page_token(&response);
        if page_token.is_none() {
            break;
        }
    }

    tracing::debug!("Found {} instances in {}", vm_list.len(), client.project_id);
    Ok(vm_list)
}

/// Fetch an instance; `None` when it does not exist
pub async fn get_instance(client: &GcpClient, name: &str, zone: &str) -> Result<Option<Instance>> {
    let url = client.compute_zone_url(zone, &format!("instances/{}", name));
    match client.get_as::<Instance>(&url).await {
        Ok(instance) => {
            tracing::debug!("Instance {} is {:?}", instance.name, instance.status);
            Ok(Some(instance))
        },
        Err(e) if is_not_found(&e) => {
            tracing::warn!("No resource found: instance {} in {}", name, zone);
            Ok(None)
        },
        Err(e) => Err(e.context(format!("Failed to get instance {}", name))),
    }
}

pub async fn get_instance_name(
    client: &GcpClient,
    name: &str,
    zone: &str,
) -> Result<Option<String>> {
    Ok(get_instance(client, name, zone).await?.map(|i| i.name))
}

// =============================================================================
// Mutations
// =============================================================================

pub async fn create_instance(
    client: &GcpClient,
    template: &InstanceTemplate,
    wait: bool,
) -> Result<CreateOutcome> {
    let zone = template.zone();
    let instance_name = template.instance_name().to_string();
    let body = template.resource_body();

    let request_id = template
        .request_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let url = format!(
        "{}?requestId={}",
        client.compute_zone_url(zone, "instances"),
        urlencoding::encode(&request_id)
    );
    tracing::info!("Creating instance {} in {}", instance_name, zone);

    let response = match client.post(&url, Some(&body)).await {
        Ok(response) => response,
        Err(e) if is_conflict(&e) => {
            tracing::warn!(
                "Conflict occurred while creating instance {}: {}",
                instance_name,
                e
            );
            return Ok(CreateOutcome::Conflict {
                instance: instance_name,
                conflict: true,
            });
        },
        Err(e) => return Err(e.context(format!("Failed to create instance {}", instance_name))),
    };

    let operation = operation::finish(client, response, wait).await?;
    if !wait {
        return Ok(CreateOutcome::Submitted {
            instance: instance_name,
            operation: operation.name,
        });
    }

    let instance = get_instance(client, &instance_name, zone)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Instance {} vanished after creation", instance_name))?;
    let ip = instance.internal_ips();
    tracing::info!("instance: {}, ip: {:?}", instance.name, ip);

    Ok(CreateOutcome::Created {
        instance: instance.name,
        ip,
    })
}

async fn submit_action(
    client: &GcpClient,
    action: InstanceAction,
    target: &InstanceRef,
) -> Result<Operation> {
    let resource = format!("instances/{}", target.name);
    let url = |suffix: &str| {
        client.compute_zone_url(&target.zone, &format!("{}{}", resource, suffix))
    };
    let response = match action {
        InstanceAction::Start => client.post(&url("/start"), None).await,
        InstanceAction::Stop => client.post(&url("/stop"), None).await,
        InstanceAction::Delete => client.delete(&url("")).await,
    }
    .with_context(|| format!("Failed to {:?} instance {}", action, target.name))?;

    serde_json::from_value(response).context("Unexpected operation shape")
}

async fn run_bulk(
    client: &GcpClient,
    action: InstanceAction,
    targets: Vec<InstanceRef>,
) -> Result<ActionReport> {
    let mut instances = Vec::with_capacity(targets.len());
    for target in targets {
        let op = submit_action(client, action, &target).await?;
        tracing::info!(
            "{:?} {} ({}): operation {}",
            action,
            target.name,
            target.zone,
            op.name
        );
        instances.push(target);
    }
    Ok(ActionReport { action, instances })
}

/// Start the named instances that are currently TERMINATED
pub async fn start_instances(client: &GcpClient, names: &[String]) -> Result<ActionReport> {
    let vm_list = list_instances(client).await?;
    let targets = select_targets(&vm_list, names);

    let statuses = futures::future::try_join_all(
        targets
            .iter()
            .map(|t| get_instance(client, &t.name, &t.zone)),
    )
    .await?;

    let stopped = targets
        .into_iter()
        .zip(statuses)
        .filter(|(target, instance)| {
            let status = instance.as_ref().and_then(|i| i.status.as_deref());
            if status != Some(STATUS_TERMINATED) {
                tracing::debug!("Skipping {}: status {:?}", target.name, status);
                return false;
            }
            true
        })
        .map(|(target, _)| target)
        .collect();

    run_bulk(client, InstanceAction::Start, stopped).await
}

pub async fn stop_instances(client: &GcpClient, names: &[String]) -> Result<ActionReport> {
    let vm_list = list_instances(client).await?;
    run_bulk(client, InstanceAction::Stop, select_targets(&vm_list, names)).await
}

pub async fn delete_instances(client: &GcpClient, names: &[String]) -> Result<ActionReport> {
    let vm_list = list_instances(client).await?;
    run_bulk(client, InstanceAction::Delete, select_targets(&vm_list, names)).await
}

/// Merge `items` into an instance's metadata (same key replaces the value)
pub async fn update_instance_metadata(
    client: &GcpClient,
    name: &str,
    zone: &str,
    items: &[MetadataItem],
    wait: bool,
) -> Result<Operation> {
    let instance = get_instance(client, name, zone)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Instance {} not found in {}", name, zone))?;

    let mut metadata = instance.metadata.unwrap_or_default();
    for item in items {
        match metadata.items.iter_mut().find(|i| i.key == item.key) {
            Some(existing) => existing.value = item.value.clone(),
            None => metadata.items.push(item.clone()),
        }
    }

    let url = client.compute_zone_url(zone, &format!("instances/{}/setMetadata", name));
    let body = serde_json::to_value(&metadata)?;
    let response = client
        .post(&url, Some(&body))
        .await
        .with_context(|| format!("Failed to set metadata on {}", name))?;

    operation::finish(client, response, wait).await
}
