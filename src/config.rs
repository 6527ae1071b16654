//! Configuration Management
//!
//! Persistent defaults for cloudauto, stored as JSON in the user config dir.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default bind address of the demo service
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Project to operate on
    #[serde(default)]
    pub project_id: Option<String>,
    /// Default zone for zonal lookups
    #[serde(default)]
    pub zone: Option<String>,
    /// Compute API root override
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bind address of `serve`
    #[serde(default)]
    pub bind_addr: Option<String>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudauto").join("config.json"))
    }

    /// Load configuration from the default location; missing or unreadable
    /// files yield defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    tracing::warn!("Ignoring config {}: {:#}", path.display(), e);
                }
                Self::default()
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Save configuration to the default location, returning where it went
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path().context("No configuration directory on this platform")?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Overwrite the fields that are `Some` in `update`
    pub fn merge(&mut self, update: Config) {
        if update.project_id.is_some() {
            self.project_id = update.project_id;
        }
        if update.zone.is_some() {
            self.zone = update.zone;
        }
        if update.endpoint.is_some() {
            self.endpoint = update.endpoint;
        }
        if update.bind_addr.is_some() {
            self.bind_addr = update.bind_addr;
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get effective zone (CLI > config > gcloud default > us-central1-a)
    pub fn effective_zone(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.zone.clone())
            .or_else(crate::gcp::auth::get_default_zone)
            .unwrap_or_else(|| crate::gcp::instance::DEFAULT_ZONE.to_string())
    }

    /// Explicitly chosen project (CLI > config); other sources are resolved
    /// by [`crate::gcp::metadata::resolve_project_id`]
    pub fn explicit_project<'a>(&'a self, cli: Option<&'a str>) -> Option<&'a str> {
        cli.or(self.project_id.as_deref())
    }

    pub fn effective_bind_addr(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.bind_addr.clone())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
    }
}
