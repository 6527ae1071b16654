//! GCP API interaction module
//!
//! Thin helpers over the Compute Engine REST API, plus the metadata server.
//!
//! # Module Structure
//!
//! - [`auth`] - Credentials and gcloud default project/zone discovery
//! - [`client`] - Main GCP client and Compute URL builders
//! - [`http`] - HTTP utilities and typed API errors
//! - [`operation`] - Long-running operation model and waiting
//! - [`disk`], [`image`], [`instance`] - Resource helpers
//! - [`metadata`] - Metadata server lookups
//!
//! # Example
//!
//! ```ignore
//! use cloudauto::gcp::{client::GcpClient, instance};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = GcpClient::new("my-project", "us-central1-a").await?;
//!     let vms = instance::list_instances(&client).await?;
//!     let report = instance::stop_instances(&client, &["web-1".to_string()]).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod disk;
pub mod http;
pub mod image;
pub mod instance;
pub mod metadata;
pub mod operation;
