//! Metadata lookups that read the process environment
//!
//! Kept in their own binary as a single test, since they rewrite
//! `GCE_METADATA_HOST`, `CLOUDSDK_CONFIG` and the project variables.

use cloudauto::gcp::metadata::{self, MetadataClient, FALLBACK_PROJECT_ID};
use std::path::PathBuf;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("cloudauto-gcloud-{}", uuid::Uuid::new_v4()))
}

/// Default metadata host, project resolution order and fallback
#[tokio::test]
async fn test_metadata_resolution_from_environment() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/instance/hostname"))
        .and(header("Metadata-Flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_string("vm-7.c.env-project.internal"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/project/project-id"))
        .respond_with(ResponseTemplate::new(200).set_body_string("metadata-project-1"))
        .mount(&server)
        .await;

    std::env::set_var("GCE_METADATA_HOST", server.address().to_string());
    for var in ["CLOUDSDK_CORE_PROJECT", "GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"] {
        std::env::remove_var(var);
    }
    let gcloud_dir = scratch_dir();
    std::env::set_var("CLOUDSDK_CONFIG", &gcloud_dir);

    // Free functions go through GCE_METADATA_HOST
    assert_eq!(
        metadata::get_hostname().await.as_deref(),
        Some("vm-7.c.env-project.internal")
    );
    assert_eq!(
        metadata::gcp_metadata("project/project-id").await.as_deref(),
        Some("metadata-project-1")
    );
    assert!(metadata::gcp_metadata("instance/unknown-key").await.is_none());

    // Nothing configured locally: the metadata server decides
    let client = MetadataClient::new().unwrap();
    assert_eq!(metadata::resolve_project_id(None, &client).await, "metadata-project-1");
    assert_eq!(metadata::resolve_project_id(Some(""), &client).await, "metadata-project-1");

    // Unreachable metadata server falls back to the built-in project
    let unreachable = MetadataClient::with_base_url("http://127.0.0.1:1").unwrap();
    assert_eq!(metadata::resolve_project_id(None, &unreachable).await, FALLBACK_PROJECT_ID);

    // gcloud properties outrank the metadata server
    std::fs::create_dir_all(&gcloud_dir).unwrap();
    std::fs::write(gcloud_dir.join("properties"), "[core]\nproject = gcloud-project-9\n").unwrap();
    assert_eq!(metadata::resolve_project_id(None, &client).await, "gcloud-project-9");

    // and the environment outranks gcloud
    std::env::set_var("GOOGLE_CLOUD_PROJECT", "env-project-22");
    assert_eq!(metadata::resolve_project_id(None, &client).await, "env-project-22");

    std::env::remove_var("GOOGLE_CLOUD_PROJECT");
    std::fs::remove_dir_all(&gcloud_dir).unwrap();
}
