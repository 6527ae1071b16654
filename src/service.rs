//! Demo JSON service
//!
//! Two routes: a welcome message and an item echo.

use anyhow::{Context, Result};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;

pub const WELCOME_MESSAGE: &str = "Welcome to my Cloud Automation Project";

#[derive(Debug, Deserialize)]
pub struct ItemQuery {
    pub q: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ItemResponse {
    pub item_id: i64,
    pub q: Option<String>,
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/items/{item_id}", get(read_item))
}

async fn welcome() -> Json<serde_json::Value> {
    Json(json!({ "Message": WELCOME_MESSAGE }))
}

/// Echo an item id and optional `q`.
///
/// `item_id` must fit in an `i64`; anything else, including larger integers,
/// is a 422 whose `detail` is a single message string rather than a list of
/// per-field validation errors.
async fn read_item(Path(item_id): Path<String>, Query(query): Query<ItemQuery>) -> Response {
    match item_id.parse::<i64>() {
        Ok(item_id) => Json(ItemResponse { item_id, q: query.q }).into_response(),
        Err(_) => {
            tracing::debug!("Rejected non-integer item id {:?}", item_id);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": format!("item_id must be an integer, got {:?}", item_id) })),
            )
                .into_response()
        },
    }
}

/// Bind `addr` and serve until Ctrl-C
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("Server error")
}
