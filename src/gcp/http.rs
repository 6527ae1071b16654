//! HTTP utilities for GCP REST API calls

use anyhow::{Context, Result};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A non-success response from a GCP API
#[derive(Debug, Clone, thiserror::Error)]
#[error("API request failed: {status}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// Build an error from a response status and its raw body.
    ///
    /// GCP wraps errors as `{"error": {"code": .., "message": ..}}`; anything
    /// else falls back to the canonical reason phrase.
    fn from_body(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

        Self { status, message }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    pub fn is_conflict(&self) -> bool {
        self.status == StatusCode::CONFLICT
    }
}

/// Status of the [`ApiError`] carried by `error`, if any
pub fn api_status(error: &anyhow::Error) -> Option<StatusCode> {
    error.downcast_ref::<ApiError>().map(|e| e.status)
}

/// True when `error` is a 404 from the API
pub fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ApiError>()
        .is_some_and(ApiError::is_not_found)
}

/// True when `error` is a 409 from the API
pub fn is_conflict(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ApiError>()
        .is_some_and(ApiError::is_conflict)
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cloudauto/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        self.send(Method::GET, url, token, None).await
    }

    /// Make a POST request to a GCP API
    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        self.send(Method::POST, url, token, body).await
    }

    /// Make a DELETE request to a GCP API
    pub async fn delete(&self, url: &str, token: &str) -> Result<Value> {
        self.send(Method::DELETE, url, token, None).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), url).bearer_auth(token);
        match body {
            Some(body) => request = request.json(body),
            // Compute rejects a bodiless POST without Content-Length (411)
            None if method == Method::POST => {
                request = request.header(CONTENT_LENGTH, 0).body(Vec::<u8>::new());
            },
            None => {},
        }

        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Only the sanitized body is logged; the typed error keeps the API message
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            return Err(ApiError::from_body(status, &response_body).into());
        }

        if response_body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_body).context("Failed to parse response JSON")
    }
}

/// Format a GCP API error for display
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    if let Some(status) = api_status(error) {
        return match status.as_u16() {
            400 => "Invalid request. Check your parameters.".to_string(),
            401 => "Authentication failed. Run 'gcloud auth application-default login'."
                .to_string(),
            403 => "Permission denied. Check your GCP IAM permissions.".to_string(),
            404 => "Resource not found.".to_string(),
            409 => "Resource conflict. The resource may already exist or be in use.".to_string(),
            429 => "Rate limit exceeded. Please try again later.".to_string(),
            500..=599 => "GCP service temporarily unavailable. Please try again.".to_string(),
            _ => format!("Request failed with status {}.", status),
        };
    }

    let error_str = format!("{:#}", error);
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(120)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_reads_gcp_message() {
        let body = r#"{"error":{"code":404,"message":"The resource 'x' was not found"}}"#;
        let err = ApiError::from_body(StatusCode::NOT_FOUND, body);
        assert!(err.is_not_found());
        assert_eq!(err.message, "The resource 'x' was not found");
    }

    #[test]
    fn api_error_falls_back_to_reason() {
        let err = ApiError::from_body(StatusCode::CONFLICT, "<html>nope</html>");
        assert!(err.is_conflict());
        assert_eq!(err.message, "Conflict");
    }

    #[test]
    fn downcast_survives_context() {
        let err: anyhow::Error = ApiError::from_body(StatusCode::NOT_FOUND, "").into();
        let err = err.context("Failed to get disk");
        assert!(is_not_found(&err));
        assert!(!is_conflict(&err));
        assert_eq!(format_gcp_error(&err), "Resource not found.");
    }

    #[test]
    fn sanitize_truncates_long_bodies() {
        let body = "a".repeat(500);
        let out = sanitize_for_log(&body);
        assert!(out.starts_with(&"a".repeat(MAX_LOG_BODY_LENGTH)));
        assert!(out.contains("500 bytes total"));
    }

    #[test]
    fn format_plain_error_is_sanitized() {
        let err = anyhow::anyhow!("connection\nrefused");
        assert_eq!(format_gcp_error(&err), "connectionrefused...");
    }
}
