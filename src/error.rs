use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::rate_limiter::RateLimitTier;
use crate::response::timestamp;

/// A single rejected request field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub rejected_value: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Rate limit exceeded on {tier} tier")]
    RateLimited { tier: RateLimitTier, retry_after: u64 },

    #[error("{0}")]
    NotFound(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Rate limit store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<redis::RedisError> for ProxyError {
    fn from(err: redis::RedisError) -> Self {
        ProxyError::Store(err.to_string())
    }
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Internal(_) | ProxyError::Configuration(_) | ProxyError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing summary that never carries upstream or internal detail.
    fn public_message(&self) -> &str {
        match self {
            ProxyError::Validation(_) => "Validation failed",
            ProxyError::RateLimited { .. } => "Too many requests, please try again later.",
            ProxyError::NotFound(message) => message,
            ProxyError::UpstreamUnavailable(_) => "Upstream service unavailable",
            _ => "Internal server error",
        }
    }
}

/// A [`ProxyError`] bound to the request it failed, ready to be rendered.
///
/// Outside development only `{error, timestamp, path}` is returned for
/// not-found and server-side failures; development adds the underlying
/// error message.
#[derive(Debug)]
pub struct ApiError {
    error: ProxyError,
    path: String,
    expose_detail: bool,
}

impl ApiError {
    pub fn new(error: ProxyError, path: impl Into<String>, expose_detail: bool) -> Self {
        Self {
            error,
            path: path.into(),
            expose_detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();

        match self.error {
            ProxyError::Validation(details) => (
                status,
                Json(json!({
                    "error": "Validation failed",
                    "details": details,
                })),
            )
                .into_response(),
            ProxyError::RateLimited { retry_after, .. } => {
                let mut response = (
                    status,
                    Json(json!({
                        "error": "Too many requests, please try again later.",
                        "retryAfter": retry_after,
                    })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
            ref error => {
                if status.is_server_error() {
                    tracing::error!(
                        target: "crime_proxy::error",
                        path = %self.path,
                        status = %status,
                        error = %error,
                        "Request failed"
                    );
                }

                let mut body = json!({
                    "error": error.public_message(),
                    "timestamp": timestamp(),
                    "path": self.path,
                });
                if self.expose_detail && status.is_server_error() {
                    body["message"] = json!(error.to_string());
                }

                (status, Json(body)).into_response()
            }
        }
    }
}
