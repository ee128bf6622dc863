//! Error taxonomy for squall-core
//!
//! One tagged enum instead of a subclass ladder: every kind knows its
//! status, stable code, and which details are safe to expose. The chain
//! executor only propagates these; the error boundary renders them.

use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::response::StatusCode;

/// Result type alias for squall operations
pub type Result<T> = std::result::Result<T, HttpError>;

/// Typed request-processing error
///
/// Carried through the middleware chain untouched; converted to a
/// structured JSON body by the error boundary (or the dispatcher's
/// backstop when no boundary is installed).
#[derive(Debug, Error)]
pub enum HttpError {
    /// Malformed request
    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        details: Option<Value>,
    },

    /// Request failed validation
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    /// Missing or invalid credentials
    #[error("Authentication required")]
    Authentication,

    /// Authenticated but not permitted
    #[error("Forbidden: {message}")]
    Authorization {
        message: String,
        required: Vec<String>,
    },

    /// Route or resource not found
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Resource state conflict
    #[error("Conflict: {resource}")]
    Conflict { resource: String },

    /// Body exceeds the configured limit
    #[error("Payload too large: {received} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize, received: usize },

    /// Processing exceeded its deadline
    #[error("Request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Client sent requests faster than allowed
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64, limit: u32 },

    /// Dependency or service temporarily down
    #[error("Service unavailable")]
    Unavailable { retry_after_secs: Option<u64> },

    /// Unknown or uncaught failure; original message never exposed by default
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl HttpError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn authentication() -> Self {
        Self::Authentication
    }

    pub fn authorization(message: impl Into<String>, required: Vec<String>) -> Self {
        Self::Authorization {
            message: message.into(),
            required,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// The dispatcher's unmatched-path error
    pub fn route_not_found() -> Self {
        Self::not_found("Not Found")
    }

    pub fn conflict(resource: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
        }
    }

    pub fn payload_too_large(limit: usize, received: usize) -> Self {
        Self::PayloadTooLarge { limit, received }
    }

    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn rate_limited(retry_after_secs: u64, limit: u32) -> Self {
        Self::RateLimited {
            retry_after_secs,
            limit,
        }
    }

    pub fn unavailable(retry_after_secs: Option<u64>) -> Self {
        Self::Unavailable { retry_after_secs }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Normalize an untyped error into the Internal shape
    pub fn from_any(err: impl std::fmt::Display) -> Self {
        Self::internal(err.to_string())
    }

    /// Default status for this kind
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } | Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Authentication => "AUTHENTICATION_REQUIRED",
            Self::Authorization { .. } => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::Timeout { .. } => "REQUEST_TIMEOUT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Unavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether details and the original message may appear in responses
    pub fn is_exposed(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }

    /// The message clients see in the `error` field
    pub fn public_message(&self) -> String {
        match self {
            Self::BadRequest { message, .. }
            | Self::Validation { message, .. }
            | Self::Authorization { message, .. }
            | Self::NotFound { message } => message.clone(),
            Self::Authentication => "Authentication required".to_string(),
            Self::Conflict { .. } => "Conflict".to_string(),
            Self::PayloadTooLarge { .. } => "Payload too large".to_string(),
            Self::Timeout { .. } => "Request timed out".to_string(),
            Self::RateLimited { .. } => "Too many requests".to_string(),
            Self::Unavailable { .. } => "Service unavailable".to_string(),
            Self::Internal { .. } => "Internal Server Error".to_string(),
        }
    }

    /// Structured detail payload for exposed kinds
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::BadRequest { details, .. } | Self::Validation { details, .. } => details.clone(),
            Self::Authorization { required, .. } => {
                if required.is_empty() {
                    None
                } else {
                    Some(json!({ "required": required }))
                }
            }
            Self::Conflict { resource } => Some(json!({ "resource": resource })),
            Self::PayloadTooLarge { limit, received } => Some(json!({
                "limit_bytes": limit,
                "received_bytes": received,
            })),
            Self::Timeout { duration_ms } => Some(json!({ "timeout_ms": duration_ms })),
            Self::RateLimited {
                retry_after_secs,
                limit,
            } => Some(json!({
                "retry_after_secs": retry_after_secs,
                "limit": limit,
            })),
            Self::Unavailable { retry_after_secs } => retry_after_secs
                .map(|secs| json!({ "retry_after_secs": secs })),
            Self::Authentication | Self::NotFound { .. } | Self::Internal { .. } => None,
        }
    }

    /// Serialize to the wire shape: `{error, status, code, timestamp, details?}`
    ///
    /// `expose_internal` opts Internal errors into carrying their original
    /// message, for diagnostics only.
    pub fn to_body(&self, expose_internal: bool) -> Value {
        let error = match self {
            Self::Internal { message } if expose_internal => message.clone(),
            _ => self.public_message(),
        };

        let mut body = json!({
            "error": error,
            "status": self.status().as_u16(),
            "code": self.code(),
            "timestamp": epoch_millis(),
        });
        if self.is_exposed() {
            if let Some(details) = self.details() {
                body["details"] = details;
            }
        }
        body
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("Invalid JSON: {err}"))
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        Self::from_any(err)
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code_defaults() {
        let cases: Vec<(HttpError, u16, &str)> = vec![
            (HttpError::bad_request("nope"), 400, "BAD_REQUEST"),
            (
                HttpError::validation("bad field", json!({"field": "name"})),
                400,
                "VALIDATION_ERROR",
            ),
            (HttpError::authentication(), 401, "AUTHENTICATION_REQUIRED"),
            (
                HttpError::authorization("no access", vec!["admin".into()]),
                403,
                "FORBIDDEN",
            ),
            (HttpError::route_not_found(), 404, "NOT_FOUND"),
            (HttpError::conflict("user-42"), 409, "CONFLICT"),
            (HttpError::payload_too_large(100, 250), 413, "PAYLOAD_TOO_LARGE"),
            (
                HttpError::timeout(Duration::from_millis(1500)),
                408,
                "REQUEST_TIMEOUT",
            ),
            (HttpError::rate_limited(30, 100), 429, "RATE_LIMITED"),
            (HttpError::unavailable(Some(10)), 503, "SERVICE_UNAVAILABLE"),
            (HttpError::internal("boom"), 500, "INTERNAL_ERROR"),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status().as_u16(), status, "{code}");
            assert_eq!(err.code(), code);
            let body = err.to_body(false);
            assert_eq!(body["status"], status);
            assert_eq!(body["code"], code);
            assert!(body["timestamp"].as_u64().unwrap() > 0);
        }
    }

    #[test]
    fn test_internal_never_leaks_by_default() {
        let err = HttpError::internal("db password rejected at 10.0.0.3");
        let body = err.to_body(false);
        assert_eq!(body["error"], "Internal Server Error");
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_internal_exposed_when_configured() {
        let err = HttpError::internal("db password rejected at 10.0.0.3");
        let body = err.to_body(true);
        assert_eq!(body["error"], "db password rejected at 10.0.0.3");
    }

    #[test]
    fn test_exposed_details() {
        let body = HttpError::payload_too_large(1024, 4096).to_body(false);
        assert_eq!(body["details"]["limit_bytes"], 1024);
        assert_eq!(body["details"]["received_bytes"], 4096);

        let body = HttpError::authorization("no access", vec!["admin".into()]).to_body(false);
        assert_eq!(body["details"]["required"][0], "admin");

        let body = HttpError::timeout(Duration::from_secs(2)).to_body(false);
        assert_eq!(body["details"]["timeout_ms"], 2000);
    }

    #[test]
    fn test_not_found_shape() {
        let body = HttpError::route_not_found().to_body(false);
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["status"], 404);
    }

    #[test]
    fn test_from_any_normalizes_to_internal() {
        let err = HttpError::from_any("something odd");
        assert_eq!(err.status().as_u16(), 500);
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
