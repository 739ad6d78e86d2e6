//! Error types for MoviePolls
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Per-field validation messages for form submissions.
///
/// Keys are the form field names (`Title`, `Links`, ...). The caller
/// re-renders the form with each message next to its field.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, String>);

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error for `field`. The first message for a field wins.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// `Ok(())` when no field has an error, otherwise `AppError::Form`.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Form(self))
        }
    }
}

impl std::fmt::Display for FormErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// in the application. It implements `IntoResponse` to
/// automatically convert errors to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Invalid user input (400)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Per-field form validation failure (400)
    #[error("Form validation failed: {0}")]
    Form(FormErrors),

    /// Duplicate entity or forbidden state transition (400)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or stale session, wrong credentials (302 to login)
    #[error("Authentication required")]
    Unauthorized,

    /// Site policy forbids the operation (400)
    #[error("Disabled: {0}")]
    PolicyDisabled(String),

    /// Config key has no stored value
    #[error("No value stored for config key {0}")]
    NoValue(String),

    /// Config key read through the wrong typed getter (400)
    #[error("Config key {key} holds a {found} value, not a {expected}")]
    ConfigType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Metadata provider failure (400)
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error (500)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document encoding error (500)
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::InvalidInput(_) | AppError::Form(_) | AppError::ConfigType { .. } => {
                "invalid_input"
            }
            AppError::Conflict(_) => "conflict",
            AppError::Unauthorized => "unauthorized",
            AppError::PolicyDisabled(_) => "policy_disabled",
            AppError::NoValue(_) => "no_value",
            AppError::Metadata(_) => "metadata",
            AppError::HttpClient(_) => "http_client",
            AppError::Database(_)
            | AppError::Io(_)
            | AppError::Json(_)
            | AppError::Config(_)
            | AppError::Internal(_) => "internal",
        }
    }

    /// Whether this error means "the key is absent" on a config read.
    pub fn is_no_value(&self) -> bool {
        matches!(self, AppError::NoValue(_))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(anyhow::anyhow!("Migration failed: {}", err))
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body. Unauthenticated requests are sent to the
    /// login page instead.
    fn into_response(self) -> Response {
        use axum::Json;

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[self.kind()])
            .inc();

        let (status, body) = match &self {
            AppError::Unauthorized => {
                return (
                    StatusCode::FOUND,
                    [(axum::http::header::LOCATION, "/user/login")],
                )
                    .into_response();
            }
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": self.to_string() }),
            ),
            AppError::Form(errors) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": "validation", "fields": errors }),
            ),
            AppError::InvalidInput(msg)
            | AppError::Conflict(msg)
            | AppError::PolicyDisabled(msg)
            | AppError::Metadata(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            AppError::ConfigType { .. } => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": self.to_string() }),
            ),
            AppError::HttpClient(_) => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({ "error": "Upstream request failed" }),
            ),
            AppError::NoValue(_)
            | AppError::Database(_)
            | AppError::Io(_)
            | AppError::Json(_)
            | AppError::Config(_)
            | AppError::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
