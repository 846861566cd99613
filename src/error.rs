//! Error taxonomy for the kiosk/fleet binary.
//!
//! Each concern gets its own `thiserror` enum rather than a shared
//! catch-all — callers match on the kind that matters to them and
//! everything still composes via `#[from]` into [`AppError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("secret decryption failed: {0}")]
    Decrypt(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QrError {
    #[error("failed to open PDF: {0}")]
    OpenFailed(String),
    #[error("failed to rasterize page {page}: {reason}")]
    RasterFailed { page: usize, reason: String },
    #[error("no engine available")]
    NoEngineAvailable,
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("invalid input PDF {path}: {reason}")]
    InvalidInput { path: String, reason: String },
    #[error("merge produced no pages")]
    Empty,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("backend rejected upload: {0}")]
    Rejected(String),
    #[error("size mismatch after copy: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("locked out, {remaining_secs}s remaining")]
    LockedOut { remaining_secs: u64 },
    #[error("missing or malformed Authorization header")]
    MalformedHeader,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unsupported registry URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Categorized remote-client failure — never collapsed to "unknown error" (spec §4.7).
#[derive(Debug, thiserror::Error, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteFailure {
    #[error("timeout")]
    Timeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("http {status}")]
    NonSuccess { status: u16 },
    #[error("response did not match expected schema: {0}")]
    SchemaMismatch(String),
}

/// Top-level error uniting every concern, for the handful of call sites
/// (HTTP handlers, `main`) that need one type to propagate through `?`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Qr(#[from] QrError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Auth(AuthError::InvalidCredentials) => StatusCode::UNAUTHORIZED,
            AppError::Auth(AuthError::MalformedHeader) => StatusCode::UNAUTHORIZED,
            AppError::Auth(AuthError::LockedOut { .. }) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
