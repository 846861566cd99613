//! HTTP API: response envelope shared by every handler (spec §4.6), plus
//! the standard and admin route modules.

pub mod admin;
pub mod standard;

use axum::response::{IntoResponse, Json};
use axum::http::StatusCode;
use serde::Serialize;

/// `{ success, data, message?, timestamp, signature?, encrypted, metadata? }`.
/// `signature`/`encrypted` are reserved fields kept on the wire for forward
/// compatibility — always `null`/`false` today (spec §4.6).
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub signature: Option<String>,
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data, message: None, timestamp: chrono::Utc::now(), signature: None, encrypted: false, metadata: None }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self { message: Some(message.into()), ..Self::ok(data) }
    }

    pub fn into_response(self) -> axum::response::Response
    where
        T: 'static,
    {
        Json(self).into_response()
    }
}

pub fn failure(message: impl Into<String>) -> axum::response::Response {
    let body = Envelope { success: false, data: serde_json::Value::Null, message: Some(message.into()), timestamp: chrono::Utc::now(), signature: None, encrypted: false, metadata: None };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Extracts the caller's IP for rate limiting and audit logging, preferring
/// `X-Forwarded-For` when present (reverse-proxied deployments) and falling
/// back to the raw peer address.
pub fn client_ip(headers: &axum::http::HeaderMap, peer: std::net::SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| peer.ip().to_string())
}
