//! axum middleware gating every route behind the configured auth provider
//! (spec §4.5: "given a request, return an `AuthResult` or reject").

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

use super::BasicAuthProvider;

/// Implemented by the per-mode state structs so one middleware fn serves
/// both the kiosk and admin routers.
pub trait HasBasicAuth {
    fn basic_auth(&self) -> &BasicAuthProvider;
}

pub async fn require_basic_auth<S>(State(state): State<Arc<S>>, request: Request, next: Next) -> Response
where
    S: HasBasicAuth + Send + Sync + 'static,
{
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    match state.basic_auth().verify(request.headers(), &ip) {
        Ok(_) => next.run(request).await,
        Err(e) => AppError::from(e).into_response(),
    }
}
