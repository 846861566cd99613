//! Admin API (spec §4.7): registry CRUD, fleet-wide health fan-out, and
//! per-instance proxying through the remote client.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::registry::{Instance, SaveTarget};
use crate::state::AdminState;

use super::{failure, Envelope};

const HEALTH_FANOUT_CONCURRENCY: usize = 8;

pub async fn list_instances(State(admin): State<Arc<AdminState>>) -> Response {
    let registry = admin.registry.read().unwrap();
    let instances: Vec<Instance> = registry.list(None).into_iter().cloned().collect();
    Envelope::ok(instances).into_response()
}

#[derive(Deserialize)]
pub struct TargetQuery {
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Deserialize)]
pub struct ReplaceInstancesRequest {
    pub instances: Vec<Instance>,
}

pub async fn replace_instances(
    State(admin): State<Arc<AdminState>>,
    Query(query): Query<TargetQuery>,
    Json(req): Json<ReplaceInstancesRequest>,
) -> Response {
    let target = match query.target.as_deref() {
        Some("remote") => SaveTarget::Remote,
        _ => SaveTarget::Local,
    };

    {
        let mut registry = admin.registry.write().unwrap();
        registry.replace_all(req.instances);
    }
    let save_result = {
        let registry = admin.registry.read().unwrap();
        registry.save(target).await
    };

    match save_result {
        Ok(()) => Envelope::ok_with_message(serde_json::Value::Null, "registry saved").into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

#[derive(Serialize)]
struct HealthRow {
    id: String,
    label: String,
    online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Fans `GET /api/status` out to every registered instance with bounded
/// concurrency (spec §4.7, §5: 5 s timeout for fleet-wide polling).
pub async fn health(State(admin): State<Arc<AdminState>>) -> Response {
    let instances: Vec<Instance> = {
        let registry = admin.registry.read().unwrap();
        registry.list(None).into_iter().cloned().collect()
    };

    let rows: Vec<HealthRow> = stream::iter(instances)
        .map(|instance| {
            let client = &admin.client;
            async move {
                match client.status(&instance).await {
                    Ok(status) => HealthRow { id: instance.id, label: instance.label, online: true, status: Some(status), error: None },
                    Err(e) => HealthRow { id: instance.id, label: instance.label, online: false, status: None, error: Some(e.to_string()) },
                }
            }
        })
        .buffer_unordered(HEALTH_FANOUT_CONCURRENCY)
        .collect()
        .await;

    Envelope::ok(rows).into_response()
}

fn lookup<'a>(admin: &'a Arc<AdminState>, id: &str) -> Option<Instance> {
    admin.registry.read().unwrap().get(id).cloned()
}

pub async fn instance_status(State(admin): State<Arc<AdminState>>, AxumPath(id): AxumPath<String>) -> Response {
    let Some(instance) = lookup(&admin, &id) else { return failure(format!("unknown instance '{id}'")) };
    match admin.client.status(&instance).await {
        Ok(status) => Envelope::ok(status).into_response(),
        Err(e) => failure(e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn instance_recent(State(admin): State<Arc<AdminState>>, AxumPath(id): AxumPath<String>, Query(query): Query<RecentQuery>) -> Response {
    let Some(instance) = lookup(&admin, &id) else { return failure(format!("unknown instance '{id}'")) };
    match admin.client.recent(&instance, query.limit).await {
        Ok(recent) => Envelope::ok(recent).into_response(),
        Err(e) => failure(e.to_string()),
    }
}

pub async fn instance_command(State(admin): State<Arc<AdminState>>, AxumPath(id): AxumPath<String>, Json(body): Json<serde_json::Value>) -> Response {
    let Some(instance) = lookup(&admin, &id) else { return failure(format!("unknown instance '{id}'")) };
    match admin.client.command(&instance, body).await {
        Ok(result) => Envelope::ok(result).into_response(),
        Err(e) => failure(e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct TestInstanceRequest {
    #[serde(flatten)]
    pub instance: Instance,
}

/// `POST /api/admin/test-instance`: reachability check for a record that
/// may not yet be saved to the registry.
pub async fn test_instance(State(admin): State<Arc<AdminState>>, Json(req): Json<TestInstanceRequest>) -> Response {
    match admin.client.status(&req.instance).await {
        Ok(status) => Envelope::ok(serde_json::json!({ "reachable": true, "status": status })).into_response(),
        Err(e) => Envelope::ok(serde_json::json!({ "reachable": false, "reason": e })).into_response(),
    }
}

pub async fn export_instances(State(admin): State<Arc<AdminState>>) -> Response {
    let registry = admin.registry.read().unwrap();
    match registry.export_json() {
        Ok(json) => ([("content-type", "application/json")], json).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}
