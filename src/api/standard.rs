//! Standard API every agent exposes (spec §4.6): status, command, recent,
//! admin password rotation, and the added `/api/reprocess` (spec §1.2).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::paths::DataPaths;
use crate::state::KioskState;

use super::{client_ip, failure, Envelope};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
pub struct QueueCounts {
    pub new: usize,
    #[serde(rename = "pendingMerge")]
    pub pending_merge: usize,
    #[serde(rename = "pendingUpload")]
    pub pending_upload: usize,
    pub uploaded: usize,
    pub error: usize,
    pub total: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(rename = "uptimeSec")]
    pub uptime_sec: u64,
    pub queue: QueueCounts,
    #[serde(rename = "diskFreeMB")]
    pub disk_free_mb: u64,
    #[serde(rename = "lastBatchAt")]
    pub last_batch_at: Option<chrono::DateTime<chrono::Utc>>,
    pub version: String,
    pub paused: bool,
}

pub async fn status(State(kiosk): State<Arc<KioskState>>) -> Response {
    let paths: &DataPaths = &kiosk.paths;
    let queue = QueueCounts {
        new: DataPaths::count_pdfs(&paths.inbox),
        pending_merge: DataPaths::count_pdfs(&paths.pending),
        pending_upload: DataPaths::count_pdfs(&paths.merged),
        uploaded: DataPaths::count_pdfs(&paths.uploaded),
        error: DataPaths::count_pdfs(&paths.error),
        total: 0,
    };
    let total = queue.new + queue.pending_merge + queue.pending_upload + queue.uploaded + queue.error;
    let queue = QueueCounts { total, ..queue };

    let response = StatusResponse {
        uptime_sec: kiosk.uptime_secs(),
        disk_free_mb: disk_free_mb(&paths.data_root),
        queue,
        last_batch_at: *kiosk.last_batch_at.lock().unwrap(),
        version: VERSION.to_string(),
        paused: kiosk.is_paused(),
    };
    Envelope::ok(response).into_response()
}

fn disk_free_mb(path: &std::path::Path) -> u64 {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    disks
        .list()
        .iter()
        .filter(|d| canonical.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space() / (1024 * 1024))
        .unwrap_or(0)
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    RunBatch,
    Pause,
    Resume,
    RescanError,
    UpdateConfig,
    RestartService,
}

pub async fn command(
    State(kiosk): State<Arc<KioskState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(cmd): Json<Command>,
) -> Response {
    let ip = client_ip(&headers, peer);
    let (action, outcome, result) = match cmd {
        Command::RunBatch => {
            let state = kiosk.clone();
            tokio::spawn(async move { crate::pipeline::run_merge_cycle(state).await });
            ("RUN_BATCH", "SUCCESS", Envelope::ok_with_message(serde_json::Value::Null, "batch cycle started").into_response())
        }
        Command::Pause => {
            kiosk.set_paused(true);
            ("PAUSE", "SUCCESS", Envelope::ok(serde_json::json!({ "paused": true })).into_response())
        }
        Command::Resume => {
            kiosk.set_paused(false);
            ("RESUME", "SUCCESS", Envelope::ok(serde_json::json!({ "paused": false })).into_response())
        }
        Command::RescanError => {
            let files: Vec<String> = crate::paths::walk_pdfs(&kiosk.paths.error)
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
                .collect();
            let count = files.len();
            ("RESCAN_ERROR", "SUCCESS", Envelope::ok(serde_json::json!({ "count": count, "files": files })).into_response())
        }
        Command::UpdateConfig => {
            let outcome = kiosk.config.write().unwrap().reload();
            match outcome {
                Ok(()) => ("UPDATE_CONFIG", "SUCCESS", Envelope::ok_with_message(serde_json::Value::Null, "config reloaded").into_response()),
                Err(e) => ("UPDATE_CONFIG", "FAILURE", AppError::from(e).into_response()),
            }
        }
        Command::RestartService => (
            "RESTART_SERVICE",
            "SUCCESS",
            Envelope::ok_with_message(serde_json::json!({ "success": false }), "not implemented").into_response(),
        ),
    };

    kiosk.audit.log(&ip, action, None, None, outcome, None);
    result
}

#[derive(Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    50
}

pub async fn recent(State(kiosk): State<Arc<KioskState>>, Query(query): Query<RecentQuery>) -> Response {
    Envelope::ok(kiosk.recent.recent(query.limit)).into_response()
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(kiosk): State<Arc<KioskState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ChangePasswordRequest>,
) -> Response {
    let ip = client_ip(&headers, peer);
    if !kiosk.auth.change_password(&req.current_password, &req.new_password) {
        kiosk.audit.log(&ip, "PASSWORD_CHANGE", None, None, "FAILURE", Some("current password incorrect"));
        return failure("current password incorrect");
    }

    let mut config = kiosk.config.write().unwrap();
    config.config.admin_password = req.new_password;
    let save_result = config.save();
    drop(config);

    match save_result {
        Ok(()) => {
            kiosk.audit.log(&ip, "PASSWORD_CHANGE", None, None, "SUCCESS", None);
            Envelope::ok_with_message(serde_json::Value::Null, "password updated").into_response()
        }
        Err(e) => {
            kiosk.audit.log(&ip, "PASSWORD_CHANGE", None, None, "FAILURE", Some(&e.to_string()));
            AppError::from(e).into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct ReprocessRequest {
    pub file: String,
    pub identifier: String,
}

/// `POST /api/reprocess` (spec §1.2, grounded in scenario S5): manually
/// re-tags an *error* file and moves it into *pending*.
pub async fn reprocess(State(kiosk): State<Arc<KioskState>>, Json(req): Json<ReprocessRequest>) -> Response {
    let pattern = {
        let config = kiosk.config.read().unwrap();
        regex::Regex::new(&config.config.raw.qr.pattern).unwrap_or_else(|_| crate::qr::extractor::default_pattern())
    };
    if !pattern.is_match(&req.identifier) {
        return failure(format!("identifier '{}' does not match configured pattern", req.identifier));
    }

    let source = kiosk.paths.error.join(&req.file);
    if !source.exists() {
        return failure(format!("file '{}' not found in error folder", req.file));
    }

    if let Err(e) = std::fs::create_dir_all(&kiosk.paths.pending) {
        return AppError::from(e).into_response();
    }
    let target_name = if kiosk.paths.pending.join(format!("{}.pdf", req.identifier)).exists() {
        let n = crate::paths::next_free_suffix(&kiosk.paths.pending, &req.identifier);
        format!("{}({n}).pdf", req.identifier)
    } else {
        format!("{}.pdf", req.identifier)
    };
    let target = kiosk.paths.pending.join(target_name);

    if let Err(e) = std::fs::rename(&source, &target) {
        return AppError::from(e).into_response();
    }
    let _ = std::fs::remove_file(source.with_extension("error.json"));

    kiosk.recent.push("REPROCESSED", Some(req.identifier.clone()), Some(format!("-> {}", target.display())));
    kiosk.audit.log("operator", "REPROCESS", None, None, "SUCCESS", Some(&req.identifier));

    Envelope::ok_with_message(serde_json::json!({ "movedTo": target.display().to_string() }), "file re-queued").into_response()
}
