//! Pipeline orchestrator (spec §4.3): classification (inbox → pending |
//! error), the batch merge cycle (pending/merged/uploaded → merged |
//! uploaded), and the upload loop driving the retry queue. Grounded on the
//! teacher's `.par_iter()` worker-pool usage in `main.rs` for the
//! classification fan-out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use rayon::prelude::*;
use regex::Regex;

use crate::pdf_merge::{file_sha1, merge_documents};
use crate::qr::extractor::{self, Classification, ExtractorConfig};
use crate::state::KioskState;
use crate::upload::{idempotency_key, retry_delay, UploadBackend};

#[derive(Debug, serde::Serialize)]
struct ErrorSidecar {
    original_path: String,
    error_message: String,
    moved_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidates: Option<Vec<String>>,
}

/// Runs classification for every path a detector callback has produced,
/// using a worker pool sized by `system.worker_count` (spec §5a).
pub fn classify_batch(state: &Arc<KioskState>, paths: Vec<PathBuf>, worker_count: usize) {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(worker_count.max(1)).build();
    let pool = match pool {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to build classification worker pool");
            return;
        }
    };
    pool.install(|| {
        paths.into_par_iter().for_each(|path| classify_one(state, &path));
    });
}

fn classify_one(state: &Arc<KioskState>, path: &Path) {
    *state.last_arrival.lock().unwrap() = std::time::Instant::now();
    let config = state.config.read().unwrap();
    let qr = &config.config.raw.qr;
    let pattern = match Regex::new(&qr.pattern) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, pattern = %qr.pattern, "invalid qr.pattern, using default");
            extractor::default_pattern()
        }
    };
    let cfg = ExtractorConfig {
        pattern: &pattern,
        adaptive_dpi: qr.adaptive_dpi,
        fixed_dpi: qr.fixed_dpi,
        dpi_candidates: &qr.dpi_candidates,
        engine_order: &qr.engine_order,
        save_failed_images: qr.save_failed_images,
        failed_images_path: &qr.failed_images_path,
    };
    let multiple_qr_action = config.config.raw.qr.multiple_qr_action;
    let pending_dir = state.paths.pending.clone();
    let error_dir = state.paths.error.clone();
    drop(config);

    let result = extractor::extract(path, &cfg);
    match result {
        Ok(extraction) => match extraction.classification {
            Classification::Success { code } => {
                move_to_pending(state, path, &pending_dir, &code);
            }
            Classification::Unrecognized => {
                move_to_error(state, path, &error_dir, "no QR code", None);
            }
            Classification::Ambiguous { candidates } => {
                use crate::config::AmbiguousPolicy;
                let message = match multiple_qr_action {
                    AmbiguousPolicy::Strict => "ambiguous QR codes (policy=strict)".to_string(),
                    AmbiguousPolicy::Manual => "ambiguous QR codes, awaiting manual tag".to_string(),
                };
                move_to_error(state, path, &error_dir, &message, Some(candidates));
            }
        },
        Err(e) => {
            move_to_error(state, path, &error_dir, &e.to_string(), None);
        }
    }
}

fn move_to_pending(state: &Arc<KioskState>, source: &Path, pending_dir: &Path, identifier: &str) {
    if let Err(e) = std::fs::create_dir_all(pending_dir) {
        tracing::error!(error = %e, "failed to create pending directory");
        return;
    }
    let direct = pending_dir.join(format!("{identifier}.pdf"));
    let target = if direct.exists() {
        let n = crate::paths::next_free_suffix(pending_dir, identifier);
        pending_dir.join(format!("{identifier}({n}).pdf"))
    } else {
        direct
    };
    match std::fs::rename(source, &target) {
        Ok(()) => {
            state.recent.push("CLASSIFIED", Some(identifier.to_string()), Some(format!("-> {}", target.display())));
            state.audit.log("system", "CLASSIFY", None, None, "SUCCESS", Some(identifier));
        }
        Err(e) => tracing::error!(error = %e, from = %source.display(), to = %target.display(), "failed to move classified file to pending"),
    }
}

fn move_to_error(state: &Arc<KioskState>, source: &Path, error_dir: &Path, message: &str, candidates: Option<Vec<String>>) {
    if let Err(e) = std::fs::create_dir_all(error_dir) {
        tracing::error!(error = %e, "failed to create error directory");
        return;
    }
    let Some(file_name) = source.file_name() else { return };
    let target = error_dir.join(file_name);

    if std::fs::rename(source, &target).is_err() {
        tracing::error!(from = %source.display(), "failed to move file to error directory");
        return;
    }

    let sidecar = ErrorSidecar {
        original_path: source.display().to_string(),
        error_message: message.to_string(),
        moved_at: chrono::Utc::now(),
        candidates,
    };
    let sidecar_path = target.with_extension("error.json");
    if let Ok(json) = serde_json::to_vec_pretty(&sidecar) {
        let _ = std::fs::write(sidecar_path, json);
    }

    state.recent.push("CLASSIFICATION_FAILED", None, Some(message.to_string()));
    state.audit.log("system", "CLASSIFY", None, None, "FAILURE", Some(message));
}

/// Strip a trailing `(n)` disambiguator and validate against `pattern`;
/// returns `None` for names that don't resolve to a valid identifier.
fn resolve_identifier(path: &Path, pattern: &Regex) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let id = crate::paths::identifier_from_stem(stem);
    if pattern.is_match(id) {
        Some(id.to_string())
    } else {
        None
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum SourceTier {
    Uploaded,
    Merged,
    Pending,
}

struct GroupedInput {
    path: PathBuf,
    tier: SourceTier,
    mtime: SystemTime,
}

/// Runs one merge cycle; a no-op if one is already in flight (spec §4.3).
pub async fn run_merge_cycle(state: Arc<KioskState>) {
    if state.is_paused() {
        tracing::debug!("skipping merge cycle, paused");
        return;
    }
    if !state.try_begin_merge() {
        tracing::debug!("merge cycle already in flight, skipping");
        return;
    }
    let state_for_blocking = state.clone();
    let result = tokio::task::spawn_blocking(move || run_merge_cycle_blocking(&state_for_blocking)).await;
    if let Err(e) = result {
        tracing::error!(error = %e, "merge cycle task panicked");
    }
    state.end_merge();
}

fn run_merge_cycle_blocking(state: &Arc<KioskState>) {
    let config = state.config.read().unwrap();
    let pattern = Regex::new(&config.config.raw.qr.pattern).unwrap_or_else(|_| extractor::default_pattern());
    let dedup = config.config.raw.pdf.remove_duplicates;
    drop(config);

    let mut groups: BTreeMap<String, Vec<GroupedInput>> = BTreeMap::new();
    for (dir, tier) in [
        (&state.paths.pending, SourceTier::Pending),
        (&state.paths.merged, SourceTier::Merged),
        (&state.paths.uploaded, SourceTier::Uploaded),
    ] {
        for path in crate::paths::walk_pdfs(dir) {
            let Some(id) = resolve_identifier(&path, &pattern) else {
                tracing::warn!(path = %path.display(), "skipping file with unparsable identifier during merge");
                continue;
            };
            let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
            groups.entry(id).or_default().push(GroupedInput { path, tier, mtime });
        }
    }

    for (identifier, inputs) in groups {
        if let Err(e) = merge_group(state, &identifier, inputs, dedup) {
            tracing::error!(error = %e, identifier, "merge group failed, continuing with remaining groups");
            state.audit.log("system", "MERGE", None, None, "FAILURE", Some(&format!("{identifier}: {e}")));
        }
    }
}

fn merge_group(state: &Arc<KioskState>, identifier: &str, mut inputs: Vec<GroupedInput>, dedup: bool) -> std::io::Result<()> {
    let has_pending = inputs.iter().any(|i| i.tier == SourceTier::Pending);
    let has_uploaded = inputs.iter().any(|i| i.tier == SourceTier::Uploaded);
    let has_merged = inputs.iter().any(|i| i.tier == SourceTier::Merged);

    let target_dir = if has_uploaded && (has_pending || has_merged) {
        &state.paths.merged
    } else if has_uploaded {
        &state.paths.uploaded
    } else {
        &state.paths.merged
    };

    if target_dir == &state.paths.uploaded && !has_pending && !has_merged {
        // Nothing to do: the only input is already the terminal artifact.
        return Ok(());
    }

    inputs.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| tier_rank(a.tier).cmp(&tier_rank(b.tier))));

    let target_path = target_dir.join(format!("{identifier}.pdf"));
    let temp_path = target_dir.join(format!("{identifier}.pdf.tmp"));
    std::fs::create_dir_all(target_dir)?;

    let refs: Vec<&Path> = inputs.iter().map(|i| i.path.as_path()).collect();
    let merged_bytes = merge_documents(&refs, dedup).map_err(std::io::Error::other)?;
    std::fs::write(&temp_path, merged_bytes)?;
    std::fs::rename(&temp_path, &target_path)?;

    for input in &inputs {
        if input.path.canonicalize().ok() != target_path.canonicalize().ok() {
            let _ = std::fs::remove_file(&input.path);
        }
    }

    state.recent.push("MERGED", Some(identifier.to_string()), Some(format!("{} inputs", inputs.len())));
    state.audit.log("system", "MERGE", None, None, "SUCCESS", Some(identifier));

    if target_dir == &state.paths.merged {
        enqueue_upload(state, identifier.to_string());
    }
    Ok(())
}

fn tier_rank(tier: SourceTier) -> u8 {
    match tier {
        SourceTier::Uploaded => 0,
        SourceTier::Merged => 1,
        SourceTier::Pending => 2,
    }
}

/// Spawns the retry-driven upload for one identifier's `merged/<id>.pdf`.
/// Runs on the tokio runtime since upload backends are async (spec §5b).
fn enqueue_upload(state: &Arc<KioskState>, identifier: String) {
    let state = state.clone();
    tokio::spawn(async move { upload_with_retry(state, identifier).await });
}

async fn upload_with_retry(state: Arc<KioskState>, identifier: String) {
    let source = state.paths.merged.join(format!("{identifier}.pdf"));
    if !source.exists() {
        return;
    }

    let (backend, max_attempts, initial_delay, multiplier, max_delay) = {
        let config = state.config.read().unwrap();
        let raw = &config.config.raw;
        let backend = crate::upload::build_backend(&raw.upload, config.config.nas_password.clone(), config.config.http_token.clone());
        (
            backend,
            raw.retry.max_attempts,
            std::time::Duration::from_secs(raw.retry.initial_delay),
            raw.retry.backoff_multiplier,
            std::time::Duration::from_secs(raw.retry.max_delay),
        )
    };

    let file_hash = match file_sha1(&source) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(error = %e, identifier, "failed to hash file before upload");
            return;
        }
    };
    let key = idempotency_key(&identifier, &file_hash);

    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        if attempt > 1 {
            tokio::time::sleep(retry_delay(attempt, initial_delay, multiplier, max_delay)).await;
        }
        match backend.upload(&source, &identifier, &key).await {
            Ok(outcome) => {
                finish_upload(&state, &identifier, &source);
                state.recent.push("UPLOADED", Some(identifier.clone()), Some(outcome.message));
                state.audit.log("system", "UPLOAD", None, None, "SUCCESS", Some(&identifier));
                return;
            }
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(error = %last_error, identifier, attempt, "upload attempt failed");
            }
        }
    }

    fail_upload(&state, &identifier, &source, &last_error, max_attempts);
}

fn finish_upload(state: &Arc<KioskState>, identifier: &str, source: &Path) {
    if let Err(e) = std::fs::create_dir_all(&state.paths.uploaded) {
        tracing::error!(error = %e, "failed to create uploaded directory");
        return;
    }
    let target = state.paths.uploaded.join(format!("{identifier}.pdf"));
    if let Err(e) = std::fs::rename(source, &target) {
        tracing::error!(error = %e, "failed to move merged file into uploaded");
    }
}

fn fail_upload(state: &Arc<KioskState>, identifier: &str, source: &Path, last_error: &str, attempts: u32) {
    if let Err(e) = std::fs::create_dir_all(&state.paths.error) {
        tracing::error!(error = %e, "failed to create error directory");
        return;
    }
    let target = state.paths.error.join(format!("{identifier}.pdf"));
    if std::fs::rename(source, &target).is_err() {
        tracing::error!(identifier, "failed to move exhausted-retry file into error");
        return;
    }
    let sidecar = ErrorSidecar {
        original_path: source.display().to_string(),
        error_message: format!("upload failed after {attempts} attempts: {last_error}"),
        moved_at: chrono::Utc::now(),
        candidates: None,
    };
    if let Ok(json) = serde_json::to_vec_pretty(&sidecar) {
        let _ = std::fs::write(target.with_extension("error.json"), json);
    }
    state.recent.push("UPLOAD_FAILED", Some(identifier.to_string()), Some(last_error.to_string()));
    state.audit.log("system", "UPLOAD", None, None, "FAILURE", Some(last_error));
}

/// Retention sweep (spec §4.3): prune dated subtrees under *uploaded* and
/// *error* past their configured age.
pub fn run_retention_sweep(state: &Arc<KioskState>) {
    let (uploaded_days, error_days) = {
        let config = state.config.read().unwrap();
        (config.config.raw.retention.uploaded_days, config.config.raw.retention.error_days)
    };
    prune_older_than(&state.paths.uploaded, uploaded_days);
    prune_older_than(&state.paths.error, error_days);
}

fn prune_older_than(dir: &Path, days: u64) {
    let cutoff = std::time::Duration::from_secs(days * 86_400);
    let now = SystemTime::now();
    for path in crate::paths::walk_pdfs(dir) {
        let Ok(metadata) = std::fs::metadata(&path) else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let Ok(age) = now.duration_since(modified) else { continue };
        if age > cutoff {
            let _ = std::fs::remove_file(&path);
            let _ = std::fs::remove_file(path.with_extension("error.json"));
        }
    }
}

/// Drives the batch trigger (spec §4.3 "Batch trigger"): idle mode fires a
/// cycle once arrivals have been quiescent for `idle_minutes`; schedule
/// mode fires on the next `batch.schedule` cron occurrence. `PAUSE` is
/// checked at each tick boundary, never mid-cycle.
pub async fn run_batch_scheduler(state: Arc<KioskState>) {
    use crate::config::BatchTriggerMode;
    use std::str::FromStr;

    let mut last_fired_idle = false;
    loop {
        let (mode, idle_minutes, schedule) = {
            let config = state.config.read().unwrap();
            let batch = &config.config.raw.batch;
            (batch.trigger_mode, batch.idle_minutes, batch.schedule.clone())
        };

        tokio::time::sleep(std::time::Duration::from_secs(15)).await;

        if state.is_paused() {
            last_fired_idle = false;
            continue;
        }

        match mode {
            BatchTriggerMode::Idle => {
                let idle_for = state.last_arrival.lock().unwrap().elapsed();
                let threshold = std::time::Duration::from_secs(idle_minutes * 60);
                if idle_for >= threshold {
                    if !last_fired_idle {
                        run_merge_cycle(state.clone()).await;
                        run_retention_sweep(&state);
                        last_fired_idle = true;
                    }
                } else {
                    last_fired_idle = false;
                }
            }
            BatchTriggerMode::Schedule => {
                let Some(expr) = schedule else { continue };
                let Ok(parsed) = cron::Schedule::from_str(&expr) else {
                    tracing::error!(expr, "invalid batch.schedule cron expression");
                    continue;
                };
                let now = chrono::Utc::now();
                if let Some(next) = parsed.after(&(now - chrono::Duration::seconds(16))).next() {
                    if next <= now {
                        run_merge_cycle(state.clone()).await;
                        run_retention_sweep(&state);
                    }
                }
            }
        }
    }
}
