//! File-arrival detector (spec §4.1): realtime (via `notify`) or polling,
//! both gated by write-stability before a path is handed to the pipeline.
//! Grounded on the teacher's debounce-thread structure in the original
//! `watch.rs` and the original Python's `file_watcher.py::FileStabilityChecker`.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::WatcherMode;

/// Tracks per-path size history to implement the stability gate: released
/// only once size is unchanged for `stability_checks` consecutive polls
/// *and* the file is openable for a 1-byte read.
pub struct FileStabilityChecker {
    stability_checks: u32,
    state: Mutex<HashMap<PathBuf, (u64, u32)>>,
}

impl FileStabilityChecker {
    pub fn new(stability_checks: u32) -> Self {
        Self { stability_checks, state: Mutex::new(HashMap::new()) }
    }

    pub fn is_stable(&self, path: &Path) -> bool {
        let Ok(metadata) = std::fs::metadata(path) else {
            self.clear(path);
            return false;
        };
        let current_size = metadata.len();
        let mut state = self.state.lock().unwrap();

        let entry = state.entry(path.to_path_buf()).or_insert((current_size, 0));
        if entry.0 != current_size {
            *entry = (current_size, 1);
            return false;
        }
        entry.1 += 1;
        if entry.1 < self.stability_checks {
            return false;
        }

        // 1-byte read probe — catches files still held open for write on
        // platforms where size alone doesn't prove the writer is done.
        let probe_ok = std::fs::File::open(path).and_then(|mut f| {
            use std::io::Read;
            let mut buf = [0u8; 1];
            f.read(&mut buf).map(|_| ())
        });

        if probe_ok.is_err() {
            return false;
        }

        state.remove(path);
        true
    }

    pub fn clear(&self, path: &Path) {
        self.state.lock().unwrap().remove(path);
    }
}

/// Runs the detector for `inbox`, sending every stabilized `.pdf` path to
/// `tx`. Spawns background OS threads; returns a guard the caller should
/// keep alive (dropping it stops realtime watching, not polling — mirrors
/// the teacher's `Option<RecommendedWatcher>` pattern).
pub fn start_detector(
    inbox: PathBuf,
    mode: WatcherMode,
    polling_interval: Duration,
    stability_wait: Duration,
    stability_checks: u32,
    tx: UnboundedSender<PathBuf>,
) -> Option<RecommendedWatcher> {
    let checker = std::sync::Arc::new(FileStabilityChecker::new(stability_checks));

    match mode {
        WatcherMode::Realtime => start_realtime(inbox, stability_wait, checker, tx),
        WatcherMode::Polling => {
            start_polling(inbox, polling_interval, checker, tx);
            None
        }
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("pdf")).unwrap_or(false)
}

fn start_realtime(
    inbox: PathBuf,
    stability_wait: Duration,
    checker: std::sync::Arc<FileStabilityChecker>,
    tx: UnboundedSender<PathBuf>,
) -> Option<RecommendedWatcher> {
    let (raw_tx, raw_rx) = mpsc::channel::<Event>();
    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "failed to start filesystem watcher");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&inbox, RecursiveMode::Recursive) {
        tracing::error!(error = %e, path = %inbox.display(), "failed to watch inbox");
        return None;
    }

    std::thread::spawn(move || pending_loop(raw_rx, stability_wait, checker, tx));

    Some(watcher)
}

/// Collapses a burst of filesystem events into a pending set, then checks
/// stability on a fixed cadence — same two-phase shape as the teacher's
/// debounce loop.
fn pending_loop(
    raw_rx: mpsc::Receiver<Event>,
    stability_wait: Duration,
    checker: std::sync::Arc<FileStabilityChecker>,
    tx: UnboundedSender<PathBuf>,
) {
    let mut pending: Vec<PathBuf> = Vec::new();
    loop {
        match raw_rx.recv_timeout(stability_wait) {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    for path in event.paths {
                        if is_pdf(&path) && !pending.contains(&path) {
                            pending.push(path);
                        }
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }

        pending.retain(|path| {
            if checker.is_stable(path) {
                tracing::info!(path = %path.display(), "stable PDF detected");
                let _ = tx.send(path.clone());
                false
            } else {
                path.exists()
            }
        });
    }
}

fn start_polling(
    inbox: PathBuf,
    polling_interval: Duration,
    checker: std::sync::Arc<FileStabilityChecker>,
    tx: UnboundedSender<PathBuf>,
) {
    std::thread::spawn(move || {
        let mut delivered: std::collections::HashSet<PathBuf> = std::collections::HashSet::new();
        loop {
            let walk_start = Instant::now();
            if let Ok(entries) = std::fs::read_dir(&inbox) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if !is_pdf(&path) || delivered.contains(&path) {
                        continue;
                    }
                    if checker.is_stable(&path) {
                        tracing::info!(path = %path.display(), "stable PDF detected (polling)");
                        let _ = tx.send(path.clone());
                        delivered.insert(path);
                    }
                }
            }
            delivered.retain(|p| p.exists());

            let elapsed = walk_start.elapsed();
            if elapsed < polling_interval {
                std::thread::sleep(polling_interval - elapsed);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stability_gate_requires_unchanged_size_for_k_checks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"hello").unwrap();
        let checker = FileStabilityChecker::new(3);

        assert!(!checker.is_stable(&path));
        assert!(!checker.is_stable(&path));
        assert!(checker.is_stable(&path));
    }

    #[test]
    fn size_change_resets_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"hello").unwrap();
        let checker = FileStabilityChecker::new(3);

        assert!(!checker.is_stable(&path));
        assert!(!checker.is_stable(&path));
        std::fs::write(&path, b"hello world, longer now").unwrap();
        assert!(!checker.is_stable(&path));
        assert!(!checker.is_stable(&path));
        assert!(checker.is_stable(&path));
    }
}
