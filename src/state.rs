//! Shared application state, combined into the axum `State` (grounded on
//! the teacher's `AppContext`/`ServerState` split: one `Arc` per concern
//! rather than one big lock).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::audit::AuditLogger;
use crate::auth::BasicAuthProvider;
use crate::config::ConfigManager;
use crate::paths::DataPaths;
use crate::registry::RegistryManager;
use crate::remote_client::InstanceClient;

const RECENT_EVENTS_CAPACITY: usize = 500;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event: String,
    pub identifier: Option<String>,
    pub detail: Option<String>,
}

/// Bounded ring buffer backing `GET /api/recent` (spec §1.2 — implemented
/// for real, unlike the original's stubbed handler).
pub struct RecentEvents {
    events: Mutex<VecDeque<ProcessEvent>>,
}

impl RecentEvents {
    pub fn new() -> Self {
        Self { events: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAPACITY)) }
    }

    pub fn push(&self, event: impl Into<String>, identifier: Option<String>, detail: Option<String>) {
        let mut events = self.events.lock().unwrap();
        if events.len() == RECENT_EVENTS_CAPACITY {
            events.pop_front();
        }
        events.push_back(ProcessEvent { timestamp: chrono::Utc::now(), event: event.into(), identifier, detail });
    }

    pub fn recent(&self, limit: usize) -> Vec<ProcessEvent> {
        let events = self.events.lock().unwrap();
        events.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for RecentEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Kiosk-agent state: pipeline handles, config, paths, and the batch
/// scheduler's pause flag / last-run timestamp.
pub struct KioskState {
    pub config: RwLock<ConfigManager>,
    pub paths: DataPaths,
    pub auth: Arc<BasicAuthProvider>,
    pub audit: Arc<AuditLogger>,
    pub recent: RecentEvents,
    pub paused: AtomicBool,
    pub last_batch_at: Mutex<Option<chrono::DateTime<chrono::Utc>>>,
    /// Only one merge cycle may run at a time (spec §4.3); a second
    /// `RUN_BATCH` while one is in flight is a no-op.
    pub merge_in_flight: AtomicBool,
    pub started_at: Instant,
    /// Updated on every classification; the idle batch trigger fires once
    /// this has been quiescent for `batch.idle_minutes`.
    pub last_arrival: Mutex<Instant>,
}

impl KioskState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Claims the merge-cycle slot; returns `false` if one is already
    /// running (caller should treat that as a no-op, not an error).
    pub fn try_begin_merge(&self) -> bool {
        self.merge_in_flight.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub fn end_merge(&self) {
        self.merge_in_flight.store(false, Ordering::SeqCst);
        *self.last_batch_at.lock().unwrap() = Some(chrono::Utc::now());
    }
}

/// Admin-agent state: the instance registry plus a shared remote client.
pub struct AdminState {
    pub registry: RwLock<RegistryManager>,
    pub client: InstanceClient,
    pub local_registry_path: PathBuf,
    pub auth: Arc<BasicAuthProvider>,
}

impl crate::auth::HasBasicAuth for KioskState {
    fn basic_auth(&self) -> &BasicAuthProvider {
        &self.auth
    }
}

impl crate::auth::HasBasicAuth for AdminState {
    fn basic_auth(&self) -> &BasicAuthProvider {
        &self.auth
    }
}
