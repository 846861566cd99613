//! Append-only audit log. Mirrors `audit/logger.py`: payloads are hashed,
//! never stored in clear, and the log rotates at 50 MB (spec §6).

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const ROTATE_AT_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub user: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub struct AuditLogger {
    path: Mutex<PathBuf>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: Mutex::new(path.into()) }
    }

    pub fn log(
        &self,
        user: &str,
        action: &str,
        target_instance_id: Option<&str>,
        payload: Option<&serde_json::Value>,
        result: &str,
        detail: Option<&str>,
    ) {
        let payload_hash = payload.map(|p| {
            let canonical = serde_json::to_string(p).unwrap_or_default();
            let mut hasher = Sha1::new();
            hasher.update(canonical.as_bytes());
            let digest = hasher.finalize();
            hex_prefix(&digest, 16)
        });

        let entry = AuditEntry {
            timestamp: chrono::Utc::now(),
            user: user.to_string(),
            action: action.to_string(),
            target_instance_id: target_instance_id.map(str::to_string),
            payload_hash,
            result: result.to_string(),
            detail: detail.map(str::to_string),
        };

        if let Err(e) = self.append(&entry) {
            tracing::error!(error = %e, "failed to write audit log entry");
        }
    }

    fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let path = self.path.lock().unwrap();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rotate_if_needed(&path)?;
        let line = serde_json::to_string(entry).unwrap_or_default();
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&*path)?;
        writeln!(file, "{line}")
    }

    /// Read the most recent `limit` entries, newest first.
    pub fn read_recent(&self, limit: usize) -> Vec<AuditEntry> {
        let path = self.path.lock().unwrap().clone();
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        let mut entries: Vec<AuditEntry> =
            text.lines().filter_map(|line| serde_json::from_str(line).ok()).collect();
        entries.reverse();
        entries.truncate(limit);
        entries
    }
}

fn rotate_if_needed(path: &Path) -> std::io::Result<()> {
    let Ok(metadata) = std::fs::metadata(path) else {
        return Ok(());
    };
    if metadata.len() < ROTATE_AT_BYTES {
        return Ok(());
    }
    let rotated = path.with_extension(format!("{}.1", chrono::Utc::now().timestamp()));
    std::fs::rename(path, rotated)
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n / 2 + 1).map(|b| format!("{b:02x}")).collect::<String>().chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_hash_payload_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("admin_actions.log");
        let logger = AuditLogger::new(&log_path);
        let payload = serde_json::json!({ "password": "hunter2" });
        logger.log("alice", "PASSWORD_CHANGE", None, Some(&payload), "SUCCESS", None);

        let text = std::fs::read_to_string(&log_path).unwrap();
        assert!(!text.contains("hunter2"));
        let entries = logger.read_recent(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "PASSWORD_CHANGE");
        assert!(entries[0].payload_hash.is_some());
    }

    #[test]
    fn read_recent_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("admin_actions.log");
        let logger = AuditLogger::new(&log_path);
        logger.log("alice", "FIRST", None, None, "SUCCESS", None);
        logger.log("alice", "SECOND", None, None, "SUCCESS", None);
        let entries = logger.read_recent(10);
        assert_eq!(entries[0].action, "SECOND");
        assert_eq!(entries[1].action, "FIRST");
    }
}
