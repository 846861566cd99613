//! YAML configuration, mirroring the `steel` Python original's `config.py`
//! section layout but loaded into typed Rust structs. Secrets are encrypted
//! at rest via [`crate::crypto::SecretBox`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::crypto::SecretBox;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Kiosk,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherMode {
    Realtime,
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguousPolicy {
    Strict,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadBackendKind {
    Nas,
    Http,
    Dual,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchTriggerMode {
    Idle,
    Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Md5,
}

/// On-disk representation. Secret fields hold ciphertext (base64 of
/// `nonce || ct`) produced by [`SecretBox::encrypt`]; plaintext is never
/// written back to disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    pub system: RawSystemConfig,
    pub paths: PathsConfig,
    pub watcher: WatcherConfig,
    pub qr: QrConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    pub upload: RawUploadConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSystemConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    pub web_port: u16,
    /// Ciphertext; empty string means "not yet set".
    #[serde(default)]
    pub admin_password: String,
    pub mode: Mode,
    #[serde(default)]
    pub instance_registry_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    pub scanner_output: PathBuf,
    pub data_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
    #[serde(default = "default_watcher_mode")]
    pub mode: WatcherMode,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default = "default_stability_wait")]
    pub stability_wait: u64,
    #[serde(default = "default_stability_checks")]
    pub stability_checks: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: default_watcher_mode(),
            polling_interval: default_polling_interval(),
            stability_wait: default_stability_wait(),
            stability_checks: default_stability_checks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QrConfig {
    #[serde(default = "default_qr_pattern")]
    pub pattern: String,
    #[serde(default = "default_ambiguous_policy")]
    pub multiple_qr_action: AmbiguousPolicy,
    #[serde(default = "default_true")]
    pub adaptive_dpi: bool,
    #[serde(default = "default_fixed_dpi")]
    pub fixed_dpi: u16,
    #[serde(default = "default_dpi_candidates")]
    pub dpi_candidates: Vec<u16>,
    #[serde(default = "default_engine_order")]
    pub engine_order: Vec<String>,
    #[serde(default)]
    pub save_failed_images: bool,
    #[serde(default = "default_failed_images_path")]
    pub failed_images_path: PathBuf,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            pattern: default_qr_pattern(),
            multiple_qr_action: default_ambiguous_policy(),
            adaptive_dpi: true,
            fixed_dpi: default_fixed_dpi(),
            dpi_candidates: default_dpi_candidates(),
            engine_order: default_engine_order(),
            save_failed_images: false,
            failed_images_path: default_failed_images_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PdfConfig {
    #[serde(default)]
    pub normalize: bool,
    #[serde(default = "default_true")]
    pub remove_duplicates: bool,
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: HashAlgorithm,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self { normalize: false, remove_duplicates: true, hash_algorithm: default_hash_algorithm() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    #[serde(default = "default_trigger_mode")]
    pub trigger_mode: BatchTriggerMode,
    #[serde(default = "default_idle_minutes")]
    pub idle_minutes: u64,
    #[serde(default)]
    pub schedule: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { trigger_mode: default_trigger_mode(), idle_minutes: default_idle_minutes(), schedule: None }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawUploadConfig {
    #[serde(rename = "type")]
    pub kind: UploadBackendKind,
    #[serde(default)]
    pub nas: RawNasConfig,
    #[serde(default)]
    pub http: RawHttpUploadConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawNasConfig {
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub username: String,
    /// Ciphertext.
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawHttpUploadConfig {
    #[serde(default)]
    pub endpoint: String,
    /// Ciphertext.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for RawHttpUploadConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: String::new(),
            timeout: default_http_timeout(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    #[serde(default = "default_max_delay")]
    pub max_delay: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_uploaded_days")]
    pub uploaded_days: u64,
    #[serde(default = "default_error_days")]
    pub error_days: u64,
    #[serde(default = "default_log_days")]
    pub log_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            uploaded_days: default_uploaded_days(),
            error_days: default_error_days(),
            log_days: default_log_days(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_worker_count() -> usize {
    3
}
fn default_watcher_mode() -> WatcherMode {
    WatcherMode::Polling
}
fn default_polling_interval() -> u64 {
    30
}
fn default_stability_wait() -> u64 {
    3
}
fn default_stability_checks() -> u32 {
    3
}
fn default_qr_pattern() -> String {
    "^[0-9]{14}$".to_string()
}
fn default_ambiguous_policy() -> AmbiguousPolicy {
    AmbiguousPolicy::Strict
}
fn default_true() -> bool {
    true
}
fn default_fixed_dpi() -> u16 {
    200
}
fn default_dpi_candidates() -> Vec<u16> {
    vec![200, 150, 250, 180, 220, 120, 300]
}
fn default_engine_order() -> Vec<String> {
    vec!["ZBAR".to_string(), "ZXING".to_string(), "PYZBAR_PREPROC".to_string()]
}
fn default_failed_images_path() -> PathBuf {
    PathBuf::from("qr_debug")
}
fn default_hash_algorithm() -> HashAlgorithm {
    HashAlgorithm::Sha1
}
fn default_trigger_mode() -> BatchTriggerMode {
    BatchTriggerMode::Idle
}
fn default_idle_minutes() -> u64 {
    5
}
fn default_http_timeout() -> u64 {
    60
}
fn default_max_file_size_mb() -> u64 {
    100
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_delay() -> u64 {
    60
}
fn default_backoff_multiplier() -> u32 {
    2
}
fn default_max_delay() -> u64 {
    3600
}
fn default_uploaded_days() -> u64 {
    90
}
fn default_error_days() -> u64 {
    30
}
fn default_log_days() -> u64 {
    30
}

/// In-memory configuration with secrets decrypted. Never serialized directly
/// back to disk — [`ConfigManager::save`] re-encrypts through [`RawConfig`].
#[derive(Debug, Clone)]
pub struct Config {
    pub raw: RawConfig,
    pub admin_password: String,
    pub nas_password: String,
    pub http_token: String,
}

impl Config {
    pub fn mode(&self) -> Mode {
        self.raw.system.mode
    }

    pub fn web_port(&self) -> u16 {
        self.raw.system.web_port
    }
}

/// Loads, decrypts, and persists config files, mirroring the original's
/// `ConfigManager` (load from YAML, save back encrypted).
pub struct ConfigManager {
    config_path: PathBuf,
    secret_box: SecretBox,
    pub config: Config,
}

impl ConfigManager {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.display().to_string()));
        }
        let key_path = config_path.with_file_name(".encryption_key");
        let secret_box = SecretBox::load_or_create(&key_path)?;
        let raw = Self::read_raw(config_path)?;
        let config = Self::decrypt(&raw, &secret_box)?;
        Ok(Self { config_path: config_path.to_path_buf(), secret_box, config })
    }

    fn read_raw(config_path: &Path) -> Result<RawConfig, ConfigError> {
        let text = std::fs::read_to_string(config_path)?;
        let raw: RawConfig = serde_yaml::from_str(&text)?;
        Ok(raw)
    }

    fn decrypt(raw: &RawConfig, secret_box: &SecretBox) -> Result<Config, ConfigError> {
        let decrypt_or_empty = |ciphertext: &str| -> Result<String, ConfigError> {
            if ciphertext.is_empty() {
                Ok(String::new())
            } else {
                secret_box.decrypt(ciphertext)
            }
        };
        Ok(Config {
            raw: raw.clone(),
            admin_password: decrypt_or_empty(&raw.system.admin_password)?,
            nas_password: decrypt_or_empty(&raw.upload.nas.password)?,
            http_token: decrypt_or_empty(&raw.upload.http.token)?,
        })
    }

    /// Re-read the config file from disk, replacing the in-memory config.
    /// Backs the `UPDATE_CONFIG` remote command (spec §4.6).
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        let raw = Self::read_raw(&self.config_path)?;
        self.config = Self::decrypt(&raw, &self.secret_box)?;
        Ok(())
    }

    /// Persist the current in-memory config, re-encrypting secrets.
    pub fn save(&mut self) -> Result<(), ConfigError> {
        self.config.raw.system.admin_password = self.secret_box.encrypt(&self.config.admin_password)?;
        self.config.raw.upload.nas.password = self.secret_box.encrypt(&self.config.nas_password)?;
        self.config.raw.upload.http.token = self.secret_box.encrypt(&self.config.http_token)?;
        let text = serde_yaml::to_string(&self.config.raw)?;
        std::fs::write(&self.config_path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
system:
  web_port: 8000
  mode: kiosk
paths:
  scanner_output: /data/inbox
  data_root: /data
watcher:
  mode: polling
qr:
  pattern: "^[0-9]{14}$"
upload:
  type: none
"#
    }

    #[test]
    fn load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, sample_yaml()).unwrap();
        let mgr = ConfigManager::load(&config_path).unwrap();
        assert_eq!(mgr.config.raw.system.worker_count, 3);
        assert_eq!(mgr.config.raw.retry.max_attempts, 5);
        assert_eq!(mgr.config.mode(), Mode::Kiosk);
    }

    #[test]
    fn save_then_reload_round_trips_secret() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, sample_yaml()).unwrap();
        let mut mgr = ConfigManager::load(&config_path).unwrap();
        mgr.config.admin_password = "hunter2".to_string();
        mgr.save().unwrap();

        let mut reloaded = ConfigManager::load(&config_path).unwrap();
        assert_eq!(reloaded.config.admin_password, "hunter2");
        reloaded.reload().unwrap();
        assert_eq!(reloaded.config.admin_password, "hunter2");
    }
}
