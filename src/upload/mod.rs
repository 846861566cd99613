//! Pluggable upload backends (spec §4.4). Retry policy lives here as a pure
//! function; it is applied by the pipeline around whichever backend is
//! configured, never inside a backend itself.

pub mod dual;
pub mod http;
pub mod nas;
pub mod none;

use std::path::Path;
use std::time::Duration;

use crate::config::{RawUploadConfig, UploadBackendKind};
use crate::error::UploadError;

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub message: String,
}

#[async_trait::async_trait]
pub trait UploadBackend: Send + Sync {
    async fn upload(&self, source: &Path, identifier: &str, idempotency_key: &str) -> Result<UploadOutcome, UploadError>;
}

/// Idempotency key = `<identifier>-<sha1(file)>` (spec §4.4).
pub fn idempotency_key(identifier: &str, file_hash: &str) -> String {
    format!("{identifier}-{file_hash}")
}

/// Delay before attempt `k` (1-indexed, k>=2): `min(initial * multiplier^(k-1), max_delay)`.
pub fn retry_delay(k: u32, initial: Duration, multiplier: u32, max_delay: Duration) -> Duration {
    if k < 2 {
        return Duration::ZERO;
    }
    let factor = multiplier.saturating_pow(k - 1);
    let scaled = initial.saturating_mul(factor);
    scaled.min(max_delay)
}

pub fn build_backend(
    cfg: &RawUploadConfig,
    nas_password: String,
    http_token: String,
) -> Box<dyn UploadBackend> {
    match cfg.kind {
        UploadBackendKind::Nas => Box::new(nas::NasBackend::new(cfg.nas.path.clone(), nas_password)),
        UploadBackendKind::Http => {
            Box::new(http::HttpBackend::new(cfg.http.endpoint.clone(), http_token, cfg.http.timeout, cfg.http.max_file_size_mb))
        }
        UploadBackendKind::Dual => Box::new(dual::DualBackend::new(
            nas::NasBackend::new(cfg.nas.path.clone(), nas_password),
            http::HttpBackend::new(cfg.http.endpoint.clone(), http_token, cfg.http.timeout, cfg.http.max_file_size_mb),
        )),
        UploadBackendKind::None => Box::new(none::NoneBackend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_caps_at_max() {
        let initial = Duration::from_secs(60);
        let max = Duration::from_secs(3600);
        assert_eq!(retry_delay(1, initial, 2, max), Duration::ZERO);
        assert_eq!(retry_delay(2, initial, 2, max), Duration::from_secs(120));
        assert_eq!(retry_delay(3, initial, 2, max), Duration::from_secs(240));
        assert_eq!(retry_delay(10, initial, 2, max), max);
    }

    #[test]
    fn idempotency_key_combines_id_and_hash() {
        assert_eq!(idempotency_key("123", "abc"), "123-abc");
    }
}
