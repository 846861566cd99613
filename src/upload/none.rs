//! Immediate-success backend, used for testing (spec §4.4).

use std::path::Path;

use crate::error::UploadError;

use super::{UploadBackend, UploadOutcome};

pub struct NoneBackend;

#[async_trait::async_trait]
impl UploadBackend for NoneBackend {
    async fn upload(&self, _source: &Path, _identifier: &str, _idempotency_key: &str) -> Result<UploadOutcome, UploadError> {
        Ok(UploadOutcome { message: "none backend: no-op success".to_string() })
    }
}
