//! NAS backend: copies to `<nas-root>/<id>.pdf`, short-circuiting when the
//! target already holds byte-identical content (spec §4.4).

use std::path::PathBuf;

use crate::error::UploadError;
use crate::pdf_merge::file_sha1;

use super::{UploadBackend, UploadOutcome};

pub struct NasBackend {
    root: PathBuf,
    #[allow(dead_code)]
    password: String,
}

impl NasBackend {
    pub fn new(root: PathBuf, password: String) -> Self {
        Self { root, password }
    }

    fn target_path(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{identifier}.pdf"))
    }
}

#[async_trait::async_trait]
impl UploadBackend for NasBackend {
    async fn upload(&self, source: &std::path::Path, identifier: &str, _idempotency_key: &str) -> Result<UploadOutcome, UploadError> {
        std::fs::create_dir_all(&self.root)?;
        let target = self.target_path(identifier);

        let source_hash = file_sha1(source).map_err(|e| UploadError::Transient(e.to_string()))?;
        if target.exists() {
            if let Ok(target_hash) = file_sha1(&target) {
                if target_hash == source_hash {
                    return Ok(UploadOutcome { message: "already uploaded".to_string() });
                }
            }
        }

        let expected_size = std::fs::metadata(source)?.len();
        std::fs::copy(source, &target)?;
        let actual_size = std::fs::metadata(&target)?.len();
        if actual_size != expected_size {
            return Err(UploadError::SizeMismatch { expected: expected_size, actual: actual_size });
        }

        Ok(UploadOutcome { message: format!("copied to {}", target.display()) })
    }
}
