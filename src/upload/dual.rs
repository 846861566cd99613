//! Dual backend: runs NAS and HTTP concurrently; overall success if either
//! succeeds, only a true double-failure propagates (spec §4.4).

use std::path::Path;

use crate::error::UploadError;

use super::{http::HttpBackend, nas::NasBackend, UploadBackend, UploadOutcome};

pub struct DualBackend {
    nas: NasBackend,
    http: HttpBackend,
}

impl DualBackend {
    pub fn new(nas: NasBackend, http: HttpBackend) -> Self {
        Self { nas, http }
    }
}

#[async_trait::async_trait]
impl UploadBackend for DualBackend {
    async fn upload(&self, source: &Path, identifier: &str, idempotency_key: &str) -> Result<UploadOutcome, UploadError> {
        let (nas_result, http_result) =
            tokio::join!(self.nas.upload(source, identifier, idempotency_key), self.http.upload(source, identifier, idempotency_key));

        match (nas_result, http_result) {
            (Ok(nas_ok), Ok(http_ok)) => Ok(UploadOutcome { message: format!("nas: {}; http: {}", nas_ok.message, http_ok.message) }),
            (Ok(ok), Err(e)) => {
                tracing::warn!(error = %e, "http leg of dual upload failed, nas succeeded");
                Ok(ok)
            }
            (Err(e), Ok(ok)) => {
                tracing::warn!(error = %e, "nas leg of dual upload failed, http succeeded");
                Ok(ok)
            }
            (Err(nas_err), Err(http_err)) => {
                Err(UploadError::Transient(format!("both legs failed: nas={nas_err}, http={http_err}")))
            }
        }
    }
}
