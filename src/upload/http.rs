//! HTTP backend: multipart POST with idempotency and hash headers
//! (spec §4.4). 200 -> success, 409 -> treat as success, anything else ->
//! failure.

use std::path::Path;
use std::time::Duration;

use crate::error::UploadError;
use crate::pdf_merge::file_sha1;

use super::{UploadBackend, UploadOutcome};

pub struct HttpBackend {
    endpoint: String,
    token: String,
    timeout: Duration,
    max_file_size_bytes: u64,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(endpoint: String, token: String, timeout_secs: u64, max_file_size_mb: u64) -> Self {
        Self {
            endpoint,
            token,
            timeout: Duration::from_secs(timeout_secs),
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl UploadBackend for HttpBackend {
    async fn upload(&self, source: &Path, identifier: &str, idempotency_key: &str) -> Result<UploadOutcome, UploadError> {
        let metadata = std::fs::metadata(source)?;
        if metadata.len() > self.max_file_size_bytes {
            return Err(UploadError::Rejected(format!(
                "file size {} exceeds configured max {}",
                metadata.len(),
                self.max_file_size_bytes
            )));
        }

        let bytes = std::fs::read(source)?;
        let file_hash = file_sha1(source).map_err(|e| UploadError::Transient(e.to_string()))?;
        let filename = format!("{identifier}.pdf");

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename).mime_str("application/pdf").map_err(|e| UploadError::Transient(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-Idempotency-Key", idempotency_key)
            .header("X-Transport-No", "1")
            .header("X-File-Hash", &file_hash)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;

        match response.status().as_u16() {
            200 => Ok(UploadOutcome { message: "uploaded".to_string() }),
            409 => Ok(UploadOutcome { message: "server already had file".to_string() }),
            status => Err(UploadError::Rejected(format!("http status {status}"))),
        }
    }
}
