//! Authenticated HTTP client for talking to another instance's standard
//! API (spec §4.7). Failures are always categorized — never collapsed to
//! "unknown error".

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::RemoteFailure;
use crate::registry::Instance;

pub struct InstanceClient {
    client: reqwest::Client,
}

impl InstanceClient {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    async fn request(&self, instance: &Instance, method: reqwest::Method, path: &str, timeout: Duration, body: Option<serde_json::Value>) -> Result<reqwest::Response, RemoteFailure> {
        let url = format!("{}{}", instance.base_url.trim_end_matches('/'), path);
        let mut builder = self.client.request(method, &url).timeout(timeout);
        for (name, value) in instance.auth.headers() {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(categorize)?;
        if !response.status().is_success() {
            return Err(RemoteFailure::NonSuccess { status: response.status().as_u16() });
        }
        Ok(response)
    }

    /// `GET /api/status`, 5 s timeout for fleet-wide health polling.
    pub async fn status(&self, instance: &Instance) -> Result<serde_json::Value, RemoteFailure> {
        self.get_json(instance, "/api/status", Duration::from_secs(5)).await
    }

    /// `GET /api/recent?limit=N`, default per-request timeout.
    pub async fn recent(&self, instance: &Instance, limit: u32) -> Result<serde_json::Value, RemoteFailure> {
        self.get_json(instance, &format!("/api/recent?limit={limit}"), Duration::from_secs(10)).await
    }

    /// `POST /api/command`, default per-request timeout.
    pub async fn command(&self, instance: &Instance, command: serde_json::Value) -> Result<serde_json::Value, RemoteFailure> {
        let response = self.request(instance, reqwest::Method::POST, "/api/command", Duration::from_secs(10), Some(command)).await?;
        parse_json(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, instance: &Instance, path: &str, timeout: Duration) -> Result<T, RemoteFailure> {
        let response = self.request(instance, reqwest::Method::GET, path, timeout, None).await?;
        parse_json(response).await
    }
}

impl Default for InstanceClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteFailure> {
    let text = response.text().await.map_err(categorize)?;
    serde_json::from_str(&text).map_err(|e| RemoteFailure::SchemaMismatch(e.to_string()))
}

fn categorize(error: reqwest::Error) -> RemoteFailure {
    if error.is_timeout() {
        RemoteFailure::Timeout
    } else if error.is_connect() {
        RemoteFailure::ConnectionRefused
    } else {
        RemoteFailure::SchemaMismatch(error.to_string())
    }
}
