//! Instance registry (spec §4.7 / §6): a remote source layered under a
//! local override file, keyed by instance `id`. Grounded directly on the
//! original's `registry/manager.py`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// `type` dispatches which fields apply; unknown types round-trip via
/// `metadata` rather than being rejected (spec §4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceAuth {
    #[serde(rename = "type", default = "default_auth_type")]
    pub kind: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub cert_path: String,
    #[serde(default)]
    pub key_path: String,
    #[serde(default)]
    pub sso_provider: String,
    #[serde(default)]
    pub redirect_url: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Any field not named above, for auth types this vocabulary doesn't
    /// yet know about — keeps load→save lossless rather than silently
    /// dropping them.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_auth_type() -> String {
    "basic".to_string()
}

impl InstanceAuth {
    /// Builds the auth header(s) for an outgoing request to this instance.
    pub fn headers(&self) -> Vec<(String, String)> {
        match self.kind.as_str() {
            "basic" => {
                let credentials = format!("{}:{}", self.username, self.password);
                let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, credentials);
                vec![("Authorization".to_string(), format!("Basic {encoded}"))]
            }
            "jwt" | "token" => vec![("Authorization".to_string(), format!("Bearer {}", self.token))],
            // cert/sso reserved: no header-based auth today.
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub label: String,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    pub role: String,
    pub auth: InstanceAuth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    instances: Vec<Instance>,
}

pub enum SaveTarget {
    Local,
    Remote,
}

/// Loads, merges, and persists instance records. Remote is loaded first;
/// local entries with the same `id` override it.
pub struct RegistryManager {
    remote_url: Option<String>,
    local_path: PathBuf,
    version: u32,
    instances: BTreeMap<String, Instance>,
    http: reqwest::Client,
}

impl RegistryManager {
    pub fn new(remote_url: Option<String>, local_path: PathBuf) -> Self {
        Self {
            remote_url,
            local_path,
            version: 1,
            instances: BTreeMap::new(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn load(&mut self) -> Result<(), RegistryError> {
        let mut instances = BTreeMap::new();

        if let Some(url) = self.remote_url.clone() {
            match self.load_source(&url).await {
                Ok(remote) => instances.extend(remote),
                Err(e) => tracing::warn!(error = %e, url, "failed to load remote registry"),
            }
        }

        if self.local_path.exists() {
            let text = std::fs::read_to_string(&self.local_path)?;
            let file: RegistryFile = serde_json::from_str(&text)?;
            self.version = file.version;
            for instance in file.instances {
                instances.insert(instance.id.clone(), instance);
            }
        }

        self.instances = instances;
        Ok(())
    }

    async fn load_source(&self, url: &str) -> Result<BTreeMap<String, Instance>, RegistryError> {
        let text = if let Some(path) = url.strip_prefix("file://") {
            std::fs::read_to_string(path)?
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.http
                .get(url)
                .timeout(std::time::Duration::from_secs(5))
                .send()
                .await
                .map_err(RegistryError::Http)?
                .error_for_status()
                .map_err(RegistryError::Http)?
                .text()
                .await
                .map_err(RegistryError::Http)?
        } else {
            return Err(RegistryError::UnsupportedScheme(url.to_string()));
        };
        let file: RegistryFile = serde_json::from_str(&text)?;
        Ok(file.instances.into_iter().map(|i| (i.id.clone(), i)).collect())
    }

    pub async fn save(&self, target: SaveTarget) -> Result<(), RegistryError> {
        let data = RegistryFile { version: self.version, instances: self.instances.values().cloned().collect() };
        let text = serde_json::to_string_pretty(&data)?;

        match target {
            SaveTarget::Local => {
                if let Some(parent) = self.local_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&self.local_path, text)?;
            }
            SaveTarget::Remote => {
                let url = self.remote_url.clone().ok_or_else(|| RegistryError::UnsupportedScheme("no remote url configured".to_string()))?;
                if let Some(path) = url.strip_prefix("file://") {
                    if let Some(parent) = Path::new(path).parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, text)?;
                } else if url.starts_with("http://") || url.starts_with("https://") {
                    self.http
                        .put(&url)
                        .timeout(std::time::Duration::from_secs(5))
                        .body(text)
                        .send()
                        .await
                        .map_err(RegistryError::Http)?
                        .error_for_status()
                        .map_err(RegistryError::Http)?;
                } else {
                    return Err(RegistryError::UnsupportedScheme(url));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.instances.get(id)
    }

    pub fn list(&self, role: Option<&str>) -> Vec<&Instance> {
        self.instances.values().filter(|i| role.map(|r| i.role == r).unwrap_or(true)).collect()
    }

    pub fn upsert(&mut self, instance: Instance) {
        self.instances.insert(instance.id.clone(), instance);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.instances.remove(id).is_some()
    }

    pub fn replace_all(&mut self, instances: Vec<Instance>) {
        self.instances = instances.into_iter().map(|i| (i.id.clone(), i)).collect();
    }

    /// JSON string for the admin UI's download action.
    pub fn export_json(&self) -> Result<String, RegistryError> {
        let data = RegistryFile { version: self.version, instances: self.instances.values().cloned().collect() };
        Ok(serde_json::to_string_pretty(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instance(id: &str) -> Instance {
        Instance {
            id: id.to_string(),
            label: "Site A".to_string(),
            base_url: "http://localhost:9000".to_string(),
            role: "kiosk".to_string(),
            auth: InstanceAuth { kind: "basic".to_string(), username: "admin".to_string(), password: "x".to_string(), ..Default::default() },
        }
    }

    #[tokio::test]
    async fn local_entries_override_remote_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let remote_path = dir.path().join("remote.json");
        let local_path = dir.path().join("local.json");

        std::fs::write(
            &remote_path,
            serde_json::to_string(&RegistryFile { version: 1, instances: vec![sample_instance("a")] }).unwrap(),
        )
        .unwrap();

        let mut overridden = sample_instance("a");
        overridden.label = "Overridden".to_string();
        std::fs::write(
            &local_path,
            serde_json::to_string(&RegistryFile { version: 1, instances: vec![overridden] }).unwrap(),
        )
        .unwrap();

        let mut mgr = RegistryManager::new(Some(format!("file://{}", remote_path.display())), local_path);
        mgr.load().await.unwrap();
        assert_eq!(mgr.get("a").unwrap().label, "Overridden");
    }

    #[test]
    fn unknown_auth_type_round_trips_via_metadata() {
        let mut instance = sample_instance("b");
        instance.auth.kind = "sso".to_string();
        instance.auth.metadata = serde_json::json!({ "idp": "okta" });
        let json = serde_json::to_string(&instance).unwrap();
        let parsed: Instance = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.auth.kind, "sso");
        assert_eq!(parsed.auth.metadata["idp"], "okta");
    }
}
