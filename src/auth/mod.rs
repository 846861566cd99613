//! Pluggable authentication (spec §4.5). `basic` is the only provider
//! implemented today; `jwt`/`token`/`cert`/`sso` are reserved variants that
//! must still round-trip through the registry (see [`crate::registry`]).

pub mod basic;
pub mod middleware;
pub mod rate_limit;

use serde::{Deserialize, Serialize};

pub use basic::BasicAuthProvider;
pub use middleware::{require_basic_auth, HasBasicAuth};
pub use rate_limit::RateLimiter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    pub authenticated: bool,
    pub user_id: String,
    pub username: String,
    pub roles: Vec<String>,
    pub ip: String,
    pub method: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuthResult {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
