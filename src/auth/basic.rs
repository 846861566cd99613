//! `basic` auth provider: single shared admin password, constant-time
//! comparison, rate-limited by IP (grounded on `auth/basic_auth.py`).

use axum::http::HeaderMap;
use base64::Engine;
use std::sync::RwLock;

use super::{AuthResult, RateLimiter};
use crate::error::AuthError;

pub struct BasicAuthProvider {
    password: RwLock<String>,
    pub rate_limiter: RateLimiter,
}

impl BasicAuthProvider {
    pub fn new(password: String) -> Self {
        Self { password: RwLock::new(password), rate_limiter: RateLimiter::new(5, 15) }
    }

    pub fn set_password(&self, new_password: String) {
        *self.password.write().unwrap() = new_password;
    }

    /// Verify an `Authorization: Basic <...>` header against the stored
    /// password, enforcing the per-IP lockout first.
    pub fn verify(&self, headers: &HeaderMap, ip: &str) -> Result<AuthResult, AuthError> {
        let (locked, remaining) = self.rate_limiter.is_locked(ip);
        if locked {
            return Err(AuthError::LockedOut { remaining_secs: remaining });
        }

        let Some((username, password)) = extract_basic_credentials(headers) else {
            return Err(AuthError::MalformedHeader);
        };

        let expected = self.password.read().unwrap().clone();
        if constant_time_eq(password.as_bytes(), expected.as_bytes()) {
            self.rate_limiter.record_success(ip);
            Ok(AuthResult {
                authenticated: true,
                user_id: username.clone(),
                username,
                roles: vec!["admin".to_string()],
                ip: ip.to_string(),
                method: "basic".to_string(),
                metadata: serde_json::Value::Null,
            })
        } else {
            self.rate_limiter.record_failure(ip);
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Change the admin password after verifying the current one.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> bool {
        let current = self.password.read().unwrap().clone();
        if constant_time_eq(old_password.as_bytes(), current.as_bytes()) {
            self.set_password(new_password.to_string());
            true
        } else {
            false
        }
    }
}

fn extract_basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_for(user: &str, pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_correct_password() {
        let provider = BasicAuthProvider::new("s3cret".to_string());
        let result = provider.verify(&headers_for("admin", "s3cret"), "127.0.0.1").unwrap();
        assert!(result.authenticated);
        assert!(result.has_role("admin"));
    }

    #[test]
    fn rejects_wrong_password_and_eventually_locks() {
        let provider = BasicAuthProvider::new("s3cret".to_string());
        for _ in 0..5 {
            assert!(provider.verify(&headers_for("admin", "wrong"), "10.0.0.1").is_err());
        }
        let result = provider.verify(&headers_for("admin", "s3cret"), "10.0.0.1");
        assert!(matches!(result, Err(AuthError::LockedOut { .. })));
    }
}
