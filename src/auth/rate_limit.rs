//! Per-IP login rate limiting (spec §4.5), grounded on the original's
//! `auth/rate_limit.py`: 5 failures -> 15 minute lockout, dual-threshold
//! lazy sweep.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct FailureRecord {
    attempts: u32,
    locked_until: Option<Instant>,
    last_attempt: Instant,
}

pub struct RateLimiterStatus {
    pub attempts: u32,
    pub locked: bool,
    pub remaining_secs: u64,
}

/// Process-local, lock-protected via `DashMap`'s internal sharding — matches
/// §5's "rate-limit state is process-local, mutated under a lock" rule.
pub struct RateLimiter {
    max_attempts: u32,
    lockout: Duration,
    failures: DashMap<String, FailureRecord>,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, lockout_minutes: u64) -> Self {
        Self { max_attempts, lockout: Duration::from_secs(lockout_minutes * 60), failures: DashMap::new() }
    }

    /// Returns `(is_locked, seconds_remaining)`. Clears an expired lock.
    pub fn is_locked(&self, ip: &str) -> (bool, u64) {
        let Some(mut record) = self.failures.get_mut(ip) else {
            return (false, 0);
        };
        if let Some(locked_until) = record.locked_until {
            let now = Instant::now();
            if locked_until > now {
                return (true, (locked_until - now).as_secs());
            }
            record.locked_until = None;
            record.attempts = 0;
        }
        (false, 0)
    }

    /// Returns `(attempts, is_now_locked)`.
    pub fn record_failure(&self, ip: &str) -> (u32, bool) {
        let now = Instant::now();
        let mut entry = self.failures.entry(ip.to_string()).or_insert_with(|| FailureRecord {
            attempts: 0,
            locked_until: None,
            last_attempt: now,
        });
        entry.attempts += 1;
        entry.last_attempt = now;
        if entry.attempts >= self.max_attempts {
            entry.locked_until = Some(now + self.lockout);
            tracing::warn!(ip, attempts = entry.attempts, "rate limit lockout engaged");
            (entry.attempts, true)
        } else {
            (entry.attempts, false)
        }
    }

    pub fn record_success(&self, ip: &str) {
        self.failures.remove(ip);
    }

    pub fn unlock(&self, ip: &str) {
        self.failures.remove(ip);
    }

    pub fn status(&self, ip: &str) -> RateLimiterStatus {
        let (locked, remaining_secs) = self.is_locked(ip);
        let attempts = self.failures.get(ip).map(|r| r.attempts).unwrap_or(0);
        RateLimiterStatus { attempts, locked, remaining_secs }
    }

    /// Drop entries whose lockout expired more than an hour ago, or whose
    /// last attempt is more than a day old — the original's dual rule
    /// (`cleanup_expired`), not just a single 24h cutoff.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let one_hour = Duration::from_secs(3600);
        let one_day = Duration::from_secs(86_400);
        self.failures.retain(|_, record| {
            let lockout_stale = record.locked_until.map(|t| now.saturating_duration_since(t) > one_hour).unwrap_or(false);
            let idle_stale = now.saturating_duration_since(record.last_attempt) > one_day;
            !(lockout_stale || idle_stale)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_after_max_attempts() {
        let limiter = RateLimiter::new(5, 15);
        for _ in 0..4 {
            let (_, locked) = limiter.record_failure("1.2.3.4");
            assert!(!locked);
        }
        let (_, locked) = limiter.record_failure("1.2.3.4");
        assert!(locked);
        let (is_locked, remaining) = limiter.is_locked("1.2.3.4");
        assert!(is_locked);
        assert!(remaining > 0);
    }

    #[test]
    fn success_clears_failures() {
        let limiter = RateLimiter::new(5, 15);
        limiter.record_failure("1.2.3.4");
        limiter.record_success("1.2.3.4");
        assert_eq!(limiter.status("1.2.3.4").attempts, 0);
    }
}
