//! Fixed-window rate limiting keyed by (purpose prefix, identifier).
//!
//! Counters live in a process-wide mutex-guarded map: O(1) memory per key,
//! no background timer, expired entries swept opportunistically once the map
//! grows past a threshold. Fixed windows admit a boundary burst of up to 2x
//! the limit; this limiter is abuse deterrence, not billing-grade metering.
//! Because the map is process-local, horizontal scaling fragments the limit
//! per instance.

use axum::http::{HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Sweep expired entries once the map holds more keys than this.
const SWEEP_THRESHOLD: usize = 1024;

/// A named budget: `limit` requests per `window`, keyed under `prefix`.
#[derive(Clone, Debug)]
pub struct RateLimitQuota {
    prefix: String,
    limit: u64,
    window: Duration,
}

impl RateLimitQuota {
    #[must_use]
    pub fn new(prefix: &str, limit: u64, window: Duration) -> Self {
        Self {
            prefix: prefix.to_string(),
            limit,
            window,
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Outcome of a rate-limit check, with everything the response headers need.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitVerdict {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_unix: u64,
    pub retry_after_seconds: u64,
}

pub trait RateLimiter: Send + Sync {
    /// Count this request against the quota and decide whether it may pass.
    fn enforce(&self, quota: &RateLimitQuota, identifier: &str) -> RateLimitVerdict;
}

struct WindowEntry {
    count: u64,
    reset_at: SystemTime,
}

/// In-memory fixed-window limiter.
pub struct FixedWindowLimiter {
    entries: Mutex<HashMap<String, WindowEntry>>,
    sweep_threshold: usize,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            sweep_threshold: SWEEP_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold;
        self
    }

    /// Increment the window counter for a key, resetting it if the window
    /// elapsed. Returns the count after increment and the window reset time.
    fn increment(&self, key: String, window: Duration) -> (u64, SystemTime) {
        let now = SystemTime::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if entries.len() > self.sweep_threshold {
            entries.retain(|_, entry| entry.reset_at > now);
        }

        let entry = entries.entry(key).or_insert(WindowEntry {
            count: 0,
            reset_at: now + window,
        });
        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window;
        }
        entry.count += 1;
        (entry.count, entry.reset_at)
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn enforce(&self, quota: &RateLimitQuota, identifier: &str) -> RateLimitVerdict {
        let key = format!("{}:{identifier}", quota.prefix());
        let (count, reset_at) = self.increment(key, quota.window());

        let allowed = count <= quota.limit();
        let remaining = quota.limit().saturating_sub(count);
        let until_reset = reset_at
            .duration_since(SystemTime::now())
            .unwrap_or_default();

        RateLimitVerdict {
            allowed,
            limit: quota.limit(),
            remaining,
            reset_unix: unix_seconds(reset_at),
            retry_after_seconds: until_reset.as_secs().max(1),
        }
    }
}

/// Limiter that never rejects; used where limiting is disabled.
#[derive(Clone, Debug)]
pub struct UnlimitedRateLimiter;

impl RateLimiter for UnlimitedRateLimiter {
    fn enforce(&self, quota: &RateLimitQuota, _identifier: &str) -> RateLimitVerdict {
        RateLimitVerdict {
            allowed: true,
            limit: quota.limit(),
            remaining: quota.limit(),
            reset_unix: unix_seconds(SystemTime::now() + quota.window()),
            retry_after_seconds: 1,
        }
    }
}

/// Build the `X-RateLimit-*` header set for a verdict, plus `Retry-After`
/// when the request was rejected. Emitted on allowed and limited responses
/// alike so clients can pace themselves.
#[must_use]
pub fn rate_limit_headers(verdict: &RateLimitVerdict) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_numeric(&mut headers, "x-ratelimit-limit", verdict.limit);
    insert_numeric(&mut headers, "x-ratelimit-remaining", verdict.remaining);
    insert_numeric(&mut headers, "x-ratelimit-reset", verdict.reset_unix);
    if !verdict.allowed {
        insert_numeric(&mut headers, "retry-after", verdict.retry_after_seconds);
    }
    headers
}

fn insert_numeric(headers: &mut HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(limit: u64, window: Duration) -> RateLimitQuota {
        RateLimitQuota::new("test", limit, window)
    }

    #[test]
    fn requests_within_limit_are_allowed() {
        let limiter = FixedWindowLimiter::new();
        let quota = quota(3, Duration::from_secs(60));

        for expected_remaining in [2, 1, 0] {
            let verdict = limiter.enforce(&quota, "1.2.3.4");
            assert!(verdict.allowed);
            assert_eq!(verdict.remaining, expected_remaining);
            assert_eq!(verdict.limit, 3);
        }
    }

    #[test]
    fn request_over_limit_is_rejected_with_retry_after() {
        let limiter = FixedWindowLimiter::new();
        let quota = quota(2, Duration::from_secs(60));

        limiter.enforce(&quota, "1.2.3.4");
        limiter.enforce(&quota, "1.2.3.4");
        let verdict = limiter.enforce(&quota, "1.2.3.4");

        assert!(!verdict.allowed);
        assert_eq!(verdict.remaining, 0);
        assert!(verdict.retry_after_seconds >= 1);
    }

    #[test]
    fn identifiers_are_counted_separately() {
        let limiter = FixedWindowLimiter::new();
        let quota = quota(1, Duration::from_secs(60));

        assert!(limiter.enforce(&quota, "1.2.3.4").allowed);
        assert!(limiter.enforce(&quota, "5.6.7.8").allowed);
        assert!(!limiter.enforce(&quota, "1.2.3.4").allowed);
    }

    #[test]
    fn window_rollover_resets_the_count() {
        let limiter = FixedWindowLimiter::new();
        let quota = quota(1, Duration::from_millis(20));

        assert!(limiter.enforce(&quota, "1.2.3.4").allowed);
        assert!(!limiter.enforce(&quota, "1.2.3.4").allowed);

        std::thread::sleep(Duration::from_millis(30));

        let verdict = limiter.enforce(&quota, "1.2.3.4");
        assert!(verdict.allowed);
        assert_eq!(verdict.remaining, 0);
    }

    #[test]
    fn sweep_drops_expired_entries() {
        let limiter = FixedWindowLimiter::new().with_sweep_threshold(2);
        let expired = quota(1, Duration::from_millis(1));

        limiter.enforce(&expired, "a");
        limiter.enforce(&expired, "b");
        limiter.enforce(&expired, "c");
        std::thread::sleep(Duration::from_millis(5));

        // This call exceeds the threshold and triggers the sweep.
        let fresh = quota(1, Duration::from_secs(60));
        limiter.enforce(&fresh, "d");

        let entries = limiter
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn prefixes_partition_the_key_space() {
        let limiter = FixedWindowLimiter::new();
        let login = RateLimitQuota::new("login", 1, Duration::from_secs(60));
        let register = RateLimitQuota::new("register", 1, Duration::from_secs(60));

        assert!(limiter.enforce(&login, "1.2.3.4").allowed);
        assert!(limiter.enforce(&register, "1.2.3.4").allowed);
        assert!(!limiter.enforce(&login, "1.2.3.4").allowed);
    }

    #[test]
    fn verdict_headers_include_retry_after_only_when_limited() {
        let allowed = RateLimitVerdict {
            allowed: true,
            limit: 10,
            remaining: 9,
            reset_unix: 1_700_000_000,
            retry_after_seconds: 1,
        };
        let headers = rate_limit_headers(&allowed);
        assert_eq!(
            headers.get("x-ratelimit-limit").and_then(|v| v.to_str().ok()),
            Some("10")
        );
        assert_eq!(
            headers.get("x-ratelimit-remaining").and_then(|v| v.to_str().ok()),
            Some("9")
        );
        assert!(headers.get("retry-after").is_none());

        let limited = RateLimitVerdict {
            allowed: false,
            ..allowed
        };
        let headers = rate_limit_headers(&limited);
        assert!(headers.get("retry-after").is_some());
    }

    #[test]
    fn unlimited_limiter_always_allows() {
        let limiter = UnlimitedRateLimiter;
        let quota = quota(1, Duration::from_secs(60));
        for _ in 0..10 {
            assert!(limiter.enforce(&quota, "1.2.3.4").allowed);
        }
    }
}
