//! Fixed-window rate limiting per (operation class, caller)
//!
//! Counters live in memory only. Check-and-increment happens under a single
//! mutex so two concurrent requests can never both take the last slot.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::error::{Error, RateLimitInfo, Result};

/// Operations that are quota-limited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Export,
    AutoImprovement,
    Feedback,
    Bulk,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::AutoImprovement => "auto_improvement",
            Self::Feedback => "feedback",
            Self::Bulk => "bulk",
        }
    }
}

impl std::str::FromStr for OperationClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "export" => Ok(Self::Export),
            "auto_improvement" => Ok(Self::AutoImprovement),
            "feedback" => Ok(Self::Feedback),
            "bulk" => Ok(Self::Bulk),
            _ => Err(format!("Unknown operation class: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    reset_time: DateTime<Utc>,
}

/// Number of checks between sweeps of expired windows
const PRUNE_EVERY: u64 = 256;

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(OperationClass, String), Window>>,
    checks: std::sync::atomic::AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            checks: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Count one request against the caller's quota, or reject it
    pub fn check(&self, class: OperationClass, caller: &str) -> Result<()> {
        self.check_at(class, caller, Utc::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock
    pub fn check_at(&self, class: OperationClass, caller: &str, now: DateTime<Utc>) -> Result<()> {
        let limit = self.config.limit_for(class);
        let window_len = Duration::from_std(self.config.window())
            .unwrap_or_else(|_| Duration::seconds(60));

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let n = self
            .checks
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if n % PRUNE_EVERY == PRUNE_EVERY - 1 {
            windows.retain(|_, w| w.reset_time > now);
        }

        let window = windows
            .entry((class, caller.to_string()))
            .or_insert_with(|| Window {
                count: 0,
                reset_time: now + window_len,
            });

        if now >= window.reset_time {
            window.count = 0;
            window.reset_time = now + window_len;
        }

        if window.count >= limit {
            let remaining = (window.reset_time - now).num_milliseconds().max(0) as u64;
            let retry_after = remaining.div_ceil(1000).max(1);
            warn!(
                class = class.as_str(),
                caller,
                limit,
                retry_after,
                "Rate limit exceeded"
            );
            return Err(Error::RateLimited(RateLimitInfo {
                limit,
                retry_after,
                reset_time: window.reset_time,
            }));
        }

        window.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(export: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window_secs: 60,
            export,
            ..Default::default()
        })
    }

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = limiter(3);
        let now = Utc::now();
        for _ in 0..3 {
            assert!(limiter.check_at(OperationClass::Export, "alice", now).is_ok());
        }
        let err = limiter
            .check_at(OperationClass::Export, "alice", now)
            .unwrap_err();
        match err {
            Error::RateLimited(info) => {
                assert_eq!(info.limit, 3);
                assert_eq!(info.retry_after, 60);
                assert_eq!(info.reset_time, now + Duration::seconds(60));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let limiter = limiter(1);
        let start = Utc::now();
        limiter.check_at(OperationClass::Export, "a", start).unwrap();

        let almost = start + Duration::milliseconds(59_999);
        match limiter.check_at(OperationClass::Export, "a", almost) {
            Err(Error::RateLimited(info)) => assert_eq!(info.retry_after, 1),
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_window_resets_at_reset_time() {
        let limiter = limiter(1);
        let start = Utc::now();
        limiter.check_at(OperationClass::Export, "a", start).unwrap();
        assert!(limiter.check_at(OperationClass::Export, "a", start).is_err());

        let reset = start + Duration::seconds(60);
        assert!(limiter.check_at(OperationClass::Export, "a", reset).is_ok());
        assert!(limiter.check_at(OperationClass::Export, "a", reset).is_err());
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1);
        let now = Utc::now();
        limiter.check_at(OperationClass::Export, "a", now).unwrap();
        assert!(limiter.check_at(OperationClass::Export, "b", now).is_ok());
        assert!(limiter.check_at(OperationClass::Feedback, "a", now).is_ok());
    }

    #[test]
    fn test_concurrent_checks_never_exceed_limit() {
        use std::sync::Arc;

        let limiter = Arc::new(limiter(10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.check(OperationClass::Export, "shared").is_ok())
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 10);
    }

    #[test]
    fn test_operation_class_parse() {
        assert_eq!(
            "auto_improvement".parse::<OperationClass>().unwrap(),
            OperationClass::AutoImprovement
        );
        assert!("nope".parse::<OperationClass>().is_err());
    }
}
