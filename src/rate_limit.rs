use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Sliding window in-memory rate limiter (pod local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action limits derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub issue_limit: usize,
    pub issue_window: Duration,
    pub flag_limit: usize,
    pub flag_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn dur_env(name: &str, default: u64) -> Duration {
            Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default))
        }
        Self {
            issue_limit: usize_env("RL_ISSUE_LIMIT", 5),
            issue_window: dur_env("RL_ISSUE_WINDOW", 3600),
            flag_limit: usize_env("RL_FLAG_LIMIT", 20),
            flag_window: dur_env("RL_FLAG_WINDOW", 3600),
        }
    }
}

/// High level guard used by handlers; keyed by actor id, not IP, since
/// every rate-limited action requires an authenticated caller.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self {
        Self { limiter, cfg }
    }

    pub fn allow_issue(&self, actor_id: &str) -> bool {
        self.limiter.check(&format!("issue:{actor_id}"), self.cfg.issue_limit, self.cfg.issue_window)
    }

    pub fn allow_flag(&self, actor_id: &str) -> bool {
        self.limiter.check(&format!("flag:{actor_id}"), self.cfg.flag_limit, self.cfg.flag_window)
    }
}
