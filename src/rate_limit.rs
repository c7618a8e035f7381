use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

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
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
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
    pub post_limit: usize,
    pub post_window: Duration,
    pub comment_limit: usize,
    pub comment_window: Duration,
    pub upload_limit: usize,
    pub upload_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: u64) -> Duration { Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        Self {
            post_limit: usize_env("RL_POST_LIMIT", 5),
            post_window: dur_env("RL_POST_WINDOW", 300),
            comment_limit: usize_env("RL_COMMENT_LIMIT", 10),
            comment_window: dur_env("RL_COMMENT_WINDOW", 60),
            upload_limit: usize_env("RL_UPLOAD_LIMIT", 5),
            upload_window: dur_env("RL_UPLOAD_WINDOW", 3600),
        }
    }
}

/// High level guard used by handlers, keyed on the caller's IP.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn from_env() -> Self {
        let enabled = std::env::var("RL_ENABLED").map(|v| v != "0").unwrap_or(true);
        Self::new(InMemoryRateLimiter::new(enabled), RateLimitConfig::from_env())
    }
    pub fn allow_post(&self, ip: &str) -> bool { self.limiter.check(&format!("post:{ip}"), self.cfg.post_limit, self.cfg.post_window) }
    pub fn allow_comment(&self, ip: &str) -> bool { self.limiter.check(&format!("comment:{ip}"), self.cfg.comment_limit, self.cfg.comment_window) }
    pub fn allow_upload(&self, ip: &str) -> bool { self.limiter.check(&format!("upload:{ip}"), self.cfg.upload_limit, self.cfg.upload_window) }
}
