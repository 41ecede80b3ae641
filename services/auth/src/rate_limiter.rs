//! Login attempt limiter for slowing down credential guessing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Failed attempts allowed inside one window
    pub max_attempts: u32,
    /// Time window in seconds
    pub window_seconds: u64,
    /// Lockout duration in seconds once the limit is hit
    pub ban_duration_seconds: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_seconds: 300,
            ban_duration_seconds: 900,
        }
    }
}

#[derive(Debug)]
struct AttemptWindow {
    failures: u32,
    window_start: Instant,
    banned_until: Option<Instant>,
}

impl AttemptWindow {
    /// Nothing left to remember once the ban or the window has run out
    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        match self.banned_until {
            Some(until) => now >= until,
            None => now.duration_since(self.window_start) >= window,
        }
    }
}

/// Tracks failed login attempts per key (typically the peer address)
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    entries: Arc<Mutex<HashMap<String, AttemptWindow>>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether `key` may attempt a login right now
    pub async fn is_allowed(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let Some(banned_until) = entries.get(key).map(|entry| entry.banned_until) else {
            return true;
        };

        match banned_until {
            Some(until) if now < until => false,
            Some(_) => {
                entries.remove(key);
                true
            }
            None => true,
        }
    }

    /// Record a failed attempt, banning the key once the limit is reached
    pub async fn record_failure(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let window = Duration::from_secs(self.config.window_seconds);
        entries.retain(|_, entry| !entry.is_stale(now, window));

        let entry = entries.entry(key.to_string()).or_insert(AttemptWindow {
            failures: 0,
            window_start: now,
            banned_until: None,
        });

        entry.failures += 1;

        if entry.failures >= self.config.max_attempts && entry.banned_until.is_none() {
            entry.banned_until = Some(now + Duration::from_secs(self.config.ban_duration_seconds));
            info!(
                "Locked out key {} for {} seconds",
                key, self.config.ban_duration_seconds
            );
        }
    }

    /// Forget the history of `key` after a successful login
    pub async fn reset(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}
