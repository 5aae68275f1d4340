//! Fixed-window rate limiter for price sources.
//!
//! Each source gets a request counter that resets every `interval`. Once
//! `max_requests` is reached, the next caller sleeps out the remainder of the
//! window instead of failing.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::debug;

use oracle_core::RateLimitConfig;

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
    config: RateLimitConfig,
}

impl Window {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            started: Instant::now(),
            count: 0,
            config,
        }
    }

    /// Take a slot, or return how long to wait for the next window.
    fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        let interval = self.config.interval();
        let elapsed = now.saturating_duration_since(self.started);

        if elapsed >= interval {
            self.started = now;
            self.count = 0;
        }

        if self.count < self.config.max_requests {
            self.count += 1;
            Ok(())
        } else {
            Err(interval.saturating_sub(elapsed))
        }
    }
}

/// Per-source request throttling.
///
/// Sources without a configured limit pass straight through.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, Arc<Mutex<Window>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the limit for a source; resets its window
    pub fn configure(&self, source: &str, config: RateLimitConfig) {
        self.windows
            .insert(source.to_string(), Arc::new(Mutex::new(Window::new(config))));
    }

    pub fn remove(&self, source: &str) {
        self.windows.remove(source);
    }

    pub fn is_limited(&self, source: &str) -> bool {
        self.windows.contains_key(source)
    }

    /// Wait until `source` may issue one more request.
    pub async fn acquire(&self, source: &str) {
        let Some(window) = self.windows.get(source).map(|w| Arc::clone(w.value())) else {
            return;
        };

        loop {
            let wait = match window.lock().try_acquire(Instant::now()) {
                Ok(()) => return,
                Err(wait) => wait,
            };

            debug!("Rate limit reached for {}, waiting {:?}", source, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a slot without waiting
    pub fn try_acquire(&self, source: &str) -> bool {
        match self.windows.get(source) {
            Some(window) => window.lock().try_acquire(Instant::now()).is_ok(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(max_requests: u32, interval_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            interval_ms,
        }
    }

    #[test]
    fn test_unlimited_source_passes() {
        let limiter = RateLimiter::new();
        for _ in 0..100 {
            assert!(limiter.try_acquire("free"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_budget() {
        let limiter = RateLimiter::new();
        limiter.configure("coingecko", limit(2, 1_000));

        assert!(limiter.try_acquire("coingecko"));
        assert!(limiter.try_acquire("coingecko"));
        assert!(!limiter.try_acquire("coingecko"));

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(limiter.try_acquire("coingecko"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_call_waits_for_next_window() {
        let limiter = RateLimiter::new();
        limiter.configure("coingecko", limit(2, 1_000));

        let start = Instant::now();
        limiter.acquire("coingecko").await;
        limiter.acquire("coingecko").await;
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.acquire("coingecko").await;
        assert!(start.elapsed() >= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_are_isolated() {
        let limiter = RateLimiter::new();
        limiter.configure("a", limit(1, 1_000));
        limiter.configure("b", limit(1, 1_000));

        assert!(limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("a"));
        assert!(limiter.try_acquire("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_resets_window() {
        let limiter = RateLimiter::new();
        limiter.configure("a", limit(1, 60_000));
        assert!(limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("a"));

        limiter.configure("a", limit(1, 60_000));
        assert!(limiter.try_acquire("a"));

        limiter.remove("a");
        assert!(!limiter.is_limited("a"));
    }
}
