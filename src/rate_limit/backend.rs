//! Pluggable backend trait for rate limiting storage.
//!
//! Allows swapping between in-memory (single process) and external backends
//! like Redis (distributed).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::config::{RateLimitConfig, SourceStats};

/// Result type for rate limit operations.
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Errors from rate limit backend operations.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),
}

/// Sliding window of request timestamps for one upstream source.
///
/// Timestamps older than `now - window` are pruned lazily on every check. The
/// deque holds at most `max_requests` entries, except briefly after the budget
/// is lowered with [`reconfigure`](Self::reconfigure).
#[derive(Debug)]
pub struct RateWindow {
    timestamps: VecDeque<Instant>,
    max_requests: u32,
    window: Duration,
    total_requests: u64,
    throttled: u64,
}

impl RateWindow {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            timestamps: VecDeque::new(),
            max_requests: config.max_requests,
            window: config.window,
            total_requests: 0,
            throttled: 0,
        }
    }

    /// Adopt a new budget. Already recorded timestamps still count against it.
    pub fn reconfigure(&mut self, config: &RateLimitConfig) {
        self.max_requests = config.max_requests;
        self.window = config.window;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a request at `now` if the window has room.
    ///
    /// Returns `Duration::ZERO` when the request was recorded, otherwise the
    /// time until the oldest timestamp leaves the window. Nothing is recorded
    /// in that case; the caller sleeps and checks again.
    pub fn try_acquire(&mut self, now: Instant) -> Duration {
        self.prune(now);

        if (self.timestamps.len() as u32) < self.max_requests {
            self.timestamps.push_back(now);
            self.total_requests += 1;
            return Duration::ZERO;
        }

        self.throttled += 1;
        // Room opens once the entry `max_requests` from the back expires.
        let blocking = self.timestamps.len() - self.max_requests as usize;
        match self.timestamps.get(blocking) {
            Some(&ts) => (ts + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Number of timestamps currently retained.
    pub fn in_window(&self) -> usize {
        self.timestamps.len()
    }

    pub fn stats(&self, now: Instant) -> SourceStats {
        let in_window = self
            .timestamps
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.window)
            .count();
        SourceStats {
            max_requests: self.max_requests,
            window: self.window,
            in_window,
            total_requests: self.total_requests,
            throttled: self.throttled,
        }
    }
}

/// Trait for rate limit storage backends.
///
/// Implementations must be thread-safe and must never hold a lock across a
/// sleep: `try_acquire` only checks and records, the caller does the waiting.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Atomically check the window for `source` and record a request if there
    /// is room. Returns `Duration::ZERO` when recorded, otherwise how long to
    /// wait before checking again.
    async fn try_acquire(&self, source: &str, config: &RateLimitConfig)
        -> RateLimitResult<Duration>;

    /// Current statistics for a source, if it has been seen.
    async fn stats(&self, source: &str) -> RateLimitResult<Option<SourceStats>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(max: u32, ms: u64) -> RateWindow {
        RateWindow::new(&RateLimitConfig::new(max, Duration::from_millis(ms)).unwrap())
    }

    #[test]
    fn test_admits_up_to_limit() {
        let mut w = window(3, 1000);
        let now = Instant::now();
        assert_eq!(w.try_acquire(now), Duration::ZERO);
        assert_eq!(w.try_acquire(now), Duration::ZERO);
        assert_eq!(w.try_acquire(now), Duration::ZERO);
        assert_eq!(w.in_window(), 3);
    }

    #[test]
    fn test_full_window_reports_wait_until_oldest_expires() {
        let mut w = window(2, 1000);
        let start = Instant::now();
        w.try_acquire(start);
        w.try_acquire(start + Duration::from_millis(300));

        let wait = w.try_acquire(start + Duration::from_millis(400));
        assert_eq!(wait, Duration::from_millis(600));
        assert_eq!(w.in_window(), 2);
    }

    #[test]
    fn test_prunes_expired_timestamps() {
        let mut w = window(2, 100);
        let start = Instant::now();
        w.try_acquire(start);
        w.try_acquire(start);

        let later = start + Duration::from_millis(100);
        assert_eq!(w.try_acquire(later), Duration::ZERO);
        assert_eq!(w.in_window(), 1);
    }

    #[test]
    fn test_never_exceeds_limit_in_any_window() {
        let mut w = window(5, 1000);
        let start = Instant::now();
        let mut recorded = Vec::new();

        // Simulate a caller that retries every 50ms for 5 seconds.
        for step in 0..100u64 {
            let now = start + Duration::from_millis(step * 50);
            if w.try_acquire(now) == Duration::ZERO {
                recorded.push(now);
            }
        }

        for (i, t) in recorded.iter().enumerate() {
            let in_window = recorded[i..]
                .iter()
                .take_while(|u| u.duration_since(*t) < Duration::from_millis(1000))
                .count();
            assert!(in_window <= 5, "window starting at {} held {}", i, in_window);
        }
        assert!(recorded.len() >= 25);
    }

    #[test]
    fn test_stats_counts_throttled_checks() {
        let mut w = window(1, 1000);
        let now = Instant::now();
        w.try_acquire(now);
        w.try_acquire(now);
        w.try_acquire(now);

        let stats = w.stats(now);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.throttled, 2);
        assert_eq!(stats.in_window, 1);
    }

    #[test]
    fn test_lowered_budget_counts_existing_timestamps() {
        let mut w = window(5, 1000);
        let start = Instant::now();
        for i in 0..3u64 {
            w.try_acquire(start + Duration::from_millis(i * 100));
        }

        w.reconfigure(&RateLimitConfig::new(2, Duration::from_millis(1000)).unwrap());

        // Two of the three must expire before there is room again.
        let wait = w.try_acquire(start + Duration::from_millis(300));
        assert_eq!(wait, Duration::from_millis(800));
        assert_eq!(w.stats(start).max_requests, 2);
    }

    #[test]
    fn test_huge_budget_does_not_preallocate() {
        let config = RateLimitConfig::new(u32::MAX, Duration::from_secs(86_400)).unwrap();
        let mut w = RateWindow::new(&config);
        assert_eq!(w.try_acquire(Instant::now()), Duration::ZERO);
        assert_eq!(w.in_window(), 1);
    }
}
