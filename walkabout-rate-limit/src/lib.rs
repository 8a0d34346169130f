use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// The verdict for one request against a client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Requests left in the window after this one.
    pub remaining: u64,
    /// Seconds until the oldest counted request leaves the window. Zero when
    /// allowed.
    pub retry_after_secs: u64,
}

/// Trait for pluggable rate-limiting backends.
pub trait RateLimitBackend: Send + Sync + 'static {
    /// Record one request for `key` against a `max`-per-`window_secs` limit
    /// and decide whether it is allowed.
    fn check(&self, key: &str, max: u64, window_secs: u64) -> Decision;
}

/// In-memory sliding-window limiter.
///
/// Each client key holds the timestamps of its requests inside the window;
/// the (N+1)-th request in a window is denied with a `retry_after` no larger
/// than the window. Key stripes are sharded by the map; a background sweeper
/// drops windows that have gone idle.
#[derive(Clone, Default)]
pub struct SlidingWindowLimiter {
    windows: Arc<DashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries whose every timestamp is older than `horizon`.
    pub fn sweep(&self, horizon: Duration) {
        let now = Instant::now();
        self.windows
            .retain(|_, stamps| stamps.back().map(|t| now.duration_since(*t) < horizon).unwrap_or(false));
    }

    /// Spawn a periodic sweeper task. The handle may be dropped; the task
    /// runs for the life of the process.
    pub fn spawn_sweeper(&self, every: Duration, horizon: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                limiter.sweep(horizon);
            }
        })
    }
}

impl RateLimitBackend for SlidingWindowLimiter {
    fn check(&self, key: &str, max: u64, window_secs: u64) -> Decision {
        let now = Instant::now();
        let window = Duration::from_secs(window_secs);
        let mut stamps = self.windows.entry(key.to_string()).or_default();
        while let Some(oldest) = stamps.front() {
            if now.duration_since(*oldest) >= window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        if (stamps.len() as u64) < max {
            stamps.push_back(now);
            Decision {
                allowed: true,
                remaining: max - stamps.len() as u64,
                retry_after_secs: 0,
            }
        } else {
            let retry_after = stamps
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            Decision {
                allowed: false,
                remaining: 0,
                retry_after_secs: retry_after.as_secs().max(1).min(window_secs),
            }
        }
    }
}

/// Clonable handle to a rate-limit backend, kept in the application state.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn RateLimitBackend>,
}

impl RateLimiter {
    pub fn new(backend: impl RateLimitBackend) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn check(&self, key: &str, max: u64, window_secs: u64) -> Decision {
        self.backend.check(key, max, window_secs)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(SlidingWindowLimiter::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_denies() {
        let limiter = SlidingWindowLimiter::new();
        for i in 0..5 {
            let decision = limiter.check("client", 5, 60);
            assert!(decision.allowed, "request {i} should pass");
            assert_eq!(decision.remaining, 4 - i);
        }
        let decision = limiter.check("client", 5, 60);
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs >= 1);
        assert!(decision.retry_after_secs <= 60);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::new();
        assert!(limiter.check("a", 1, 60).allowed);
        assert!(!limiter.check("a", 1, 60).allowed);
        assert!(limiter.check("b", 1, 60).allowed);
    }

    #[test]
    fn window_slides() {
        let limiter = SlidingWindowLimiter::new();
        assert!(limiter.check("c", 1, 1).allowed);
        assert!(!limiter.check("c", 1, 1).allowed);
        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.check("c", 1, 1).allowed);
    }

    #[test]
    fn sweep_drops_idle_windows() {
        let limiter = SlidingWindowLimiter::new();
        limiter.check("idle", 5, 60);
        assert_eq!(limiter.windows.len(), 1);
        limiter.sweep(Duration::from_secs(0));
        assert_eq!(limiter.windows.len(), 0);
    }
}
