//! Per-address sliding-window rate limiting for the admin surface

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

/// Fixed window applied to admin requests
pub const ADMIN_WINDOW: Duration = Duration::from_secs(60);
/// Maximum attempts per address within one window
pub const ADMIN_MAX_ATTEMPTS: u32 = 50;
/// How often expired windows are swept out of the map
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct WindowEntry {
    window_start: Instant,
    count: u32,
}

/// Sliding-window attempt counter keyed by client address.
///
/// Entries are dropped by a periodic sweep rather than on the request path,
/// bounding memory independent of traffic patterns.
pub struct RateLimiter {
    window: Duration,
    max_attempts: u32,
    attempts: DashMap<IpAddr, WindowEntry>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            window,
            max_attempts,
            attempts: DashMap::new(),
        })
    }

    /// Record an attempt from `ip`. Returns `true` when the address has
    /// exceeded its budget for the current window.
    ///
    /// The first attempt of a new or expired window resets the counter to 1.
    pub fn is_limited(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entry = self.attempts.entry(ip).or_insert(WindowEntry {
            window_start: now,
            count: 0,
        });

        if now.duration_since(entry.window_start) > self.window {
            entry.window_start = now;
            entry.count = 1;
            return false;
        }

        entry.count += 1;
        entry.count > self.max_attempts
    }

    /// Drop entries whose window has expired.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.attempts.len();
        self.attempts
            .retain(|_, entry| now.duration_since(entry.window_start) <= self.window);
        let dropped = before - self.attempts.len();
        if dropped > 0 {
            debug!(dropped, "swept expired rate-limit windows");
        }
    }

    /// Number of addresses currently tracked
    pub fn tracked_addresses(&self) -> usize {
        self.attempts.len()
    }

    /// Periodic sweep, running until shutdown is signalled.
    pub async fn sweep_loop(self: Arc<Self>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.sweep();
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
