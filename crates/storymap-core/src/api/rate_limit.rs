//! Client-side request rate limiting
//!
//! Sliding 60-second window over the timestamps of permitted calls. The
//! prune/check/wait/append sequence runs under one lock, so waiters are
//! released one at a time and the ceiling can't be overshot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Preallocated timestamp slots; the queue grows past this on demand
const INITIAL_CAPACITY: usize = 256;

pub struct RateLimiter {
    enabled: bool,
    max_per_window: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
    hits: AtomicU64,
}

impl RateLimiter {
    pub fn new(enabled: bool, requests_per_minute: usize) -> Self {
        Self::with_window(enabled, requests_per_minute, RATE_WINDOW)
    }

    pub fn with_window(enabled: bool, max_per_window: usize, window: Duration) -> Self {
        Self {
            enabled,
            max_per_window: max_per_window.max(1),
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(
                max_per_window.min(INITIAL_CAPACITY),
            )),
            hits: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 1)
    }

    /// Wait until another call is permitted, then record it
    pub async fn acquire(&self) {
        if !self.enabled {
            return;
        }

        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();
        prune(&mut timestamps, now, self.window);

        if timestamps.len() >= self.max_per_window {
            if let Some(&oldest) = timestamps.front() {
                let free_at = oldest + self.window;
                warn!(
                    wait_ms = free_at.saturating_duration_since(now).as_millis() as u64,
                    "RateLimiter: request ceiling reached, waiting for window"
                );
                self.hits.fetch_add(1, Ordering::Relaxed);
                sleep_until(free_at).await;
                prune(&mut timestamps, Instant::now(), self.window);
            }
        }

        timestamps.push_back(Instant::now());
        debug!(
            "RateLimiter: {}/{} requests in window",
            timestamps.len(),
            self.max_per_window
        );
    }

    /// How many times a caller had to wait
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Fraction of the window's budget currently used (0.0 while disabled)
    pub fn utilization(&self) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        match self.timestamps.try_lock() {
            Ok(mut timestamps) => {
                prune(&mut timestamps, Instant::now(), self.window);
                timestamps.len() as f64 / self.max_per_window as f64
            }
            // A waiter holds the lock, so the window is full
            Err(_) => 1.0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = timestamps.front() {
        if now.saturating_duration_since(front) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
