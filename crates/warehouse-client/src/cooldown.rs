//! Rate-limit cooldown and log throttling.
//!
//! Both are per-instance state: two executors never share a window.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::error::WarehouseError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Allows a log line at most once per interval.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Returns true (and records the instant) if a line may be logged now.
    pub fn should_log(&self) -> bool {
        let now = Instant::now();
        let mut last = lock(&self.last);
        match *last {
            Some(at) if now.duration_since(at) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[derive(Debug)]
struct Window {
    until: Instant,
    reason: String,
}

/// Refuses requests while a rate-limit cooldown is active.
#[derive(Debug)]
pub struct CooldownGate {
    window: Mutex<Option<Window>>,
    log: LogThrottle,
}

impl CooldownGate {
    pub fn new(log_interval: Duration) -> Self {
        Self {
            window: Mutex::new(None),
            log: LogThrottle::new(log_interval),
        }
    }

    /// Fail fast with a synthetic `RateLimited` error if cooling down.
    pub fn check(&self) -> Result<(), WarehouseError> {
        let now = Instant::now();
        let mut window = lock(&self.window);
        let Some(active) = window.as_ref() else {
            return Ok(());
        };

        if now >= active.until {
            *window = None;
            return Ok(());
        }

        let remaining = active.until - now;
        let reason = active.reason.clone();
        drop(window);

        if self.log.should_log() {
            warn!(
                "Warehouse rate limit cooldown active ({}), refusing requests for another {:?}",
                reason, remaining
            );
        }

        Err(WarehouseError::RateLimited { remaining, reason })
    }

    /// Start (or extend) the cooldown window.
    pub fn trip(&self, duration: Duration, reason: impl Into<String>) {
        let until = Instant::now() + duration;
        let mut window = lock(&self.window);
        let extend = window.as_ref().map_or(true, |w| w.until < until);
        if extend {
            *window = Some(Window {
                until,
                reason: reason.into(),
            });
        }
    }

    /// Remaining cooldown, if any.
    pub fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        lock(&self.window)
            .as_ref()
            .and_then(|w| w.until.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }
}
