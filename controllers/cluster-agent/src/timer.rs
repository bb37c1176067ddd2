//! Watch lifetime timer.
//!
//! Bounds the life of one change-stream subscription. Tests drive it with
//! Tokio's paused clock instead of waiting in real time.

use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// Default ceiling for one watch subscription
pub const DEFAULT_WATCH_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Lifetime policy shared by every subscription of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchLifetime {
    ceiling: Duration,
}

impl WatchLifetime {
    #[must_use]
    pub fn new(ceiling: Duration) -> Self {
        Self { ceiling }
    }

    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Start a timer for a newly acquired subscription
    #[must_use]
    pub fn start(&self) -> LifetimeTimer {
        LifetimeTimer {
            sleep: Box::pin(tokio::time::sleep(self.ceiling)),
            ceiling: self.ceiling,
        }
    }
}

impl Default for WatchLifetime {
    fn default() -> Self {
        Self::new(DEFAULT_WATCH_LIFETIME)
    }
}

/// Running timer for one subscription.
#[derive(Debug)]
pub struct LifetimeTimer {
    sleep: Pin<Box<Sleep>>,
    ceiling: Duration,
}

impl LifetimeTimer {
    /// Resolves once the ceiling has elapsed. Cancel-safe.
    pub async fn expired(&mut self) {
        self.sleep.as_mut().await;
    }

    /// Rearm for a full ceiling from now
    pub fn restart(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + self.ceiling);
    }

    #[cfg(test)]
    pub fn is_elapsed(&self) -> bool {
        self.sleep.is_elapsed()
    }
}
