//! Session clock anchored to the first captured video frame
//!
//! The capture process has a variable startup latency, so the log time base is
//! not the moment recording was requested but the moment the capture process
//! reports its first frame. A [`Clock`] starts unset; the capture monitor sets
//! the epoch once, and everything that timestamps actions works from the
//! resulting [`Epoch`].

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Write-once epoch holder for one recording session.
#[derive(Debug, Default)]
pub struct Clock {
    epoch: OnceLock<Instant>,
}

impl Clock {
    /// Create a clock in the unset state
    pub fn new() -> Self {
        Self {
            epoch: OnceLock::new(),
        }
    }

    /// Set the epoch to now.
    ///
    /// Only the first call has an effect; later calls return the epoch that
    /// was already set.
    pub fn confirm_capture_started(&self) -> Epoch {
        let now = Instant::now();
        match self.epoch.set(now) {
            Ok(()) => Epoch(now),
            Err(_) => {
                tracing::warn!("Capture start confirmed twice; keeping the first epoch");
                Epoch(self.epoch.get().copied().unwrap_or(now))
            }
        }
    }

    /// The epoch, once capture has been confirmed
    pub fn epoch(&self) -> Option<Epoch> {
        self.epoch.get().copied().map(Epoch)
    }

    pub fn is_set(&self) -> bool {
        self.epoch.get().is_some()
    }
}

/// A confirmed video-start instant. All action timestamps are seconds
/// relative to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(Instant);

impl Epoch {
    /// Wrap an arbitrary instant as an epoch (replay and tests)
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Seconds elapsed since the epoch
    pub fn relative_time(&self) -> f64 {
        self.relative_at(Instant::now())
    }

    /// Seconds between the epoch and `at`; instants before the epoch map to 0.
    pub fn relative_at(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.0).as_secs_f64()
    }

    /// The instant `seconds` after the epoch
    pub fn instant_after(&self, seconds: f64) -> Instant {
        self.0 + Duration::from_secs_f64(seconds.max(0.0))
    }
}
