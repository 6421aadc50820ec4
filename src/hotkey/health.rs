//! Tap restart accounting
//!
//! macOS silently disables an event tap that is slow or sees an event
//! flood. Re-enabling is cheap, but a tap that flaps (e.g. permission was
//! revoked) must not busy-loop the worker, so restarts are rate limited.

use std::time::{Duration, Instant};

use tracing::warn;

/// Restarts closer together than this count toward the burst limit
const RESTART_BURST_WINDOW: Duration = Duration::from_secs(1);

/// Automatic restarts allowed within one burst
const MAX_RESTART_BURST: u32 = 5;

/// Tracks restart attempts for the currently installed tap.
///
/// Created when capture starts and dropped when it stops, so a manual
/// stop/start cycle is the only way to re-arm an exhausted counter.
#[derive(Debug, Default)]
pub struct TapHealth {
    restart_count: u32,
    last_restart_at: Option<Instant>,
}

impl TapHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a disablement at `now` and decide whether an automatic
    /// restart may run.
    ///
    /// A restart more than one second after the previous one resets the
    /// burst counter; restarts under one second apart increment it. Once
    /// the counter reaches the ceiling, all further restarts are refused
    /// until this tracker is recreated.
    pub fn allow_restart(&mut self, now: Instant) -> bool {
        if self.is_exhausted() {
            return false;
        }

        match self.last_restart_at {
            Some(prev) if now.duration_since(prev) < RESTART_BURST_WINDOW => {
                self.restart_count += 1;
                if self.is_exhausted() {
                    warn!(
                        attempts = self.restart_count,
                        "tap restart limit reached, suspending automatic restarts"
                    );
                    return false;
                }
            }
            _ => self.restart_count = 0,
        }

        self.last_restart_at = Some(now);
        true
    }

    /// Restarts counted in the current burst
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Whether automatic restarts have been suspended
    pub fn is_exhausted(&self) -> bool {
        self.restart_count >= MAX_RESTART_BURST
    }
}
