//! Suppression window for immediate alerts.
//!
//! Muting only gates snapshot alerts for new detections. Clip delivery for
//! finished events is never suppressed, so the chat keeps a full record of
//! what happened while alerts were silenced.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Shared mute state: a single expiry timestamp (epoch milliseconds).
///
/// Every mutation is one atomic store, so the chat command handler and the
/// classifier can share it behind an `Arc` without locking.
#[derive(Debug)]
pub struct MuteWindow {
    expires_at_ms: AtomicI64,
    window: Duration,
}

impl MuteWindow {
    /// Create an inactive window whose `mute()` lasts `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            expires_at_ms: AtomicI64::new(i64::MIN),
            window,
        }
    }

    /// Length of the window opened by [`MuteWindow::mute`].
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Silence alerts for the configured window starting now.
    pub fn mute(&self) -> DateTime<Utc> {
        self.mute_at(Utc::now())
    }

    /// Silence alerts for `duration` starting now.
    pub fn mute_for(&self, duration: Duration) -> DateTime<Utc> {
        self.mute_for_at(duration, Utc::now())
    }

    /// Time left in the current window.
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_at(Utc::now())
    }

    /// Resume alerts immediately.
    pub fn unmute(&self) {
        self.unmute_at(Utc::now());
    }

    /// Whether alerts are currently suppressed.
    pub fn is_muted(&self) -> bool {
        self.is_muted_at(Utc::now())
    }

    /// Silence alerts for the configured window starting at `now`.
    ///
    /// Returns the new expiry.
    pub fn mute_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.mute_for_at(self.window, now)
    }

    /// Silence alerts for an explicit duration starting at `now`.
    pub fn mute_for_at(&self, duration: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        let expiry = now.timestamp_millis().saturating_add(millis);
        self.expires_at_ms.store(expiry, Ordering::Release);
        DateTime::from_timestamp_millis(expiry).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Move the expiry one second into the past relative to `now`.
    pub fn unmute_at(&self, now: DateTime<Utc>) {
        self.expires_at_ms
            .store(now.timestamp_millis() - 1000, Ordering::Release);
    }

    /// `now < expiry`.
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() < self.expires_at_ms.load(Ordering::Acquire)
    }

    /// Time left in the window, or `None` when alerts are active.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let left = self
            .expires_at_ms
            .load(Ordering::Acquire)
            .saturating_sub(now.timestamp_millis());
        u64::try_from(left)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
