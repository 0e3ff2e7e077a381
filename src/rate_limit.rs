//! Sliding-window request counters keyed by client identifier.
//!
//! Each identifier owns a queue of admission timestamps guarded by its own
//! map shard, so updates for different identifiers never contend. Entries
//! older than the window are purged lazily whenever the identifier is
//! touched; `purge_idle` reclaims identifiers that stopped calling.
//! State lives for the process lifetime only.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of an atomic check-and-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Recorded; `remaining` slots are left in the current window.
    Admitted { remaining: usize },
    /// Capacity exhausted; the oldest entry ages out after `retry_after`.
    Limited { retry_after: Duration },
}

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    capacity: usize,
    entries: DashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity,
            entries: DashMap::new(),
        }
    }

    /// General API traffic: 60 requests per rolling minute.
    pub fn per_minute(capacity: usize) -> Self {
        Self::new(Duration::from_secs(60), capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record(&self, id: &str) {
        self.record_at(id, Instant::now());
    }

    pub fn record_at(&self, id: &str, now: Instant) {
        let mut stamps = self.entries.entry(id.to_string()).or_default();
        Self::trim(&mut stamps, now, self.window);
        stamps.push_back(now);
    }

    pub fn is_limited(&self, id: &str) -> bool {
        self.is_limited_at(id, Instant::now())
    }

    pub fn is_limited_at(&self, id: &str, now: Instant) -> bool {
        self.used_at(id, now) >= self.capacity
    }

    pub fn remaining(&self, id: &str) -> usize {
        self.remaining_at(id, Instant::now())
    }

    pub fn remaining_at(&self, id: &str, now: Instant) -> usize {
        self.capacity.saturating_sub(self.used_at(id, now))
    }

    /// Time until the oldest admission in the window ages out.
    pub fn retry_after_at(&self, id: &str, now: Instant) -> Duration {
        match self.entries.get_mut(id) {
            Some(mut stamps) => {
                Self::trim(&mut stamps, now, self.window);
                stamps
                    .front()
                    .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                    .unwrap_or_default()
            }
            None => Duration::ZERO,
        }
    }

    pub fn try_acquire(&self, id: &str) -> Admission {
        self.try_acquire_at(id, Instant::now())
    }

    /// Check capacity and record in one step under the identifier's lock,
    /// so concurrent callers cannot both take the last slot.
    pub fn try_acquire_at(&self, id: &str, now: Instant) -> Admission {
        let mut stamps = self.entries.entry(id.to_string()).or_default();
        Self::trim(&mut stamps, now, self.window);

        if stamps.len() >= self.capacity {
            let retry_after = stamps
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            return Admission::Limited { retry_after };
        }

        stamps.push_back(now);
        Admission::Admitted {
            remaining: self.capacity - stamps.len(),
        }
    }

    /// Drop identifiers with no admissions left inside the window.
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    pub fn purge_idle_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let window = self.window;
        self.entries.retain(|_, stamps| {
            Self::trim(stamps, now, window);
            !stamps.is_empty()
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn tracked_identifiers(&self) -> usize {
        self.entries.len()
    }

    fn used_at(&self, id: &str, now: Instant) -> usize {
        match self.entries.get_mut(id) {
            Some(mut stamps) => {
                Self::trim(&mut stamps, now, self.window);
                stamps.len()
            }
            None => 0,
        }
    }

    /// An admission stays inside the window until `window` has fully elapsed.
    fn trim(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = stamps.front() {
            if now.saturating_duration_since(*oldest) >= window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Per-user hourly quota for expensive operations. Administrators bypass it.
#[derive(Debug)]
pub struct QuotaGate {
    limiter: SlidingWindowLimiter,
}

impl QuotaGate {
    pub const HOURLY_LIMIT: usize = 5;

    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            limiter: SlidingWindowLimiter::new(window, capacity),
        }
    }

    pub fn hourly() -> Self {
        Self::new(Duration::from_secs(60 * 60), Self::HOURLY_LIMIT)
    }

    /// Consume one unit of quota. Returns false when the user is over quota.
    pub fn check_and_record(&self, user_id: &str, is_admin: bool) -> bool {
        self.check_and_record_at(user_id, is_admin, Instant::now())
    }

    pub fn check_and_record_at(&self, user_id: &str, is_admin: bool, now: Instant) -> bool {
        if is_admin {
            tracing::debug!("Quota bypass for administrator {}", user_id);
            return true;
        }
        match self.limiter.try_acquire_at(user_id, now) {
            Admission::Admitted { remaining } => {
                tracing::info!(
                    "Quota used by {}: {}/{}",
                    user_id,
                    self.limiter.capacity() - remaining,
                    self.limiter.capacity()
                );
                true
            }
            Admission::Limited { .. } => {
                tracing::warn!("Quota exhausted for {}", user_id);
                false
            }
        }
    }

    /// Remaining units in the window; `None` means unlimited.
    pub fn remaining(&self, user_id: &str, is_admin: bool) -> Option<usize> {
        self.remaining_at(user_id, is_admin, Instant::now())
    }

    pub fn remaining_at(&self, user_id: &str, is_admin: bool, now: Instant) -> Option<usize> {
        if is_admin {
            return None;
        }
        Some(self.limiter.remaining_at(user_id, now))
    }

    /// How long until the user's oldest use leaves the window.
    pub fn next_available_in(&self, user_id: &str) -> Duration {
        self.limiter.retry_after_at(user_id, Instant::now())
    }

    pub fn purge_idle(&self) -> usize {
        self.limiter.purge_idle()
    }
}
