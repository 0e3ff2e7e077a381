//! Consecutive-failure lockout for username/password style logins.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{AppError, Result};

pub const MAX_ATTEMPTS: u32 = 5;
pub const LOCK_DURATION: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
struct LockState {
    failures: u32,
    locked_until: Option<Instant>,
    last_failure: Instant,
}

#[derive(Debug)]
pub struct LoginLockout {
    max_attempts: u32,
    lock_duration: Duration,
    attempts: DashMap<String, LockState>,
}

impl LoginLockout {
    pub fn new(max_attempts: u32, lock_duration: Duration) -> Self {
        Self {
            max_attempts,
            lock_duration,
            attempts: DashMap::new(),
        }
    }

    pub fn record_failure(&self, username: &str) {
        self.record_failure_at(username, Instant::now());
    }

    pub fn record_failure_at(&self, username: &str, now: Instant) {
        let mut state = self
            .attempts
            .entry(username.to_string())
            .or_insert_with(|| LockState {
                failures: 0,
                locked_until: None,
                last_failure: now,
            });
        state.failures += 1;
        state.last_failure = now;
        if state.failures >= self.max_attempts {
            state.locked_until = Some(now + self.lock_duration);
            tracing::warn!(
                "Locking {} after {} consecutive failures",
                username,
                state.failures
            );
        }
    }

    /// Any successful login clears the failure history.
    pub fn record_success(&self, username: &str) {
        self.attempts.remove(username);
    }

    pub fn is_locked(&self, username: &str) -> bool {
        self.is_locked_at(username, Instant::now())
    }

    /// An expired lock is cleared on read.
    pub fn is_locked_at(&self, username: &str, now: Instant) -> bool {
        let expired = match self.attempts.get(username) {
            Some(state) => match state.locked_until {
                Some(until) if now >= until => true,
                Some(_) => return true,
                None => return false,
            },
            None => return false,
        };
        if expired {
            self.attempts
                .remove_if(username, |_, s| s.locked_until.is_some_and(|u| now >= u));
        }
        false
    }

    pub fn remaining_attempts(&self, username: &str) -> u32 {
        self.attempts
            .get(username)
            .map(|s| self.max_attempts.saturating_sub(s.failures))
            .unwrap_or(self.max_attempts)
    }

    /// Whole minutes left on the lock, truncated; 0 when not locked.
    pub fn lock_remaining_minutes(&self, username: &str) -> u64 {
        self.lock_remaining_minutes_at(username, Instant::now())
    }

    pub fn lock_remaining_minutes_at(&self, username: &str, now: Instant) -> u64 {
        self.attempts
            .get(username)
            .and_then(|s| s.locked_until)
            .map(|until| until.saturating_duration_since(now).as_secs() / 60)
            .unwrap_or(0)
    }

    /// Refuse a login attempt while the account is locked.
    pub fn ensure_unlocked(&self, username: &str) -> Result<()> {
        let now = Instant::now();
        if self.is_locked_at(username, now) {
            return Err(AppError::Locked {
                minutes: self.lock_remaining_minutes_at(username, now) as i64,
            });
        }
        Ok(())
    }

    /// Drop expired locks and failure counters idle for longer than the
    /// lock duration.
    pub fn purge_stale(&self) -> usize {
        self.purge_stale_at(Instant::now())
    }

    pub fn purge_stale_at(&self, now: Instant) -> usize {
        let before = self.attempts.len();
        let lock_duration = self.lock_duration;
        self.attempts.retain(|_, s| match s.locked_until {
            Some(until) => now < until,
            None => now.saturating_duration_since(s.last_failure) < lock_duration,
        });
        before.saturating_sub(self.attempts.len())
    }
}

impl Default for LoginLockout {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, LOCK_DURATION)
    }
}
