//! Unified timer manager for idle and TTL expirations.
//!
//! Both disciplines share one representation: an ordered set of
//! `(deadline_ms, handle)` records. The host object (connection or
//! keyspace entry) stores its current deadline, which doubles as the
//! handle into the index — re-arming or cancelling is an exact
//! `O(log n)` removal, with no intrusive nodes and no stale records.
//!
//! The manager never touches connections or entries itself: expiration
//! yields the expired handles and the event loop resolves them against
//! the connection map and the keyspace. The idle side keys on the
//! connection fd; the TTL side keys on the entry key (`Bytes`, so the
//! clone into the index is a refcount bump).
//!
//! Idle timeouts are a fixed constant, so arrival order equals expiry
//! order and the ordered set behaves exactly like the conceptual FIFO.

use std::collections::BTreeSet;
use std::os::unix::io::RawFd;

use bytes::Bytes;
use cinder_core::time::{self, NO_EXPIRY};

/// How long a connection may sit idle before it is reaped.
pub const IDLE_TIMEOUT_MS: u64 = 60_000;

/// Upper bound on TTL expirations processed per tick. Whatever remains
/// is picked up on the next tick, keeping a mass expiry from stalling
/// the loop.
pub const MAX_TTL_EXPIRATIONS: usize = 1000;

/// Poll timeout: no timers armed.
pub const NO_TIMERS: i32 = -1;

/// Unified view over idle timers (per connection) and TTL timers
/// (per keyspace entry).
#[derive(Debug, Default)]
pub struct TimerManager {
    idle: BTreeSet<(u64, RawFd)>,
    ttl: BTreeSet<(u64, Bytes)>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms or re-arms a connection's idle timer, returning the new
    /// deadline for the connection to store. `old` is the connection's
    /// previous deadline (0 when unset).
    pub fn arm_idle(&mut self, fd: RawFd, old: u64, now: u64) -> u64 {
        if old != NO_EXPIRY {
            self.idle.remove(&(old, fd));
        }
        let deadline = now + IDLE_TIMEOUT_MS;
        self.idle.insert((deadline, fd));
        deadline
    }

    /// Cancels a connection's idle timer. Idempotent on unset timers.
    pub fn cancel_idle(&mut self, fd: RawFd, deadline: u64) {
        if deadline != NO_EXPIRY {
            self.idle.remove(&(deadline, fd));
        }
    }

    /// Arms, re-arms, or updates an entry's TTL timer. `old` is the
    /// entry's previous deadline (0 when unset).
    pub fn arm_ttl(&mut self, key: &Bytes, old: u64, deadline: u64) {
        if old != NO_EXPIRY {
            self.ttl.remove(&(old, key.clone()));
        }
        self.ttl.insert((deadline, key.clone()));
    }

    /// Cancels an entry's TTL timer. Idempotent on unset timers.
    pub fn cancel_ttl(&mut self, key: &Bytes, deadline: u64) {
        if deadline != NO_EXPIRY {
            self.ttl.remove(&(deadline, key.clone()));
        }
    }

    /// Time until the next timer expires, as a poll timeout in ms:
    /// [`NO_TIMERS`] when nothing is armed, `0` when the earliest
    /// deadline has already passed.
    pub fn next_deadline_ms(&self, now: u64) -> i32 {
        let idle = self.idle.first().map(|&(deadline, _)| deadline);
        let ttl = self.ttl.first().map(|(deadline, _)| *deadline);

        let next = match (idle, ttl) {
            (None, None) => return NO_TIMERS,
            (Some(d), None) | (None, Some(d)) => d,
            (Some(a), Some(b)) => a.min(b),
        };

        if next <= now {
            0
        } else {
            (next - now).min(i32::MAX as u64) as i32
        }
    }

    /// Removes and returns every idle timer that has expired.
    pub fn pop_expired_idle(&mut self, now: u64) -> Vec<RawFd> {
        let mut expired = Vec::new();
        while let Some(&(deadline, fd)) = self.idle.first() {
            if deadline > now {
                break;
            }
            self.idle.pop_first();
            expired.push(fd);
        }
        expired
    }

    /// Removes and returns expired TTL timers, at most
    /// [`MAX_TTL_EXPIRATIONS`] per call.
    pub fn pop_expired_ttl(&mut self, now: u64) -> Vec<Bytes> {
        let mut expired = Vec::new();
        while expired.len() < MAX_TTL_EXPIRATIONS {
            if !matches!(self.ttl.first(), Some(&(deadline, _)) if deadline <= now) {
                break;
            }
            if let Some((_, key)) = self.ttl.pop_first() {
                expired.push(key);
            }
        }
        expired
    }

    /// Arms an idle timer for a fresh connection at the current time.
    pub fn arm_idle_now(&mut self, fd: RawFd) -> u64 {
        self.arm_idle(fd, NO_EXPIRY, time::now_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn no_timers_means_no_deadline() {
        let timers = TimerManager::new();
        assert_eq!(timers.next_deadline_ms(1000), NO_TIMERS);
    }

    #[test]
    fn idle_deadline_drives_the_poll_timeout() {
        let mut timers = TimerManager::new();
        timers.arm_idle(3, NO_EXPIRY, 1000);
        assert_eq!(timers.next_deadline_ms(1000), IDLE_TIMEOUT_MS as i32);
        assert_eq!(timers.next_deadline_ms(1000 + IDLE_TIMEOUT_MS), 0);
        assert_eq!(timers.next_deadline_ms(1000 + IDLE_TIMEOUT_MS + 1), 0);
    }

    #[test]
    fn earliest_of_both_disciplines_wins() {
        let mut timers = TimerManager::new();
        timers.arm_idle(3, NO_EXPIRY, 1000); // due at 61_000
        timers.arm_ttl(&key("k"), NO_EXPIRY, 5000);
        assert_eq!(timers.next_deadline_ms(1000), 4000);

        timers.cancel_ttl(&key("k"), 5000);
        assert_eq!(timers.next_deadline_ms(1000), IDLE_TIMEOUT_MS as i32);
    }

    #[test]
    fn rearm_moves_the_idle_deadline() {
        let mut timers = TimerManager::new();
        let first = timers.arm_idle(3, NO_EXPIRY, 1000);
        let second = timers.arm_idle(3, first, 2000);
        assert_eq!(second, 2000 + IDLE_TIMEOUT_MS);

        // the old record is gone: nothing expires at the first deadline
        assert!(timers.pop_expired_idle(first).is_empty());
        assert_eq!(timers.pop_expired_idle(second), vec![3]);
    }

    #[test]
    fn idle_expiry_order_is_arrival_order() {
        let mut timers = TimerManager::new();
        timers.arm_idle(1, NO_EXPIRY, 100);
        timers.arm_idle(2, NO_EXPIRY, 200);
        timers.arm_idle(3, NO_EXPIRY, 300);

        let expired = timers.pop_expired_idle(250 + IDLE_TIMEOUT_MS);
        assert_eq!(expired, vec![1, 2]);
        assert!(timers.pop_expired_idle(250 + IDLE_TIMEOUT_MS).is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut timers = TimerManager::new();
        timers.cancel_idle(9, NO_EXPIRY);
        timers.cancel_ttl(&key("missing"), NO_EXPIRY);
        timers.cancel_ttl(&key("missing"), 1234); // never armed
        assert_eq!(timers.next_deadline_ms(0), NO_TIMERS);
    }

    #[test]
    fn ttl_update_replaces_the_deadline() {
        let mut timers = TimerManager::new();
        timers.arm_ttl(&key("k"), NO_EXPIRY, 5000);
        timers.arm_ttl(&key("k"), 5000, 9000);

        assert!(timers.pop_expired_ttl(5000).is_empty());
        assert_eq!(timers.pop_expired_ttl(9000), vec![key("k")]);
    }

    #[test]
    fn ttl_expiration_is_bounded_per_tick() {
        let mut timers = TimerManager::new();
        for i in 0..(MAX_TTL_EXPIRATIONS + 500) {
            timers.arm_ttl(&key(&format!("k{i}")), NO_EXPIRY, 100 + i as u64);
        }

        let now = 1_000_000;
        let first = timers.pop_expired_ttl(now);
        assert_eq!(first.len(), MAX_TTL_EXPIRATIONS);

        // the remainder is handled on the next pass
        let second = timers.pop_expired_ttl(now);
        assert_eq!(second.len(), 500);
        assert!(timers.pop_expired_ttl(now).is_empty());
    }

    #[test]
    fn unexpired_ttl_stays_put() {
        let mut timers = TimerManager::new();
        timers.arm_ttl(&key("later"), NO_EXPIRY, 10_000);
        assert!(timers.pop_expired_ttl(9_999).is_empty());
        assert_eq!(timers.pop_expired_ttl(10_000), vec![key("later")]);
    }

    #[test]
    fn same_deadline_different_handles() {
        let mut timers = TimerManager::new();
        timers.arm_ttl(&key("a"), NO_EXPIRY, 500);
        timers.arm_ttl(&key("b"), NO_EXPIRY, 500);
        timers.cancel_ttl(&key("a"), 500);

        assert_eq!(timers.pop_expired_ttl(500), vec![key("b")]);
    }
}
