//! Monotonic deadlines.
//!
//! A [`Deadline`] is an absolute point on the process's monotonic clock,
//! expressed as nanoseconds since an arbitrary, process-local epoch. Every
//! blocking API in this workspace (channel send/recv, mailbox recv, task
//! join) accepts a `Deadline` rather than a relative duration, so that a
//! single wait loop can simply keep re-checking `expired` without having to
//! re-derive "how much longer" on every wakeup.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// The largest timeout, in milliseconds, that [`clamp_poll_timeout_ms`] will
/// ever hand back to an underlying blocking syscall.
const MAX_POLL_TIMEOUT_MS: i32 = 30_000;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Returns the current time in nanoseconds on the process's monotonic clock.
///
/// The epoch is arbitrary (process start) and not comparable across
/// processes; only differences between two calls are meaningful.
#[must_use]
pub fn now_ns() -> i64 {
    let elapsed = epoch().elapsed();
    i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX)
}

/// An absolute point on the monotonic clock.
///
/// `when_ns == 0` is a sentinel meaning "no deadline / wait forever" at API
/// boundaries that accept an optional deadline; everywhere else it is a real
/// absolute nanosecond timestamp from [`now_ns`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline {
    when_ns: i64,
}

impl Deadline {
    /// The sentinel deadline meaning "no deadline".
    pub const NONE: Deadline = Deadline { when_ns: 0 };

    /// Builds a deadline from an already-known absolute timestamp.
    #[must_use]
    pub fn at(when_ns: i64) -> Self {
        Deadline { when_ns }
    }

    /// Builds a deadline `rel_ns` nanoseconds from now.
    ///
    /// Non-positive input saturates to "already expired" rather than
    /// wrapping into the past or panicking.
    #[must_use]
    pub fn from_ns(rel_ns: i64) -> Self {
        if rel_ns <= 0 {
            return Deadline { when_ns: now_ns() };
        }
        Deadline {
            when_ns: now_ns().saturating_add(rel_ns),
        }
    }

    /// Builds a deadline `rel_ms` milliseconds from now.
    #[must_use]
    pub fn from_ms(rel_ms: i64) -> Self {
        Self::from_ns(rel_ms.saturating_mul(1_000_000))
    }

    /// Builds a deadline `rel_sec` seconds from now.
    #[must_use]
    pub fn from_sec(rel_sec: i64) -> Self {
        Self::from_ns(rel_sec.saturating_mul(1_000_000_000))
    }

    /// Returns the raw absolute nanosecond timestamp, or `0` for [`Deadline::NONE`].
    #[must_use]
    pub fn as_ns(self) -> i64 {
        self.when_ns
    }

    /// Whether this deadline carries no real limit.
    #[must_use]
    pub fn is_none(self) -> bool {
        self.when_ns == 0
    }

    /// Whether `now_ns() >= when_ns`. [`Deadline::NONE`] never expires.
    #[must_use]
    pub fn expired(self) -> bool {
        if self.is_none() {
            return false;
        }
        now_ns() >= self.when_ns
    }

    /// Remaining time in nanoseconds, saturating at zero. [`Deadline::NONE`]
    /// reports `i64::MAX`.
    #[must_use]
    pub fn remaining_ns(self) -> i64 {
        if self.is_none() {
            return i64::MAX;
        }
        self.when_ns.saturating_sub(now_ns()).max(0)
    }

    /// Remaining time in milliseconds, saturating at zero, rounded up so a
    /// caller never under-waits.
    #[must_use]
    pub fn remaining_ms(self) -> i64 {
        if self.is_none() {
            return i64::MAX;
        }
        let ns = self.remaining_ns();
        ns.saturating_add(999_999) / 1_000_000
    }

    /// Blocks the calling thread until this deadline passes.
    ///
    /// Restarts the underlying sleep if interrupted early (e.g. by a
    /// spurious wakeup), so the caller is guaranteed to observe
    /// [`Deadline::expired`] returning `true` once this returns, unless the
    /// deadline is [`Deadline::NONE`] in which case this never returns.
    pub fn sleep_until(self) {
        if self.is_none() {
            loop {
                std::thread::sleep(Duration::from_secs(u64::MAX));
            }
        }
        while !self.expired() {
            let remaining = Duration::from_nanos(
                u64::try_from(self.remaining_ns()).unwrap_or(u64::MAX),
            );
            std::thread::sleep(remaining);
        }
    }
}

/// Clamps a remaining-time-in-milliseconds value to a range safe to hand to
/// a blocking syscall: `0` for non-positive input, capped at 30 seconds.
///
/// Values above the cap are returned as the cap rather than the true
/// remaining time; callers are expected to loop, re-clamping on each
/// wakeup, until the real deadline expires.
#[must_use]
pub fn clamp_poll_timeout_ms(rem_ms: i64) -> i32 {
    if rem_ms <= 0 {
        return 0;
    }
    if rem_ms > i64::from(MAX_POLL_TIMEOUT_MS) {
        return MAX_POLL_TIMEOUT_MS;
    }
    i32::try_from(rem_ms).unwrap_or(MAX_POLL_TIMEOUT_MS)
}
