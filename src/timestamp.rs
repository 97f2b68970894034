//! Monotonic timestamps and the `Clock` abstraction the Engine is evaluated
//! against (SPEC_FULL.md §3, §6).
//!
//! The Engine never calls a wall-clock function directly — it is handed a
//! [`Clock`] so that the literal timing scenarios in SPEC_FULL.md §8 can be
//! driven deterministically in tests with a [`ManualClock`], while the
//! Handler uses [`SystemClock`] in production.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Nanoseconds since an arbitrary, process-local monotonic reference point.
/// Never compared across processes; only ever compared to another
/// `Timestamp` produced by the same [`Clock`].
pub type Timestamp = i64;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();
static UTC_REFERENCE: OnceLock<(Timestamp, chrono::DateTime<chrono::Utc>)> = OnceLock::new();

fn process_start() -> Instant {
    *PROCESS_START.get_or_init(Instant::now)
}

/// Supplies `now()` to the Engine/Handler/Window code. Implementations must
/// be monotonically non-decreasing (SPEC_FULL.md §4.4 requires events to
/// arrive in non-decreasing timestamp order).
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The production clock: real monotonic nanoseconds since process start.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        UTC_REFERENCE.get_or_init(|| (0, chrono::Utc::now()));
        process_start().elapsed().as_nanos() as Timestamp
    }
}

/// A clock whose value is set explicitly, for deterministic tests that
/// replay the literal scenarios in SPEC_FULL.md §8.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        ManualClock(Arc::new(AtomicI64::new(start)))
    }

    pub fn set(&self, t: Timestamp) {
        self.0.store(t, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.0.fetch_add(delta_ms * 1_000_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

/// Convert a monotonic timestamp to UTC by subtracting a captured
/// `(monotonic, utc)` reference pair (SPEC_FULL.md §6).
pub fn timestamp_to_utc(
    t: Timestamp,
    reference: (Timestamp, chrono::DateTime<chrono::Utc>),
) -> chrono::DateTime<chrono::Utc> {
    let (ref_mono, ref_utc) = reference;
    let delta_ns = t - ref_mono;
    ref_utc + chrono::Duration::nanoseconds(delta_ns)
}

/// Captures `(now(), Utc::now())` for later use with [`timestamp_to_utc`].
pub fn capture_utc_reference(clock: &dyn Clock) -> (Timestamp, chrono::DateTime<chrono::Utc>) {
    (clock.now(), chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_by_milliseconds() {
        let clock = ManualClock::new(0);
        clock.advance(100);
        assert_eq!(clock.now(), 100_000_000);
    }

    #[test]
    fn utc_conversion_tracks_monotonic_delta() {
        let clock = ManualClock::new(0);
        let reference = capture_utc_reference(&clock);
        clock.advance(1_000);
        let utc = timestamp_to_utc(clock.now(), reference);
        let expected = reference.1 + chrono::Duration::milliseconds(1_000);
        assert_eq!(utc, expected);
    }
}
