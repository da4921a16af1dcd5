//! Timestamp helpers.
//!
//! Message dates are stored as `i64` microseconds since the Unix epoch. Live
//! message dates come from [`now_utc`], which holds at its high-water mark
//! while the wall clock is behind it, so dates handed out within one process
//! are non-decreasing.
//!
//! Tab activity uses a separate monotonic clock ([`monotonic_millis`]) that is
//! only meaningful inside one process.

#![allow(clippy::missing_const_for_fn)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Microseconds per second
const MICROS_PER_SECOND: i64 = 1_000_000;

/// Backward jump threshold: 1 second in microseconds.
const BACKWARD_JUMP_THRESHOLD_US: i64 = 1_000_000;

/// Last observed wall-clock value (microseconds since epoch).
static LAST_SYSTEM_TIME_US: AtomicI64 = AtomicI64::new(0);

/// Number of detected backward clock jumps.
static CLOCK_SKEW_BACKWARD_COUNT: AtomicI64 = AtomicI64::new(0);

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Convert a UTC datetime to microseconds since Unix epoch.
#[inline]
#[must_use]
pub fn datetime_to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

/// Convert microseconds since Unix epoch to a UTC datetime.
///
/// Values outside chrono's representable range clamp to `MIN_UTC`/`MAX_UTC`
/// instead of panicking.
#[inline]
#[must_use]
pub fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(MICROS_PER_SECOND);
    let sub_micros = micros.rem_euclid(MICROS_PER_SECOND);
    let nsecs = u32::try_from(sub_micros * 1000).unwrap_or(0);
    Utc.timestamp_opt(secs, nsecs).single().unwrap_or(if micros < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Clamp a wall-clock reading to the high-water mark `last`.
///
/// Returns the value to hand out and whether the step back was large enough
/// to count as a clock jump.
#[inline]
const fn clamp_to_high_water(current: i64, last: i64) -> (i64, bool) {
    if current >= last {
        (current, false)
    } else {
        (last, last.saturating_sub(current) > BACKWARD_JUMP_THRESHOLD_US)
    }
}

/// Current time as microseconds since Unix epoch, with clock skew protection.
///
/// Never returns less than a previous call in this process. Backward steps
/// of more than 1 second are counted in [`clock_skew_backward_jumps`].
#[inline]
#[must_use]
pub fn now_micros() -> i64 {
    let current = Utc::now().timestamp_micros();
    let last = LAST_SYSTEM_TIME_US.fetch_max(current, Ordering::Relaxed);
    let (value, jumped) = clamp_to_high_water(current, last);
    if jumped {
        CLOCK_SKEW_BACKWARD_COUNT.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            behind_us = last - current,
            "wall clock jumped backwards; holding message dates"
        );
    }
    value
}

/// Current time as a UTC datetime (skew-protected, see [`now_micros`]).
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    micros_to_datetime(now_micros())
}

/// Number of backward clock jumps observed by [`now_micros`].
#[must_use]
pub fn clock_skew_backward_jumps() -> i64 {
    CLOCK_SKEW_BACKWARD_COUNT.load(Ordering::Relaxed)
}

/// Milliseconds since the first call in this process. Never decreases.
///
/// Always at least 1 so that 0 can mean "never" in atomics.
#[must_use]
pub fn monotonic_millis() -> u64 {
    let start = PROCESS_START.get_or_init(Instant::now);
    u64::try_from(start.elapsed().as_millis())
        .unwrap_or(u64::MAX)
        .saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_roundtrip() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 45).unwrap();
        let micros = datetime_to_micros(dt);
        assert_eq!(micros_to_datetime(micros), dt);
    }

    #[test]
    fn negative_micros_are_before_epoch() {
        let dt = micros_to_datetime(-1);
        assert!(dt < micros_to_datetime(0));
    }

    #[test]
    fn extreme_micros_clamp() {
        assert_eq!(micros_to_datetime(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(micros_to_datetime(i64::MIN), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn now_micros_never_regresses() {
        let mut prev = now_micros();
        for _ in 0..1_000 {
            let next = now_micros();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn small_backward_step_is_held_but_not_counted() {
        assert_eq!(clamp_to_high_water(5_000, 5_400), (5_400, false));
        assert_eq!(clamp_to_high_water(5_400, 5_400), (5_400, false));
        assert_eq!(clamp_to_high_water(6_000, 5_400), (6_000, false));
    }

    #[test]
    fn large_backward_jump_is_held_and_counted() {
        let last = 10 * BACKWARD_JUMP_THRESHOLD_US;
        let current = last - BACKWARD_JUMP_THRESHOLD_US - 1;
        assert_eq!(clamp_to_high_water(current, last), (last, true));
        assert!(clock_skew_backward_jumps() >= 0);
    }

    #[test]
    fn monotonic_millis_is_positive_and_non_decreasing() {
        let a = monotonic_millis();
        let b = monotonic_millis();
        assert!(a >= 1);
        assert!(b >= a);
    }
}
