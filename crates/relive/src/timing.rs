//! Conversions between timescale ticks and wall-clock durations.
//!
//! All arithmetic is integral. Splitting the tick count into whole seconds
//! and a sub-second remainder keeps the conversion exact for any timescale
//! up to nanosecond resolution and avoids overflowing on large tick values.

use chrono::{DateTime, TimeDelta, Utc};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Convert a tick count at the given timescale into a wall duration.
///
/// A timescale of zero yields a zero duration.
pub fn ticks_to_duration(ticks: i64, timescale: u64) -> TimeDelta {
    if timescale == 0 {
        return TimeDelta::zero();
    }
    let scale = timescale as i64;
    let secs = ticks / scale;
    let nanos = (ticks % scale) * NANOS_PER_SEC / scale;
    TimeDelta::seconds(secs) + TimeDelta::nanoseconds(nanos)
}

/// Inverse of [`ticks_to_duration`], sign preserving.
pub fn duration_to_ticks(duration: TimeDelta, timescale: u64) -> i64 {
    let scale = timescale as i64;
    let secs = duration.num_seconds();
    let nanos = duration.subsec_nanos() as i64;
    secs * scale + nanos * scale / NANOS_PER_SEC
}

/// Floor-toward-zero `duration` to a multiple of `unit`.
pub fn round_to(duration: TimeDelta, unit: TimeDelta) -> TimeDelta {
    let nanos = duration.num_nanoseconds().unwrap_or(0);
    let unit = unit.num_nanoseconds().unwrap_or(0);
    if unit == 0 {
        return duration;
    }
    TimeDelta::nanoseconds(nanos / unit * unit)
}

/// Round a duration to 10 milliseconds, the resolution used in diff logging.
pub fn round(duration: TimeDelta) -> TimeDelta {
    round_to(duration, TimeDelta::milliseconds(10))
}

/// Round a duration to full seconds.
pub fn round_to_secs(duration: TimeDelta) -> TimeDelta {
    round_to(duration, TimeDelta::seconds(1))
}

/// Short `HH:MM:SS.hh` rendering of a wall time, for log lines.
pub fn short_time(at: DateTime<Utc>) -> String {
    format!(
        "{}.{:02}",
        at.format("%H:%M:%S"),
        at.timestamp_subsec_millis() / 10
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_to_duration_exact() {
        let cases = [
            (10_000, 10_000, TimeDelta::seconds(1)),
            (1, 1_000_000_000, TimeDelta::nanoseconds(1)),
            (3_000_000_000, 1_000_000_000, TimeDelta::seconds(3)),
            (
                3_001,
                1_000,
                TimeDelta::seconds(3) + TimeDelta::milliseconds(1),
            ),
        ];
        for (ticks, timescale, expect) in cases {
            assert_eq!(ticks_to_duration(ticks, timescale), expect);
        }
    }

    #[test]
    fn duration_to_ticks_exact() {
        let cases = [
            (TimeDelta::seconds(1), 10_000, 10_000),
            (TimeDelta::milliseconds(1), 1_000, 1),
            (TimeDelta::seconds(3), 1_000_000_000, 3_000_000_000),
            (
                TimeDelta::seconds(1) + TimeDelta::milliseconds(1),
                10_000,
                10_010,
            ),
            (
                TimeDelta::seconds(1) - TimeDelta::milliseconds(1),
                10_000,
                9_990,
            ),
            (
                -TimeDelta::seconds(1) - TimeDelta::milliseconds(1),
                10_000,
                -10_010,
            ),
        ];
        for (duration, timescale, expect) in cases {
            assert_eq!(duration_to_ticks(duration, timescale), expect);
        }
    }

    #[test]
    fn round_trip_is_identity() {
        // A spread of tick values up to 2^50 against common timescales.
        let timescales = [1u64, 90_000, 96_000, 10_000_000, 1_000_000_000];
        for &scale in &timescales {
            for &ticks in &[0i64, 1, 999, 123_456_789, 1 << 33, (1 << 50) - 1] {
                let got = duration_to_ticks(ticks_to_duration(ticks, scale), scale);
                assert_eq!(got, ticks, "timescale {scale} ticks {ticks}");
            }
        }
    }

    #[test]
    fn zero_timescale_is_zero() {
        assert_eq!(ticks_to_duration(1234, 0), TimeDelta::zero());
    }

    #[test]
    fn round_floors_toward_zero() {
        assert_eq!(
            round_to(TimeDelta::milliseconds(1999), TimeDelta::seconds(1)),
            TimeDelta::seconds(1)
        );
        assert_eq!(
            round(TimeDelta::milliseconds(1234)),
            TimeDelta::milliseconds(1230)
        );
        assert_eq!(
            round_to_secs(TimeDelta::milliseconds(-1999)),
            TimeDelta::seconds(-1)
        );
    }
}
