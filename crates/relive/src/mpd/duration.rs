//! xs:duration scalar as used by manifest attributes.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::TimeDelta;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ReliveError;

const NANOS_PER_SEC: i64 = 1_000_000_000;

// The lexical space of xs:duration, restricted to what manifests carry in
// practice. Year/month components are accepted on parse with fixed lengths
// (365/30 days) but never produced.
static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(-)?P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:\.(\d+))?S)?)?$",
    )
    .unwrap()
});

/// A signed wall duration with xs:duration text representation.
///
/// Round trips exactly at nanosecond precision; the zero value renders as
/// `PT0S` so an attribute explicitly set to zero survives serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct XsDuration(pub TimeDelta);

impl XsDuration {
    pub fn delta(&self) -> TimeDelta {
        self.0
    }
}

impl Default for XsDuration {
    fn default() -> Self {
        XsDuration(TimeDelta::zero())
    }
}

impl From<TimeDelta> for XsDuration {
    fn from(delta: TimeDelta) -> Self {
        XsDuration(delta)
    }
}

impl fmt::Display for XsDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nanos = self.0.num_nanoseconds().unwrap_or(0);
        if nanos < 0 {
            f.write_str("-")?;
            nanos = -nanos;
        }
        f.write_str("P")?;
        let hours = nanos / (3600 * NANOS_PER_SEC);
        let minutes = nanos / (60 * NANOS_PER_SEC) % 60;
        let seconds = nanos / NANOS_PER_SEC % 60;
        let frac = nanos % NANOS_PER_SEC;
        f.write_str("T")?;
        if hours > 0 {
            write!(f, "{hours}H")?;
        }
        if minutes > 0 {
            write!(f, "{minutes}M")?;
        }
        if frac > 0 {
            let digits = format!("{frac:09}");
            write!(f, "{seconds}.{}S", digits.trim_end_matches('0'))
        } else if seconds > 0 || (hours == 0 && minutes == 0) {
            write!(f, "{seconds}S")
        } else {
            Ok(())
        }
    }
}

impl FromStr for XsDuration {
    type Err = ReliveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = DURATION_REGEX
            .captures(s)
            .ok_or_else(|| ReliveError::InvalidDuration(s.to_string()))?;
        let num = |i: usize| -> i64 {
            caps.get(i)
                .map(|m| m.as_str().parse().unwrap_or(0))
                .unwrap_or(0)
        };
        let mut secs = num(7);
        secs += num(6) * 60;
        secs += num(5) * 3600;
        secs += num(4) * 86_400;
        secs += num(3) * 30 * 86_400;
        secs += num(2) * 365 * 86_400;
        let nanos = caps
            .get(8)
            .map(|m| {
                let mut digits = m.as_str().to_string();
                digits.truncate(9);
                let parsed: i64 = digits.parse().unwrap_or(0);
                parsed * 10i64.pow(9 - digits.len() as u32)
            })
            .unwrap_or(0);
        let mut delta = TimeDelta::seconds(secs) + TimeDelta::nanoseconds(nanos);
        if caps.get(1).is_some() {
            delta = -delta;
        }
        Ok(XsDuration(delta))
    }
}

impl Serialize for XsDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for XsDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> TimeDelta {
        s.parse::<XsDuration>().unwrap().0
    }

    #[test]
    fn parses_common_forms() {
        assert_eq!(parse("PT0S"), TimeDelta::zero());
        assert_eq!(parse("PT30S"), TimeDelta::seconds(30));
        assert_eq!(
            parse("PT1.92S"),
            TimeDelta::seconds(1) + TimeDelta::milliseconds(920)
        );
        assert_eq!(parse("PT1M30.5S"), TimeDelta::milliseconds(90_500));
        assert_eq!(
            parse("P1DT2H"),
            TimeDelta::days(1) + TimeDelta::try_hours(2).unwrap()
        );
        assert_eq!(parse("-PT1S"), TimeDelta::seconds(-1));
    }

    #[test]
    fn rejects_garbage() {
        assert!("1.92".parse::<XsDuration>().is_err());
        assert!("PT1X".parse::<XsDuration>().is_err());
    }

    #[test]
    fn format_round_trip() {
        for delta in [
            TimeDelta::zero(),
            TimeDelta::seconds(30),
            TimeDelta::milliseconds(1_920),
            TimeDelta::try_hours(3).unwrap() + TimeDelta::seconds(5),
            TimeDelta::nanoseconds(1),
            -TimeDelta::milliseconds(1_500),
        ] {
            let text = XsDuration(delta).to_string();
            assert_eq!(parse(&text), delta, "{text}");
        }
    }

    #[test]
    fn zero_renders_as_pt0s() {
        assert_eq!(XsDuration::default().to_string(), "PT0S");
    }
}
