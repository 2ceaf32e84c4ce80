//! Checker observations, decoupled from their rendering.
//!
//! The walk over a manifest produces a [`ManifestLog`]; a [`CheckerReporter`]
//! decides how it reaches the operator. The text reporter keeps the one
//! status line per track, the JSON reporter emits the structure wholesale.

use std::fmt::Write as _;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::timing::short_time;

/// A `TimeDelta` that serializes as its ISO-8601 text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dur(pub TimeDelta);

impl Serialize for Dur {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// Everything one manifest walk found.
#[derive(Debug, Default, Serialize)]
pub struct ManifestLog {
    pub periods: Vec<PeriodInfo>,
    pub tracks: Vec<TrackLog>,
}

#[derive(Debug, Serialize)]
pub struct PeriodInfo {
    pub id: String,
    pub start: String,
}

#[derive(Debug, Serialize)]
pub struct TrackLog {
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codecs: Option<String>,
    /// Distance from the first available sample to now.
    pub buffer_depth: Dur,
    /// Distance from the last available sample to now, last period only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_edge: Option<Dur>,
    pub periods: Vec<TrackPeriodLog>,
}

#[derive(Debug, Default, Serialize)]
pub struct TrackPeriodLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Dur>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap: Option<Dur>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub missing: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub splices: Vec<SpliceLog>,
}

#[derive(Debug, Serialize)]
pub struct SpliceLog {
    pub direction: SpliceDirection,
    pub offset: Dur,
    /// The segment boundary the splice lands next to.
    pub boundary: String,
    pub segment_duration: Dur,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpliceDirection {
    Early,
    Late,
    Exact,
}

/// Observer for everything the checker wants an operator to see.
pub trait CheckerReporter: Send + Sync {
    fn new_period(&self, period_id: &str, starts: DateTime<Utc>);
    fn new_event(&self, scheme: &str, event_id: u64, at: DateTime<Utc>, duration: TimeDelta);
    fn period_gap(&self, period_id: &str, from_previous: TimeDelta, to_next: TimeDelta);
    fn track_alignment_offset(&self, offset_diff: f64, adaptation_set: &str, period_id: &str);
    fn no_update(&self, since: TimeDelta);
    fn manifest(&self, log: &ManifestLog);
}

fn gap_millis(delta: TimeDelta) -> bool {
    delta > TimeDelta::milliseconds(1)
}

/// Human-readable rendering.
pub struct TextReporter;

impl CheckerReporter for TextReporter {
    fn new_period(&self, period_id: &str, starts: DateTime<Utc>) {
        tracing::info!("new period {period_id} starts {starts}");
    }

    fn new_event(&self, scheme: &str, event_id: u64, at: DateTime<Utc>, duration: TimeDelta) {
        tracing::info!(
            "new event {scheme}:{event_id} at {} duration {duration}",
            short_time(at)
        );
    }

    fn period_gap(&self, period_id: &str, from_previous: TimeDelta, to_next: TimeDelta) {
        let warn = from_previous > TimeDelta::milliseconds(10) || to_next > TimeDelta::milliseconds(10);
        if warn {
            tracing::warn!("period {period_id} gap from old {from_previous} to new {to_next}");
        } else if gap_millis(from_previous) || gap_millis(to_next) {
            tracing::info!("period {period_id} gap from old {from_previous} to new {to_next}");
        }
    }

    fn track_alignment_offset(&self, offset_diff: f64, adaptation_set: &str, period_id: &str) {
        tracing::warn!(
            "offset difference of {offset_diff} s found in AS {adaptation_set} of period {period_id}"
        );
    }

    fn no_update(&self, since: TimeDelta) {
        tracing::warn!("no update since {since}");
    }

    fn manifest(&self, log: &ManifestLog) {
        for track in &log.tracks {
            let codecs = track
                .codecs
                .as_deref()
                .map(|c| format!("/{c}"))
                .unwrap_or_default();
            let mut line = format!(
                "{:>30}: {:>8}",
                format!("{}{}", track.mime_type, codecs),
                track.buffer_depth.0
            );
            for (index, period) in track.periods.iter().enumerate() {
                if period.missing {
                    line.push_str(" [missing] ");
                    continue;
                }
                if index > 0 {
                    if let Some(gap) = period.gap {
                        let _ = write!(line, "GAP: {}", gap.0);
                    }
                }
                if let Some(duration) = period.duration {
                    let _ = write!(line, " ({:>8})", duration.0);
                }
                for splice in &period.splices {
                    match splice.direction {
                        SpliceDirection::Early => tracing::debug!(
                            "early {} to {} len {}",
                            splice.offset.0,
                            splice.boundary,
                            splice.segment_duration.0
                        ),
                        SpliceDirection::Late => tracing::debug!(
                            "late  {} to {} len {}",
                            splice.offset.0,
                            splice.boundary,
                            splice.segment_duration.0
                        ),
                        SpliceDirection::Exact => tracing::debug!(
                            "exactly at {} len {}",
                            splice.boundary,
                            splice.segment_duration.0
                        ),
                    }
                }
            }
            if let Some(edge) = track.live_edge {
                let _ = write!(line, " {:.1}s", edge.0.num_milliseconds() as f64 / 1000.0);
            }
            tracing::info!("{line}");
        }
    }
}

/// Structured rendering; one JSON document per observation.
pub struct JsonReporter;

impl CheckerReporter for JsonReporter {
    fn new_period(&self, period_id: &str, starts: DateTime<Utc>) {
        tracing::info!(period_id, starts = %starts, "new period");
    }

    fn new_event(&self, scheme: &str, event_id: u64, at: DateTime<Utc>, duration: TimeDelta) {
        tracing::info!(scheme, event_id, at = %at, duration = %duration, "new event");
    }

    fn period_gap(&self, period_id: &str, from_previous: TimeDelta, to_next: TimeDelta) {
        if !gap_millis(from_previous) && !gap_millis(to_next) {
            return;
        }
        if from_previous > TimeDelta::milliseconds(10) || to_next > TimeDelta::milliseconds(10) {
            tracing::warn!(period_id, from_previous = %from_previous, to_next = %to_next, "period gap");
        } else {
            tracing::info!(period_id, from_previous = %from_previous, to_next = %to_next, "period gap");
        }
    }

    fn track_alignment_offset(&self, offset_diff: f64, adaptation_set: &str, period_id: &str) {
        tracing::warn!(offset_diff, adaptation_set, period_id, "track alignment offset");
    }

    fn no_update(&self, since: TimeDelta) {
        tracing::warn!(since = %since, "no update");
    }

    fn manifest(&self, log: &ManifestLog) {
        match serde_json::to_string(log) {
            Ok(json) => tracing::info!(manifest = %json, "manifest"),
            Err(e) => tracing::error!("render manifest log: {e}"),
        }
    }
}
