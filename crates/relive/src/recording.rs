//! The append-only model of everything a recorded stream ever advertised:
//! per-track segment history, deduplicated event streams and the capture
//! timeline of stored manifests.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, trace, warn};

use crate::error::{ReliveError, ReliveResult};
use crate::mpd::walk::{availability_start, expand_timeline};
use crate::mpd::{EventStream, MPD};
use crate::storage::parse_manifest_name;
use crate::timing::ticks_to_duration;

/// Maximum wall-clock gap between consecutive captured manifests before the
/// history before the gap is discarded.
pub fn max_mpd_gap() -> TimeDelta {
    TimeDelta::seconds(30)
}

/// A replayable recording needs at least this many manifests.
pub const HISTORY_MIN: usize = 10;

/// Metadata about one stored manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryElement {
    pub at: DateTime<Utc>,
    pub filename: String,
}

/// One run of segments with equal duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Element {
    pub d: i64,
    pub r: i64,
}

/// Every segment ever observed for one adaptation set, as run-length
/// entries plus the `[start, end)` tick bounds.
#[derive(Debug, Default)]
pub struct AggregateTrack {
    pub(crate) elements: Vec<Element>,
    start: i64,
    end: i64,
}

impl AggregateTrack {
    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Append a segment run starting at tick `t`.
    ///
    /// Ticks below the current end are re-observations and are ignored;
    /// ticks above it are a discontinuity and fail. Only `t == end` extends
    /// the track, coalescing with the last run when the duration matches.
    pub fn append(&mut self, t: i64, d: i64, r: i64) -> ReliveResult<()> {
        if self.elements.is_empty() {
            self.start = t;
            self.end = t;
        }
        if t < self.end {
            return Ok(());
        }
        if t > self.end {
            return Err(ReliveError::NonContiguous {
                gap: t - self.end,
                end: self.end,
            });
        }
        match self.elements.last_mut() {
            Some(last) if last.d == d => last.r += r + 1,
            _ => self.elements.push(Element { d, r }),
        }
        self.end += d * (r + 1);
        Ok(())
    }

    /// Expanded `(tick, duration)` pairs, starting at [`Self::start`].
    pub fn ticks(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        let mut tick = self.start;
        self.elements
            .iter()
            .flat_map(|e| std::iter::repeat(e.d).take((e.r + 1).max(0) as usize))
            .map(move |d| {
                let item = (tick, d);
                tick += d;
                item
            })
    }
}

/// The persistent aggregate built from a stream of manifest snapshots.
pub struct Recording {
    manifest_dir: PathBuf,
    pub(crate) history: Vec<HistoryElement>,
    pub(crate) original_mpd: Option<MPD>,
    /// One aggregate per adaptation set, positionally matched against the
    /// first manifest's first period.
    pub(crate) tracks: Vec<AggregateTrack>,
    /// Deduplicated event streams, keyed by scheme URI.
    pub(crate) event_streams: BTreeMap<String, EventStream>,
}

/// Loop placement for a replay request: where in the archive to play from
/// and how far to shift all presentation times.
#[derive(Debug, Clone, Copy)]
pub struct LoopMeta {
    /// Position inside the recording, from its start.
    pub offset: TimeDelta,
    /// Added to all presentation times to make the archive appear live.
    pub shift: TimeDelta,
    /// Length of one loop through the archive.
    pub length: TimeDelta,
    /// Wall-clock start of the recording.
    pub start: DateTime<Utc>,
}

impl Recording {
    pub fn new(manifest_dir: impl Into<PathBuf>) -> Self {
        Recording {
            manifest_dir: manifest_dir.into(),
            history: Vec::new(),
            original_mpd: None,
            tracks: Vec::new(),
            event_streams: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Read every stored manifest in filename order and aggregate it.
    ///
    /// A capture gap larger than [`max_mpd_gap`] discards everything before
    /// it: history, tracks and events are rebuilt from the far side so the
    /// aggregate stays contiguous.
    pub fn load(&mut self) -> ReliveResult<()> {
        let mut names: Vec<String> = fs::read_dir(&self.manifest_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        let mut last_time: Option<DateTime<Utc>> = None;
        for name in names {
            trace!(file = %name, "scan");
            let Some(ctime) = parse_manifest_name(&name) else {
                warn!(file = %name, "not a manifest filename, skipping");
                continue;
            };
            if let Some(last) = last_time {
                if ctime - last > max_mpd_gap() {
                    error!(
                        "too large a gap between {} and {}, dropping history before it",
                        last.format("%H:%M:%S"),
                        ctime.format("%H:%M:%S")
                    );
                    self.history.clear();
                    self.tracks.clear();
                    self.event_streams.clear();
                    self.original_mpd = None;
                }
            }
            last_time = Some(ctime);
            self.history.push(HistoryElement {
                at: ctime,
                filename: name.clone(),
            });
            let mpd = match self.load_manifest_at(ctime) {
                Ok(mpd) => mpd,
                Err(e) => {
                    error!(file = %name, "load manifest: {e}");
                    continue;
                }
            };
            if let Err(e) = self.add_mpd(&mpd) {
                error!(file = %name, "add manifest: {e}");
                break;
            }
        }

        if let Some(mpd) = &self.original_mpd {
            for (index, track) in self.tracks.iter().enumerate() {
                let Some(set) = mpd.periods[0].adaptation_sets.get(index) else {
                    continue;
                };
                let timescale = set
                    .segment_template
                    .as_ref()
                    .and_then(|st| st.timescale)
                    .unwrap_or(1);
                info!(
                    "{}: {} {}-{} duration {}",
                    track.elements.len(),
                    set.mime_type.as_deref().unwrap_or(""),
                    track.start,
                    track.end,
                    ticks_to_duration(track.end - track.start, timescale)
                );
            }
        }
        for (scheme, stream) in &self.event_streams {
            info!("events: {scheme}: {}", stream.events.len());
        }
        Ok(())
    }

    /// Fold one manifest into the aggregate. The first manifest is retained
    /// as the skeleton for replay synthesis.
    pub fn add_mpd(&mut self, mpd: &MPD) -> ReliveResult<()> {
        if mpd.periods.is_empty() {
            return Err(ReliveError::NoPeriods);
        }
        if mpd.periods.len() > 1 {
            return Err(ReliveError::MultiPeriod);
        }
        let period = &mpd.periods[0];
        for (index, set) in period.adaptation_sets.iter().enumerate() {
            if index >= self.tracks.len() {
                self.tracks.push(AggregateTrack::default());
            }
            let track = &mut self.tracks[index];
            if let Some(timeline) = set
                .segment_template
                .as_ref()
                .and_then(|st| st.segment_timeline.as_ref())
            {
                for (t, d) in expand_timeline(timeline) {
                    track.append(t as i64, d as i64, 0)?;
                }
            }
        }
        for stream in &period.event_streams {
            let Some(scheme) = stream.scheme_id_uri.clone() else {
                continue;
            };
            let have = self.event_streams.entry(scheme.clone()).or_insert_with(|| {
                let mut empty = stream.clone();
                empty.events.clear();
                empty
            });
            for incoming in &stream.events {
                let known = have.events.iter().any(|e| {
                    e.id == incoming.id
                        && e.presentation_time.unwrap_or(0)
                            == incoming.presentation_time.unwrap_or(0)
                });
                if known {
                    trace!(
                        "event already recorded: {:?}@{:?}",
                        incoming.id,
                        incoming.presentation_time
                    );
                    continue;
                }
                debug!(
                    "add event {scheme}: {:?}@{:?}",
                    incoming.id, incoming.presentation_time
                );
                let mut event = incoming.clone();
                event.content = None;
                have.events.push(event);
            }
        }
        if self.original_mpd.is_none() {
            self.original_mpd = Some(mpd.clone());
        }
        Ok(())
    }

    /// The newest history element at or before `want`, with its filename
    /// expanded to a full path.
    pub fn find_history(&self, want: DateTime<Utc>) -> Option<HistoryElement> {
        find_sub(&self.history, want).map(|found| HistoryElement {
            at: found.at,
            filename: self
                .manifest_dir
                .join(&found.filename)
                .to_string_lossy()
                .into_owned(),
        })
    }

    /// Load the stored manifest covering `at`.
    pub fn load_manifest_at(&self, at: DateTime<Utc>) -> ReliveResult<MPD> {
        let source = self.find_history(at).ok_or(ReliveError::NoHistory)?;
        let raw = fs::read_to_string(&source.filename)?;
        crate::mpd::parse(&raw)
    }

    /// First and last sample time across all tracks, computed from the
    /// aggregate tick bounds of the first period.
    pub fn timeline_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mpd = self.original_mpd.as_ref()?;
        let period = mpd.periods.first()?;
        let ast = availability_start(mpd);
        let mut from: Option<DateTime<Utc>> = None;
        let mut to: Option<DateTime<Utc>> = None;
        for (index, set) in period.adaptation_sets.iter().enumerate() {
            let Some(track) = self.tracks.get(index) else {
                continue;
            };
            let timescale = set
                .segment_template
                .as_ref()
                .and_then(|st| st.timescale)
                .unwrap_or(1);
            let first = ast + ticks_to_duration(track.start, timescale);
            let last = ast + ticks_to_duration(track.end, timescale);
            from = Some(from.map_or(first, |f| f.min(first)));
            to = Some(to.map_or(last, |t| t.max(last)));
        }
        from.zip(to)
    }

    /// Capture times of the first and last stored manifest.
    pub fn recording_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.history.first()?.at, self.history.last()?.at))
    }

    /// Place a virtual play position `at`, requested at wall-clock `now`,
    /// into the loop. Invariant: `start + offset + shift == now`, and the
    /// chosen point in the archive is `start + offset`.
    pub fn loop_meta(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> Option<LoopMeta> {
        let (start, end) = self.recording_range()?;
        let length = end - start;
        if length <= TimeDelta::zero() {
            return None;
        }
        let length_ns = length.num_nanoseconds()?;
        let offset =
            TimeDelta::nanoseconds((at - start).num_nanoseconds()?.rem_euclid(length_ns));
        let shift = (now - offset) - start;
        Some(LoopMeta {
            offset,
            shift,
            length,
            start,
        })
    }

    pub fn show_stats(&self) {
        if let Some((first, last)) = self.recording_range() {
            info!(
                "recorded {} manifests from {} to {} ({})",
                self.history.len(),
                first.format("%H:%M:%S"),
                last.format("%H:%M:%S"),
                last - first,
            );
        }
    }
}

/// Binary search for the newest element at or before `want`.
fn find_sub(history: &[HistoryElement], want: DateTime<Utc>) -> Option<&HistoryElement> {
    if history.is_empty() {
        return None;
    }
    if history.len() == 1 {
        return if want < history[0].at {
            None
        } else {
            Some(&history[0])
        };
    }
    let pivot = history.len() / 2;
    if want < history[pivot].at {
        find_sub(&history[..pivot], want)
    } else {
        find_sub(&history[pivot..], want)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpd::parse;
    use chrono::TimeZone;

    fn manifest(timeline: &str) -> MPD {
        let xml = format!(
            r#"<MPD type="dynamic" availabilityStartTime="2025-03-01T09:00:00Z">
              <Period id="p0" start="PT0S">
                <AdaptationSet mimeType="video/mp4">
                  <SegmentTemplate media="$Time$.m4s" timescale="10">
                    <SegmentTimeline>{timeline}</SegmentTimeline>
                  </SegmentTemplate>
                  <Representation id="v0" bandwidth="1000"/>
                </AdaptationSet>
              </Period>
            </MPD>"#
        );
        parse(&xml).unwrap()
    }

    #[test]
    fn track_append_enforces_monotone_extension() {
        let mut track = AggregateTrack::default();
        track.append(100, 10, 2).unwrap();
        assert_eq!((track.start(), track.end()), (100, 130));
        // Re-observation below end is ignored.
        track.append(110, 10, 0).unwrap();
        assert_eq!(track.end(), 130);
        // Gap above end is an error.
        let err = track.append(150, 10, 0).unwrap_err();
        assert!(matches!(
            err,
            ReliveError::NonContiguous { gap: 20, end: 130 }
        ));
        // Exact extension grows the track.
        track.append(130, 10, 0).unwrap();
        assert_eq!(track.end(), 140);
    }

    #[test]
    fn constant_duration_collapses_to_one_entry() {
        let mut track = AggregateTrack::default();
        for i in 0..6 {
            track.append(100 + i * 10, 10, 0).unwrap();
        }
        assert_eq!(track.elements.len(), 1);
        assert_eq!(track.elements[0].r, 5);
        let ticks: Vec<_> = track.ticks().map(|(t, _)| t).collect();
        assert_eq!(ticks, vec![100, 110, 120, 130, 140, 150]);
    }

    #[test]
    fn two_updates_aggregate_into_one_run() {
        // Scenario: S(t=100, d=10, r=2) then, one poll later, S(t=130, d=10, r=2).
        let mut recording = Recording::new("unused");
        recording
            .add_mpd(&manifest(r#"<S t="100" d="10" r="2"/>"#))
            .unwrap();
        recording
            .add_mpd(&manifest(r#"<S t="130" d="10" r="2"/>"#))
            .unwrap();
        let track = &recording.tracks[0];
        assert_eq!((track.start(), track.end()), (100, 160));
        assert_eq!(track.elements.len(), 1);
        assert_eq!(track.elements[0], Element { d: 10, r: 5 });
    }

    #[test]
    fn overlapping_update_is_idempotent() {
        let mut recording = Recording::new("unused");
        recording
            .add_mpd(&manifest(r#"<S t="100" d="10" r="2"/>"#))
            .unwrap();
        recording
            .add_mpd(&manifest(r#"<S t="100" d="10" r="5"/>"#))
            .unwrap();
        let track = &recording.tracks[0];
        assert_eq!((track.start(), track.end()), (100, 160));
    }

    #[test]
    fn events_deduplicate_by_id_and_time() {
        let xml = r#"<MPD type="dynamic" availabilityStartTime="2025-03-01T09:00:00Z">
          <Period id="p0" start="PT0S">
            <AdaptationSet mimeType="video/mp4">
              <SegmentTemplate media="$Time$.m4s" timescale="10">
                <SegmentTimeline><S t="0" d="10"/></SegmentTimeline>
              </SegmentTemplate>
            </AdaptationSet>
            <EventStream schemeIdUri="urn:scte:scte35:2014:xml+bin" timescale="10">
              <Event id="1" presentationTime="100" duration="50">payload</Event>
              <Event id="1" presentationTime="100"/>
              <Event id="2" presentationTime="100"/>
            </EventStream>
          </Period>
        </MPD>"#;
        let mut recording = Recording::new("unused");
        let mpd = parse(xml).unwrap();
        recording.add_mpd(&mpd).unwrap();
        recording.add_mpd(&mpd).unwrap();
        let stream = &recording.event_streams["urn:scte:scte35:2014:xml+bin"];
        assert_eq!(stream.events.len(), 2);
        // Content is dropped after deduplication.
        assert!(stream.events.iter().all(|e| e.content.is_none()));
    }

    #[test]
    fn multiperiod_is_rejected() {
        let xml = r#"<MPD><Period id="a"/><Period id="b"/></MPD>"#;
        let mut recording = Recording::new("unused");
        assert!(matches!(
            recording.add_mpd(&parse(xml).unwrap()),
            Err(ReliveError::MultiPeriod)
        ));
    }

    #[test]
    fn loop_meta_invariant_holds() {
        let mut recording = Recording::new("unused");
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        for i in 0..7 {
            recording.history.push(HistoryElement {
                at: start + TimeDelta::seconds(i * 10),
                filename: format!("m{i}"),
            });
        }
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 5).unwrap();
        let meta = recording.loop_meta(now, now).unwrap();
        assert_eq!(meta.start + meta.offset + meta.shift, now);
        assert!(meta.offset >= TimeDelta::zero() && meta.offset < meta.length);
        assert_eq!(meta.length, TimeDelta::seconds(60));
    }
}
