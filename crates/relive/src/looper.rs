//! Indefinite replay of a finite recording: synthesizes a live-looking
//! manifest from the aggregate timeline, wrapping around the archive end.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ReliveError, ReliveResult};
use crate::mpd::edit::{append_segment, merge_mpd, rebase_periods, shift_pto};
use crate::mpd::walk::{availability_start, period_start_offset};
use crate::mpd::{SegmentTimeline, XsDuration, MPD};
use crate::recording::{Recording, HISTORY_MIN};
use crate::storage::{self, StorageMeta, MANIFEST_DIR};
use crate::timing::{duration_to_ticks, round_to_secs, short_time, ticks_to_duration};

/// Size of the timeshift window presented to clients.
/// Should come from the recorded manifest; fixed from testing for now.
fn timeshift_window() -> TimeDelta {
    TimeDelta::seconds(25)
}

/// Nominal segment duration of the recorded stream.
fn segment_size() -> TimeDelta {
    TimeDelta::milliseconds(1920)
}

pub struct StreamLooper {
    dump_dir: PathBuf,
    recording: Recording,
    original_base_url: Option<Url>,
    storage_meta: StorageMeta,
}

impl StreamLooper {
    /// Load a recording for looping. Fails when fewer than
    /// [`HISTORY_MIN`] manifests survived the gap checks.
    pub fn new(dump_dir: impl Into<PathBuf>) -> ReliveResult<Self> {
        let dump_dir = dump_dir.into();
        let mut recording = Recording::new(dump_dir.join(MANIFEST_DIR));
        recording.load()?;
        if recording.len() < HISTORY_MIN {
            return Err(ReliveError::NotEnoughManifests(recording.len()));
        }

        let (storage_meta, original_base_url) = read_storage_meta(&dump_dir);
        recording.show_stats();
        Ok(StreamLooper {
            dump_dir,
            recording,
            original_base_url,
            storage_meta,
        })
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    /// Rebuild a single-period manifest from the aggregate timeline.
    ///
    /// `pts_shift` moves all presentation times, `period_start` becomes the
    /// period's start on the new wall timeline, and only segments whose
    /// shifted span ends within `[from, to]` are included.
    pub fn build_mpd(
        &self,
        pts_shift: TimeDelta,
        id: &str,
        period_start: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ReliveResult<MPD> {
        let source = self
            .recording
            .original_mpd
            .as_ref()
            .ok_or(ReliveError::NoHistory)?;
        let period = source.periods.first().ok_or(ReliveError::NoPeriods)?;

        let mut out = source.clone();
        out.periods.clear();
        if period.adaptation_sets.is_empty() {
            return Ok(out);
        }

        let ast = availability_start(source);
        let mut new_period = period.clone();

        // Delta applied to all presentation time offsets so that segment
        // ticks and event times line up under the new wall timeline.
        let mut effective_pts_shift = TimeDelta::zero();
        if period.start.is_some() {
            let original_start = period_start_offset(period);
            effective_pts_shift = (period_start - ast) - original_start - pts_shift;
            debug!(
                "org and effective pts shift: {pts_shift} {effective_pts_shift}, period start {}",
                period_start - ast
            );
            new_period.start = Some(XsDuration(period_start - ast));
        }
        if period.id.is_some() {
            new_period.id = Some(id.to_string());
        }

        new_period.adaptation_sets.clear();
        for (index, set) in period.adaptation_sets.iter().enumerate() {
            let Some(st) = set
                .segment_template
                .as_ref()
                .filter(|st| st.segment_timeline.is_some())
            else {
                continue;
            };
            let Some(track) = self.recording.tracks.get(index) else {
                continue;
            };

            let mut new_set = set.clone();
            let mut new_st = st.clone();
            let mut timeline = SegmentTimeline::default();

            shift_pto(&mut new_st, effective_pts_shift);
            let timescale = new_st.timescale.unwrap_or(1);
            let pto = new_st.presentation_time_offset.unwrap_or(0);

            let mut first = true;
            for (tick, duration) in track.ticks() {
                let start = period_start + ticks_to_duration(tick - pto as i64, timescale);
                let span_end = start + ticks_to_duration(duration, timescale);
                // Inclusive at `to` so the final segment of a loop pass ends
                // exactly on the wrap point and the seam stays continuous.
                if span_end >= from && span_end <= to {
                    let t = if first { tick as u64 } else { 0 };
                    first = false;
                    append_segment(&mut timeline, t, duration as u64, 0);
                }
            }
            new_st.segment_timeline = if timeline.segments.is_empty() {
                None
            } else {
                Some(timeline)
            };
            new_set.segment_template = Some(new_st);
            new_period.adaptation_sets.push(new_set);
        }

        new_period.event_streams.clear();
        for stream in self.recording.event_streams.values() {
            let mut new_stream = stream.clone();
            let timescale = new_stream.timescale.unwrap_or(1);
            let pto = (new_stream.presentation_time_offset.unwrap_or(0) as i64
                + duration_to_ticks(effective_pts_shift, timescale)) as u64;
            new_stream.presentation_time_offset = Some(pto);
            let scheme = new_stream.scheme_id_uri.clone().unwrap_or_default();
            new_stream.events.retain(|event| {
                let start = period_start
                    + ticks_to_duration(
                        event.presentation_time.unwrap_or(0) as i64 - pto as i64,
                        timescale,
                    );
                let end = start + ticks_to_duration(event.duration.unwrap_or(0) as i64, timescale);
                if start > to {
                    debug!(
                        "skip event {scheme} {} at {} in the future of {}",
                        event.id.unwrap_or(0),
                        short_time(start),
                        short_time(to)
                    );
                    return false;
                }
                if from > end {
                    debug!(
                        "skip event {scheme} {} ends {} before {}",
                        event.id.unwrap_or(0),
                        short_time(end),
                        short_time(from)
                    );
                    return false;
                }
                debug!(
                    "add event {scheme} {} at {}-{}",
                    event.id.unwrap_or(0),
                    short_time(start),
                    short_time(end)
                );
                true
            });
            if !new_stream.events.is_empty() {
                new_period.event_streams.push(new_stream);
            }
        }

        out.periods.push(new_period);
        Ok(out)
    }

    /// The live-looking manifest for virtual time `at`, requested at `now`.
    /// Around the loop seam this stitches the previous loop's tail to the
    /// current loop's head as two periods.
    pub fn get_looped(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> ReliveResult<String> {
        let meta = self
            .recording
            .loop_meta(at, now)
            .ok_or(ReliveError::NoHistory)?;
        info!(
            "offset: {} timeshift: {} loop duration: {} loop start: {} at {}",
            round_to_secs(meta.offset),
            round_to_secs(meta.shift),
            round_to_secs(meta.length),
            short_time(meta.start),
            short_time(at)
        );

        let loops = |shift: TimeDelta| {
            (shift.num_nanoseconds().unwrap_or(0)
                / meta.length.num_nanoseconds().unwrap_or(1).max(1))
        };

        let mut current = if meta.offset < timeshift_window() {
            // Just past the loop point: the tail of the previous pass still
            // fills the timeshift buffer.
            debug!("loop point: {}", short_time(meta.start + meta.shift));
            let previous = self.build_mpd(
                meta.shift - meta.length,
                &format!("Id-{}", loops(meta.shift) - 1),
                meta.start + meta.shift - meta.length,
                now - timeshift_window(),
                meta.start + meta.shift,
            )?;
            let head = if meta.offset > segment_size() {
                Some(self.build_mpd(
                    meta.shift,
                    &format!("Id-{}", loops(meta.shift)),
                    meta.start + meta.shift,
                    meta.start + meta.shift,
                    now,
                )?)
            } else {
                None
            };
            merge_mpd(Some(previous), head).expect("previous period present")
        } else {
            self.build_mpd(
                meta.shift,
                &format!("Id-{}", loops(meta.shift)),
                meta.start + meta.shift,
                now - timeshift_window(),
                now,
            )?
        };

        rebase_periods(
            &mut current,
            self.original_base_url.as_ref(),
            self.storage_meta.have_media,
        );
        current.to_xml()
    }

    /// The whole recording as a static (VOD) manifest.
    pub fn get_static(&self) -> ReliveResult<String> {
        let (start, end) = self
            .recording
            .timeline_range()
            .ok_or(ReliveError::NoHistory)?;
        let duration = end - start;
        let source = self
            .recording
            .original_mpd
            .as_ref()
            .ok_or(ReliveError::NoHistory)?;
        let ast = availability_start(source);
        debug!(
            "start {} end {} duration {} shift {}",
            short_time(start),
            short_time(end),
            round_to_secs(duration),
            start - ast
        );

        let now = Utc::now();
        let mut out = self.build_mpd(-(start - ast), "ID-0", ast, ast, now)?;
        out.availability_start_time = None;
        out.mpd_type = Some("static".to_string());
        out.time_shift_buffer_depth = None;
        out.suggested_presentation_delay = None;
        out.minimum_update_period = None;
        out.media_presentation_duration = Some(XsDuration(duration));
        if let Some(period) = out.periods.first_mut() {
            period.duration = Some(XsDuration(duration));
        }
        rebase_periods(
            &mut out,
            self.original_base_url.as_ref(),
            self.storage_meta.have_media,
        );
        out.to_xml()
    }
}

/// Read `meta.json`, deriving the directory the original manifest lived in.
/// Both are best-effort; replay without them just serves origin URLs.
pub(crate) fn read_storage_meta(dump_dir: &Path) -> (StorageMeta, Option<Url>) {
    match storage::read_meta(dump_dir) {
        Ok(meta) => {
            let base = Url::parse(&meta.manifest_url)
                .ok()
                .map(|url| crate::mpd::walk::directory(&url));
            (meta, base)
        }
        Err(e) => {
            warn!(dir = %dump_dir.display(), "read metadata: {e}");
            (StorageMeta::default(), None)
        }
    }
}
