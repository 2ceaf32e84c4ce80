//! Replay of a recording as captured: stored manifests are served
//! time-shifted (and looped once the recording end lies in the past), with
//! presentation offsets and base URLs adjusted but the timeline untouched.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{ReliveError, ReliveResult};
use crate::looper::read_storage_meta;
use crate::mpd::edit::rebase_periods;
use crate::mpd::walk::{availability_start, period_start_offset, template_extent};
use crate::mpd::{XsDuration, MPD};
use crate::recording::{max_mpd_gap, HistoryElement, LoopMeta, HISTORY_MIN};
use crate::storage::{parse_manifest_name, StorageMeta, MANIFEST_DIR};
use crate::timing::{round, round_to_secs, short_time};

pub struct StreamReplay {
    dump_dir: PathBuf,
    manifest_dir: PathBuf,
    original_base_url: Option<Url>,
    storage_meta: StorageMeta,
    /// The recording end lies in the past; wrap around instead of
    /// following it live.
    is_past: bool,
    history: Vec<HistoryElement>,
    history_start: Option<DateTime<Utc>>,
    history_end: Option<DateTime<Utc>>,
}

impl StreamReplay {
    pub fn new(dump_dir: impl Into<PathBuf>) -> ReliveResult<Self> {
        let dump_dir = dump_dir.into();
        let (storage_meta, original_base_url) = read_storage_meta(&dump_dir);
        Ok(StreamReplay {
            manifest_dir: dump_dir.join(MANIFEST_DIR),
            dump_dir,
            original_base_url,
            storage_meta,
            is_past: false,
            history: Vec::new(),
            history_start: None,
            history_end: None,
        })
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    pub fn is_past(&self) -> bool {
        self.is_past
    }

    /// Load a finished recording for looped replay.
    pub fn load_archive(&mut self) -> ReliveResult<()> {
        self.fill_data()?;
        if self.history.len() < HISTORY_MIN {
            return Err(ReliveError::NotEnoughManifests(self.history.len()));
        }
        self.is_past = true;
        self.show_stats();
        Ok(())
    }

    /// Register a manifest as it is being captured (on-the-fly timeshift).
    pub fn add_manifest(&mut self, filepath: &Path, at: DateTime<Utc>) {
        let filename = filepath
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.history.push(HistoryElement { at, filename });
    }

    /// Scan the manifest directory into the history, dropping everything
    /// before a capture gap, and establish the recorded sample range from
    /// the first and last manifest.
    fn fill_data(&mut self) -> ReliveResult<()> {
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
                        "too large a gap between {} and {}, dropping",
                        last.format("%H:%M:%S"),
                        ctime.format("%H:%M:%S")
                    );
                    self.history.clear();
                }
            }
            last_time = Some(ctime);
            self.history.push(HistoryElement { at: ctime, filename: name });
        }
        if self.history.is_empty() {
            return Err(ReliveError::NotEnoughManifests(0));
        }

        let first_at = self.history[0].at;
        let first = self.load_manifest_at(first_at)?;
        let first_range = pts_range(&first, "video/mp4");
        let last_at = self.history[self.history.len() - 1].at;
        let last = self.load_manifest_at(last_at)?;
        let last_range = pts_range(&last, "video/mp4");

        if let Some((ff, fl)) = first_range {
            debug!(
                "start {} {}-{}",
                short_time(first_at),
                round(first_at - ff),
                round(first_at - fl)
            );
            self.history_start = Some(fl);
        }
        if let Some((lf, ll)) = last_range {
            debug!(
                "end {} {}-{}",
                short_time(last_at),
                round(last_at - lf),
                round(last_at - ll)
            );
            self.history_end = Some(ll);
        }
        Ok(())
    }

    /// The newest history element at or before `want`.
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

    fn recording_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.history.first()?.at, self.history.last()?.at))
    }

    /// Loop placement; the loop length comes from the observed sample
    /// range, the start from the first capture.
    fn loop_meta(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> Option<LoopMeta> {
        let (start, _) = self.recording_range()?;
        let length = self.history_end? - self.history_start?;
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

    /// Shift each period's start by `shift` and re-base its URL for
    /// serving. The manifest is freshly loaded, so mutating it is fine.
    pub fn adjust_mpd(&self, mpd: &mut MPD, shift: TimeDelta, local_media: bool) {
        for period in &mut mpd.periods {
            if let Some(start) = period.start {
                period.start = Some(XsDuration(start.delta() + shift));
            }
        }
        rebase_periods(mpd, self.original_base_url.as_ref(), local_media);
    }

    fn load_manifest_at(&self, at: DateTime<Utc>) -> ReliveResult<MPD> {
        let source = self.find_history(at).ok_or(ReliveError::NoHistory)?;
        let raw = fs::read_to_string(&source.filename)?;
        crate::mpd::parse(&raw)
    }

    /// Replay the archive wrapped modulo its length: serve the stored
    /// manifest at the loop position, time-shifted to now.
    pub fn get_looped(&self, at: DateTime<Utc>, _now: DateTime<Utc>) -> ReliveResult<String> {
        let meta = self.loop_meta(at, at).ok_or(ReliveError::NoHistory)?;
        info!(
            "offset: {} timeshift: {} loop duration: {} loop start: {} original at {}",
            round_to_secs(meta.offset),
            round_to_secs(meta.shift),
            round_to_secs(meta.length),
            short_time(meta.start),
            short_time(meta.start + meta.offset)
        );
        let mut mpd = self.load_manifest_at(meta.start + meta.offset)?;
        self.adjust_mpd(&mut mpd, meta.shift, self.storage_meta.have_media);
        mpd.to_xml()
    }

    /// Non-looped replay: the stored manifest closest to `at - shift`,
    /// with every period start moved by `shift`.
    pub fn get_archived(&self, shift: TimeDelta, at: DateTime<Utc>) -> ReliveResult<String> {
        let mut mpd = self.load_manifest_at(at - shift)?;
        // Must stay constant across the updates of one session.
        self.adjust_mpd(&mut mpd, shift, self.storage_meta.have_media);
        debug!("move period: {shift}");
        mpd.to_xml()
    }

    pub fn show_stats(&self) {
        let Some((first, last)) = self.recording_range() else {
            return;
        };
        info!("original source: {}", self.storage_meta.manifest_url);
        info!(
            "recorded {} manifests from {} to {} ({})",
            self.history.len(),
            first.format("%H:%M:%S"),
            last.format("%H:%M:%S"),
            last - first,
        );
    }
}

/// Earliest and latest presentation time across all tracks of the given
/// mime type.
fn pts_range(mpd: &MPD, mime_type: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let ast = availability_start(mpd);
    let mut earliest: Option<DateTime<Utc>> = None;
    let mut latest: Option<DateTime<Utc>> = None;
    for period in &mpd.periods {
        let period_start = ast + period_start_offset(period);
        for set in &period.adaptation_sets {
            if set.mime_type.as_deref() != Some(mime_type) {
                continue;
            }
            let extent = set
                .segment_template
                .as_ref()
                .and_then(|st| template_extent(st, period_start))
                .or_else(|| {
                    set.representations
                        .iter()
                        .find_map(|r| r.segment_template.as_ref())
                        .and_then(|st| template_extent(st, period_start))
                });
            if let Some((from, to)) = extent {
                earliest = Some(earliest.map_or(from, |e| e.min(from)));
                latest = Some(latest.map_or(to, |l| l.max(to)));
            }
        }
    }
    earliest.zip(latest)
}

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
    use crate::storage::{self, StorageMeta};
    use chrono::TimeZone;

    fn write_manifest(dir: &Path, at: DateTime<Utc>, first_tick: u64) {
        let xml = format!(
            r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="2025-03-01T10:00:00Z">
              <Period id="p0" start="PT0S">
                <BaseURL>dash/</BaseURL>
                <AdaptationSet id="1" mimeType="video/mp4">
                  <SegmentTemplate media="$Time$.m4s" timescale="10">
                    <SegmentTimeline><S t="{first_tick}" d="10" r="24"/></SegmentTimeline>
                  </SegmentTemplate>
                  <Representation id="v0" bandwidth="1000"/>
                </AdaptationSet>
              </Period>
            </MPD>"#
        );
        std::fs::write(
            dir.join(MANIFEST_DIR).join(storage::manifest_filename(at)),
            xml,
        )
        .unwrap();
    }

    fn fixture(gap_after: Option<usize>) -> (tempfile::TempDir, StreamReplay) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(MANIFEST_DIR)).unwrap();
        storage::write_meta(
            dir.path(),
            &StorageMeta {
                manifest_url: "https://origin.example.com/ch/manifest.mpd".to_string(),
                have_media: true,
            },
        )
        .unwrap();
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut at = start;
        for i in 0..30usize {
            if gap_after == Some(i) {
                at += TimeDelta::seconds(45);
            }
            write_manifest(dir.path(), at, i as u64 * 50);
            at += TimeDelta::seconds(5);
        }
        let replay = StreamReplay::new(dir.path()).unwrap();
        (dir, replay)
    }

    #[test]
    fn archive_load_establishes_the_sample_range() {
        let (_dir, mut replay) = fixture(None);
        replay.load_archive().unwrap();
        assert!(replay.is_past());
        assert_eq!(replay.history.len(), 30);
        let ast = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        // Last sample of the first manifest: tick 0 + 25 segments.
        assert_eq!(replay.history_start, Some(ast + TimeDelta::seconds(25)));
        // Last manifest starts at tick 1450, plus 25 segments.
        assert_eq!(
            replay.history_end,
            Some(ast + TimeDelta::seconds(145 + 25))
        );
    }

    #[test]
    fn capture_gap_truncates_the_history() {
        let (_dir, mut replay) = fixture(Some(15));
        replay.load_archive().unwrap();
        // Files before the gap are gone.
        assert_eq!(replay.history.len(), 15);
        assert_eq!(
            replay.history[0].at,
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 2, 0).unwrap()
        );
    }

    #[test]
    fn archived_replay_shifts_period_starts() {
        let (_dir, mut replay) = fixture(None);
        replay.load_archive().unwrap();
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let shift = TimeDelta::try_hours(1).unwrap() + TimeDelta::seconds(30);
        let xml = replay.get_archived(shift, at).unwrap();
        let mpd = crate::mpd::parse(&xml).unwrap();
        // The period start of the stored manifest moves by the time shift.
        assert_eq!(
            mpd.periods[0].start,
            Some(XsDuration(shift))
        );
        // Base URL is rewritten to a local path because media is mirrored.
        assert_eq!(mpd.periods[0].base_urls[0].base, "ch/dash/");
    }

    #[test]
    fn looped_replay_wraps_modulo_the_sample_range() {
        let (_dir, mut replay) = fixture(None);
        replay.load_archive().unwrap();
        // Sample range spans 145 s; far in the future the offset wraps.
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
            + TimeDelta::seconds(145 * 3 + 20);
        let xml = replay.get_looped(at, at).unwrap();
        let mpd = crate::mpd::parse(&xml).unwrap();
        // The manifest picked is the one 20 s into the recording, its
        // period start shifted by three loop lengths.
        assert_eq!(
            mpd.periods[0].start,
            Some(XsDuration(TimeDelta::seconds(145 * 3)))
        );
    }

    #[test]
    fn too_few_manifests_fail_the_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(MANIFEST_DIR)).unwrap();
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        for i in 0..3 {
            write_manifest(dir.path(), start + TimeDelta::seconds(i * 5), 0);
        }
        let mut replay = StreamReplay::new(dir.path()).unwrap();
        assert!(matches!(
            replay.load_archive(),
            Err(ReliveError::NotEnoughManifests(3))
        ));
    }
}
