//! The live observer: polls a manifest URL, feeds the differ, walks the
//! advertised segments and drives a bounded pool of media fetch workers.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{CONTENT_TYPE, DATE, IF_MODIFIED_SINCE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::differ::MpdDiffer;
use crate::error::{ReliveError, ReliveResult};
use crate::fmp4;
use crate::metrics::PROCESSED;
use crate::mpd::walk::{
    availability_start, period_segment_limits, period_start_offset, template_extent,
    walk_segment_template_timings, walk_segment_urls,
};
use crate::mpd::{Period, MPD};
use crate::report::{
    CheckerReporter, Dur, ManifestLog, PeriodInfo, SpliceDirection, SpliceLog, TextReporter,
    TrackLog, TrackPeriodLog,
};
use crate::splice::SpliceList;
use crate::storage::{self, StorageMeta, MANIFEST_DIR};
use crate::timing::{round, round_to, round_to_secs, short_time, ticks_to_duration};

/// Maximum number of outstanding media requests.
pub const FETCH_QUEUE_SIZE: usize = 50_000;

/// Some sources discriminate by agent; default to a browser.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";

/// The one SCTE-35 event scheme handled by the splice tracking.
pub const SCHEME_SCTE35_XML: &str = "urn:scte:scte35:2014:xml+bin";

const CONNECT_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Tolerated difference between advertised and measured segment timing.
fn max_time_diff() -> TimeDelta {
    TimeDelta::milliseconds(1)
}

/// Media older than this relative to now is not fetched.
fn cut_segments_at() -> TimeDelta {
    TimeDelta::minutes(5)
}

/// Track gaps above this length make it into the walk report.
fn max_gap_log() -> TimeDelta {
    TimeDelta::milliseconds(100)
}

/// What to do with the media segments a manifest advertises. Each mode
/// subsumes the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FetchMode {
    /// Manifests only.
    #[default]
    NoFetch,
    /// `HEAD` every segment to prove it is reachable.
    Access,
    /// `GET` and cross-check container timing against the manifest.
    Verify,
    /// Additionally mirror the bodies below the dump directory.
    Store,
}

/// URL and advertised timing of one media segment awaiting fetch.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub url: Url,
    /// Advertised presentation time, from the period start.
    pub time: TimeDelta,
    pub duration: TimeDelta,
}

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Used in log fields only.
    pub name: String,
    pub source_url: Url,
    /// Persistence root; `None` disables storing.
    pub dump_base: Option<PathBuf>,
    pub poll_interval: StdDuration,
    pub fetch_mode: FetchMode,
    pub workers: usize,
    pub user_agent: String,
}

impl CheckerConfig {
    pub fn new(name: impl Into<String>, source_url: Url) -> Self {
        CheckerConfig {
            name: name.into(),
            source_url,
            dump_base: None,
            poll_interval: StdDuration::from_secs(5),
            fetch_mode: FetchMode::NoFetch,
            workers: 1,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct SessionInfo {
    #[serde(rename = "MediaUrl", default)]
    media_url: String,
}

pub struct StreamChecker {
    name: String,
    source_url: Url,
    dump_dir: Option<PathBuf>,
    manifest_dir: Option<PathBuf>,
    user_agent: String,
    poll_interval: StdDuration,
    fetch_mode: FetchMode,
    client: Client,
    queue: mpsc::Sender<Option<SegmentInfo>>,
    have: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    last_date: Option<String>,
    last_change: DateTime<Utc>,
    differ: MpdDiffer,
    splices: SpliceList,
    initial_period: Option<Period>,
    on_fetch: Vec<Box<dyn Fn(&Path, DateTime<Utc>) + Send + Sync>>,
    reporter: Arc<dyn CheckerReporter>,
}

impl StreamChecker {
    pub fn new(config: CheckerConfig) -> ReliveResult<Self> {
        Self::with_reporter(config, Arc::new(TextReporter))
    }

    pub fn with_reporter(
        config: CheckerConfig,
        reporter: Arc<dyn CheckerReporter>,
    ) -> ReliveResult<Self> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        let dump_dir = config
            .dump_base
            .as_deref()
            .map(|base| storage::versioned_dump_dir(base, &config.name, Utc::now().date_naive()))
            .transpose()?;
        let manifest_dir = dump_dir.as_ref().map(|dir| dir.join(MANIFEST_DIR));
        if let (Some(dump_dir), Some(manifest_dir)) = (&dump_dir, &manifest_dir) {
            info!("storing manifests in {}", dump_dir.display());
            fs::create_dir_all(manifest_dir)
                .map_err(|_| ReliveError::DumpDir(dump_dir.clone()))?;
            storage::write_meta(
                dump_dir,
                &StorageMeta {
                    manifest_url: config.source_url.to_string(),
                    have_media: config.fetch_mode >= FetchMode::Store,
                },
            )?;
        }

        let (queue, receiver) = mpsc::channel(FETCH_QUEUE_SIZE);
        let have = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = Vec::new();
        if config.fetch_mode >= FetchMode::Access {
            let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
            let worker = Arc::new(FetchWorker {
                client: client.clone(),
                fetch_mode: config.fetch_mode,
                dump_dir: dump_dir.clone(),
                user_agent: config.user_agent.clone(),
                have: have.clone(),
            });
            for _ in 0..config.workers.max(1) {
                workers.push(tokio::spawn(
                    worker.clone().run(receiver.clone()),
                ));
            }
        }

        let mut differ = MpdDiffer::new();
        {
            let reporter = reporter.clone();
            differ.add_on_new_period(move |mpd, period| {
                let period_start = availability_start(mpd) + period_start_offset(period);
                reporter.new_period(period.id.as_deref().unwrap_or_default(), period_start);
                check_period_borders(mpd, period, reporter.as_ref());
                check_track_alignment(period, reporter.as_ref());
            });
        }
        {
            let reporter = reporter.clone();
            differ.add_on_new_event(move |event, scheme, at, duration| {
                reporter.new_event(scheme, event.id.unwrap_or(0), at, duration);
            });
        }

        Ok(StreamChecker {
            name: config.name,
            source_url: config.source_url,
            dump_dir,
            manifest_dir,
            user_agent: config.user_agent,
            poll_interval: config.poll_interval,
            fetch_mode: config.fetch_mode,
            client,
            queue,
            have,
            cancel: CancellationToken::new(),
            workers,
            last_date: None,
            last_change: Utc::now(),
            differ,
            splices: SpliceList::default(),
            initial_period: None,
            on_fetch: Vec::new(),
            reporter,
        })
    }

    /// Where manifests and segments end up, when persistence is on.
    pub fn dump_dir(&self) -> Option<&Path> {
        self.dump_dir.as_ref().map(PathBuf::as_path)
    }

    /// Register a callback fired after each successful manifest persist.
    pub fn add_fetch_callback(
        &mut self,
        cb: impl Fn(&Path, DateTime<Utc>) + Send + Sync + 'static,
    ) {
        self.on_fetch.push(Box::new(cb));
    }

    /// A token that cancels [`Self::run`] when triggered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll until cancelled. The immediate first fetch propagates its error;
    /// later poll failures are logged and retried on the next tick.
    pub async fn run(&mut self) -> ReliveResult<()> {
        if let Err(e) = self.fetch_and_store_manifest().await {
            error!(channel = %self.name, "initial fetch: {e}");
            return Err(e);
        }
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.fetch_and_store_manifest().await {
                        error!(channel = %self.name, "manifest fetch: {e}");
                    }
                }
            }
        }
        debug!("close ticker");
        Ok(())
    }

    /// Graceful shutdown: stop polling, unblock every worker with a
    /// sentinel and wait for the pool to drain.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for _ in 0..self.workers.len() {
            let _ = self.queue.send(None).await;
        }
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
    }

    /// One poll: conditional GET, session redirect handling, persistence,
    /// diffing and segment enqueueing.
    pub async fn fetch_and_store_manifest(&mut self) -> ReliveResult<()> {
        let mut redirects = 0;
        loop {
            let mut request = self
                .client
                .get(self.source_url.clone())
                .header(USER_AGENT, &self.user_agent);
            if let Some(date) = &self.last_date {
                request = request.header(IF_MODIFIED_SINCE, date);
            }
            let response = request.send().await.map_err(|e| {
                error!(source = %self.source_url, "do manifest request: {e}");
                e
            })?;
            let status = response.status();
            if status == StatusCode::NOT_MODIFIED {
                debug!(url = %self.source_url, "no update");
                self.check_stale();
                return Ok(());
            }
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let date = response
                .headers()
                .get(DATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await.map_err(|e| {
                error!(source = %self.source_url, "get manifest data: {e}");
                e
            })?;
            if status != StatusCode::OK {
                warn!(status = %status, "manifest fetch");
                return Err(ReliveError::HttpStatus(status));
            }

            // A JSON body opens a session: rebind the source and retry.
            if content_type.starts_with("application/json")
                || content_type.starts_with("text/plain")
            {
                let session: SessionInfo = serde_json::from_slice(&body).map_err(|e| {
                    error!("parse view route: {e}");
                    e
                })?;
                if session.media_url.is_empty() {
                    error!("no MediaUrl or empty");
                    return Err(ReliveError::MissingMediaUrl);
                }
                let session_url = Url::parse(&session.media_url)?;
                info!(url = %session.media_url, "open session");
                self.source_url = session_url;
                self.last_date = None;
                redirects += 1;
                if redirects > 3 {
                    warn!("session redirect loop");
                    return Err(ReliveError::MissingMediaUrl);
                }
                continue;
            }

            if date.is_some() && date == self.last_date {
                debug!(url = %self.source_url, "no update");
                self.check_stale();
                return Ok(());
            }
            self.last_date = date;
            self.last_change = Utc::now();

            let now = Utc::now();
            if let Some(manifest_dir) = &self.manifest_dir {
                let filepath = manifest_dir.join(storage::manifest_filename(now));
                fs::write(&filepath, &body).map_err(|e| {
                    error!(path = %filepath.display(), "write manifest: {e}");
                    e
                })?;
                for hook in &self.on_fetch {
                    hook(&filepath, now);
                }
            }

            let text = String::from_utf8_lossy(&body);
            let mpd = match crate::mpd::parse(&text) {
                Ok(mpd) => mpd,
                Err(e) => {
                    error!("parse manifest size {}: {e}", body.len());
                    debug!("{text}");
                    return Err(e);
                }
            };
            return self.on_new_mpd(&mpd);
        }
    }

    /// Handle a freshly published manifest.
    pub fn on_new_mpd(&mut self, mpd: &MPD) -> ReliveResult<()> {
        self.differ.update(mpd)?;
        self.walk_mpd(mpd)?;
        PROCESSED.inc();

        if self.fetch_mode == FetchMode::NoFetch {
            return Ok(());
        }
        let ast = availability_start(mpd);
        let now = Utc::now();
        let queue = self.queue.clone();
        let have = self.have.clone();
        let dump_dir = self.dump_dir.clone();
        walk_segment_urls(mpd, &self.source_url, &mut |url, time, duration, offset| {
            // Skip segments that fell out of the fetch window; init
            // segments carry zero time and duration and are always kept.
            if !time.is_zero() && !duration.is_zero() {
                let age = now - (ast + offset + time);
                if age > cut_segments_at() {
                    trace!("skip: {url} age {age}");
                    return Ok(());
                }
            }
            enqueue_segment(
                &queue,
                &have,
                dump_dir.as_deref(),
                SegmentInfo {
                    url,
                    time,
                    duration,
                },
            )
        })
    }

    fn check_stale(&self) {
        let since = Utc::now() - self.last_change;
        if since > TimeDelta::minutes(1) {
            self.reporter.no_update(since);
        }
    }

    /// Walk all periods and assemble the per-track status report, keeping
    /// the splice list up to date along the way.
    fn walk_mpd(&mut self, mpd: &MPD) -> ReliveResult<()> {
        let now = Utc::now();
        if mpd.periods.is_empty() {
            return Err(ReliveError::NoPeriods);
        }
        let ast = availability_start(mpd);
        let mut log = ManifestLog::default();

        for period in &mpd.periods {
            let period_start = ast + period_start_offset(period);
            log.periods.push(PeriodInfo {
                id: period.id.clone().unwrap_or_default(),
                start: period_start.to_rfc3339(),
            });
            for stream in &period.event_streams {
                if stream.scheme_id_uri.as_deref() != Some(SCHEME_SCTE35_XML) {
                    continue;
                }
                let timescale = stream.timescale.unwrap_or(0);
                let pto = stream.presentation_time_offset.unwrap_or(0);
                for event in &stream.events {
                    let id = event.id.unwrap_or(0);
                    let pt = event.presentation_time.unwrap_or(0);
                    let duration =
                        ticks_to_duration(event.duration.unwrap_or(0) as i64, timescale);
                    let start = period_start + ticks_to_duration(pt as i64 - pto as i64, timescale);
                    debug!(
                        "SCTE35 id {id} duration {duration} time {}",
                        short_time(start)
                    );
                    self.splices.add_if_new(start, format!("evid_{id}"));
                    self.splices
                        .add_if_new(start + duration, format!("evid_{id}_end"));
                }
            }
        }
        self.splices.expire(now);

        // The first period carrying a segment template fixes the stream
        // format and the track order of the report.
        if self.initial_period.is_none() {
            self.initial_period = mpd
                .periods
                .iter()
                .find(|p| {
                    p.adaptation_sets
                        .first()
                        .is_some_and(|set| set.segment_template.is_some())
                })
                .cloned();
        }
        let Some(reference) = self.initial_period.clone() else {
            return Err(ReliveError::NoReferencePeriod);
        };

        'sets: for set_ref in &reference.adaptation_sets {
            let mut track = TrackLog {
                mime_type: set_ref.mime_type.clone().unwrap_or_default(),
                codecs: set_ref.codecs.clone(),
                buffer_depth: Dur(TimeDelta::zero()),
                live_edge: None,
                periods: Vec::new(),
            };
            let mut previous_end: Option<DateTime<Utc>> = None;
            for (period_index, period) in mpd.periods.iter().enumerate() {
                if period.adaptation_sets.is_empty() {
                    continue;
                }
                let matched = period.adaptation_sets.iter().find(|candidate| {
                    set_ref.mime_type == candidate.mime_type
                        && (set_ref.codecs.is_none()
                            || candidate.codecs.is_none()
                            || set_ref.codecs == candidate.codecs)
                });
                let Some(set) = matched else {
                    debug!(
                        "mime type {} not found in period {period_index}",
                        track.mime_type
                    );
                    track.periods.push(TrackPeriodLog {
                        missing: true,
                        ..Default::default()
                    });
                    continue;
                };
                let st = set.segment_template.as_ref().or_else(|| {
                    set.representations
                        .first()
                        .and_then(|r| r.segment_template.as_ref())
                });
                let Some(st) = st else { continue 'sets };
                if st
                    .segment_timeline
                    .as_ref()
                    .is_none_or(|tl| tl.segments.is_empty())
                {
                    continue 'sets;
                }
                let period_start = ast + period_start_offset(period);
                let mut extent = template_extent(st, period_start);
                if extent.is_none() {
                    extent = set
                        .representations
                        .iter()
                        .find_map(|r| r.segment_template.as_ref())
                        .and_then(|rst| template_extent(rst, period_start));
                }
                let Some((from, to)) = extent else {
                    continue 'sets;
                };

                let mut entry = TrackPeriodLog::default();
                for splice in self.splices.in_range(from, to) {
                    walk_segment_template_timings(st, period_start, |t, d| {
                        if splice.at < t || splice.at >= t + d {
                            return;
                        }
                        let offset = splice.at - t;
                        let splice_log = if offset > d / 2 {
                            SpliceLog {
                                direction: SpliceDirection::Early,
                                offset: Dur(round_to(d - offset, TimeDelta::milliseconds(1))),
                                boundary: short_time(t + d),
                                segment_duration: Dur(d),
                            }
                        } else if !offset.is_zero() {
                            SpliceLog {
                                direction: SpliceDirection::Late,
                                offset: Dur(round_to(offset, TimeDelta::milliseconds(1))),
                                boundary: short_time(t),
                                segment_duration: Dur(d),
                            }
                        } else {
                            SpliceLog {
                                direction: SpliceDirection::Exact,
                                offset: Dur(TimeDelta::zero()),
                                boundary: short_time(t),
                                segment_duration: Dur(d),
                            }
                        };
                        entry.splices.push(splice_log);
                    });
                }

                if period_index == 0 {
                    track.buffer_depth = Dur(round_to_secs(now - from));
                } else if let Some(previous) = previous_end {
                    let gap = from - previous;
                    if gap > max_gap_log() {
                        entry.gap = Some(Dur(round(gap)));
                    }
                }
                entry.duration = Some(Dur(round(to - from)));
                if period_index == mpd.periods.len() - 1 {
                    track.live_edge = Some(Dur(now - to));
                }
                previous_end = Some(to);
                track.periods.push(entry);
            }
            log.tracks.push(track);
        }

        self.reporter.manifest(&log);
        Ok(())
    }
}

/// Queue a segment unless it is already pending or mirrored locally.
/// Enqueueing never blocks; a full queue is reported to the caller and the
/// segment is re-offered by the next poll.
fn enqueue_segment(
    queue: &mpsc::Sender<Option<SegmentInfo>>,
    have: &Mutex<HashSet<String>>,
    dump_dir: Option<&Path>,
    info: SegmentInfo,
) -> ReliveResult<()> {
    let key = info.url.path().to_string();
    if have.lock().unwrap().contains(&key) {
        trace!("already in queue {key}");
        return Ok(());
    }
    if let Some(dump_dir) = dump_dir {
        if dump_dir.join(key.trim_start_matches('/')).exists() {
            debug!("have file {key}");
            return Ok(());
        }
    }
    match queue.try_send(Some(info)) {
        Ok(()) => {
            have.lock().unwrap().insert(key);
            Ok(())
        }
        Err(mpsc::error::TrySendError::Full(_)) => Err(ReliveError::QueueFull),
        Err(mpsc::error::TrySendError::Closed(_)) => Ok(()),
    }
}

/// On every new period, verify the boundary against the neighboring
/// periods' actual sample extents.
fn check_period_borders(mpd: &MPD, period: &Period, reporter: &dyn CheckerReporter) {
    if mpd.periods.len() < 2 {
        return;
    }
    let now = Utc::now();
    let ast = availability_start(mpd);
    let period_start = ast + period_start_offset(period);
    let previous = &mpd.periods[mpd.periods.len() - 2];
    let last = &mpd.periods[mpd.periods.len() - 1];
    let (Some((_, last_of_previous)), Some((first_of_next, _))) = (
        period_segment_limits(previous, ast, now),
        period_segment_limits(last, ast, now),
    ) else {
        return;
    };
    reporter.period_gap(
        period.id.as_deref().unwrap_or_default(),
        period_start - last_of_previous,
        first_of_next - period_start,
    );
}

/// All tracks of a period must agree on `pto / timescale` within 2 ms.
fn check_track_alignment(period: &Period, reporter: &dyn CheckerReporter) {
    let mut previous_offset: Option<f64> = None;
    for set in &period.adaptation_sets {
        let Some(st) = &set.segment_template else {
            continue;
        };
        let timescale = st.timescale.unwrap_or(0);
        if timescale == 0 {
            continue;
        }
        let offset = st.presentation_time_offset.unwrap_or(0) as f64 / timescale as f64;
        if let Some(previous) = previous_offset {
            if (offset - previous).abs() > 0.002 {
                reporter.track_alignment_offset(
                    ((offset - previous) * 1000.0).round() / 1000.0,
                    set.id.as_deref().unwrap_or_default(),
                    period.id.as_deref().unwrap_or_default(),
                );
            }
        }
        previous_offset = Some(offset);
    }
}

struct FetchWorker {
    client: Client,
    fetch_mode: FetchMode,
    dump_dir: Option<PathBuf>,
    user_agent: String,
    have: Arc<Mutex<HashSet<String>>>,
}

impl FetchWorker {
    async fn run(
        self: Arc<Self>,
        queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Option<SegmentInfo>>>>,
    ) {
        loop {
            let item = queue.lock().await.recv().await;
            let Some(Some(info)) = item else { break };
            // Clear the have-set before the round-trip so a failed fetch
            // can be re-offered by the next poll.
            self.have.lock().unwrap().remove(info.url.path());
            self.fetch_and_store(&info).await;
        }
        debug!("close fetcher");
    }

    async fn fetch_and_store(&self, info: &SegmentInfo) {
        let local = self
            .dump_dir
            .as_ref()
            .map(|dir| dir.join(info.url.path().trim_start_matches('/')));
        if self.fetch_mode >= FetchMode::Store {
            if let Some(local) = &local {
                if let Some(parent) = local.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                if local.exists() {
                    return;
                }
            }
        }

        let request = if self.fetch_mode == FetchMode::Access {
            self.client.head(info.url.clone())
        } else {
            self.client.get(info.url.clone())
        };
        let response = match request.header(USER_AGENT, &self.user_agent).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %info.url, "fetch segment: {e}");
                return;
            }
        };
        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                error!(url = %info.url, "read segment data: {e}");
                return;
            }
        };
        if status != StatusCode::OK {
            warn!(segment = %info.url, status = %status, "status");
            return;
        }

        if self.fetch_mode >= FetchMode::Verify && !body.is_empty() {
            match fmp4::decode_segment(&body) {
                Err(e) => error!("decode media segment: {e}"),
                Ok(timing) => {
                    debug!("t:{} d:{}", timing.offset, timing.duration);
                    if !info.time.is_zero() || !info.duration.is_zero() {
                        let offset_diff = info.time - timing.offset;
                        let duration_diff = info.duration - timing.duration;
                        if duration_diff.abs() > max_time_diff() {
                            error!(
                                url = %info.url,
                                manifest = %info.duration,
                                segment = %timing.duration,
                                "media segment duration mismatch"
                            );
                        }
                        if offset_diff.abs() > max_time_diff() {
                            error!(
                                url = %info.url,
                                manifest = %info.time,
                                segment = %timing.offset,
                                offset = %offset_diff,
                                "media segment offset mismatch"
                            );
                        }
                    }
                }
            }
        }
        debug!(segment = %info.url, "got");

        if self.fetch_mode >= FetchMode::Store {
            if let Some(local) = &local {
                if let Err(e) = fs::write(local, &body) {
                    error!(path = %local.display(), "write segment data: {e}");
                }
            }
        }
    }
}
