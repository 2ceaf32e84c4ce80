//! Read-only traversal of a parsed manifest: timeline expansion, time
//! extents, identity lookup and segment URL enumeration.

use chrono::{DateTime, TimeDelta, Utc};
use url::Url;

use super::template::PathTemplate;
use super::{AdaptationSet, Event, EventStream, Period, Representation, SegmentTemplate,
            SegmentTimeline, MPD, S};
use crate::error::{ReliveError, ReliveResult};
use crate::timing::ticks_to_duration;

/// Lazily expand the `(t, d, r)` run-length entries into `(tick, duration)`
/// pairs. Iteration ends early at an entry whose explicit `t` disagrees with
/// the running tick; such a discontinuity is the caller's concern.
pub fn expand_timeline(timeline: &SegmentTimeline) -> TimelineIter<'_> {
    TimelineIter {
        entries: timeline.segments.iter(),
        tick: 0,
        duration: 0,
        remaining: 0,
        started: false,
    }
}

pub struct TimelineIter<'a> {
    entries: std::slice::Iter<'a, S>,
    tick: u64,
    duration: u64,
    remaining: i64,
    started: bool,
}

impl Iterator for TimelineIter<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<(u64, u64)> {
        loop {
            if self.remaining > 0 {
                let item = (self.tick, self.duration);
                self.tick += self.duration;
                self.remaining -= 1;
                return Some(item);
            }
            let entry = self.entries.next()?;
            match entry.t {
                Some(t) if !self.started => self.tick = t,
                Some(t) if t != self.tick => return None,
                _ => {}
            }
            self.started = true;
            self.duration = entry.d;
            self.remaining = entry.r.unwrap_or(0) + 1;
        }
    }
}

/// First tick and end tick (exclusive) covered by a timeline.
pub fn time_range(timeline: &SegmentTimeline) -> (u64, u64) {
    let (mut from, mut to) = (0u64, 0u64);
    for s in &timeline.segments {
        if let Some(t) = s.t {
            to = t;
            if from == 0 {
                from = to;
            }
        }
        let count = (s.r.unwrap_or(0) + 1).max(0) as u64;
        to += s.d * count;
    }
    (from, to)
}

/// First and last presentation time of a segment template with a timeline,
/// as wall-clock instants relative to the period start.
pub fn template_extent(
    st: &SegmentTemplate,
    period_start: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let timeline = st.segment_timeline.as_ref()?;
    if timeline.segments.is_empty() {
        return None;
    }
    let timescale = st.timescale.unwrap_or(1);
    let pto = st.presentation_time_offset.unwrap_or(0) as i64;
    let (first, last) = time_range(timeline);
    Some((
        period_start + ticks_to_duration(first as i64 - pto, timescale),
        period_start + ticks_to_duration(last as i64 - pto, timescale),
    ))
}

/// Call `action(wall_start, duration)` for every segment of a template.
pub fn walk_segment_template_timings(
    st: &SegmentTemplate,
    period_start: DateTime<Utc>,
    mut action: impl FnMut(DateTime<Utc>, TimeDelta),
) {
    let Some(timeline) = st.segment_timeline.as_ref() else {
        return;
    };
    let timescale = st.timescale.unwrap_or(1);
    let pto = st.presentation_time_offset.unwrap_or(0) as i64;
    for (t, d) in expand_timeline(timeline) {
        action(
            period_start + ticks_to_duration(t as i64 - pto, timescale),
            ticks_to_duration(d as i64, timescale),
        );
    }
}

/// The start offset of a period from the availability start time.
pub fn period_start_offset(period: &Period) -> TimeDelta {
    period.start.map(|s| s.delta()).unwrap_or_else(TimeDelta::zero)
}

/// The wall-clock zero point of the presentation timeline.
pub fn availability_start(mpd: &MPD) -> DateTime<Utc> {
    mpd.availability_start_time.unwrap_or(DateTime::UNIX_EPOCH)
}

pub fn period_by_id<'a>(periods: &'a [Period], id: Option<&str>) -> Option<&'a Period> {
    periods.iter().find(|p| p.id.as_deref() == id)
}

pub fn adaptation_set_by_id<'a>(
    sets: &'a [AdaptationSet],
    id: Option<&str>,
) -> Option<&'a AdaptationSet> {
    sets.iter().find(|a| a.id.as_deref() == id)
}

pub fn representation_by_id<'a>(
    representations: &'a [Representation],
    id: Option<&str>,
) -> Option<&'a Representation> {
    representations.iter().find(|r| r.id.as_deref() == id)
}

/// Two-level lookup: the stream matching `scheme`, then the event with `id`.
pub fn event_by_scheme_id<'a>(
    streams: &'a [EventStream],
    scheme: Option<&str>,
    id: u64,
) -> Option<&'a Event> {
    streams
        .iter()
        .filter(|es| es.scheme_id_uri.as_deref() == scheme)
        .flat_map(|es| es.events.iter())
        .find(|e| e.id.unwrap_or(0) == id)
}

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

/// Resolve `new` against `current`, keeping the query portion of the current
/// URL unless the new one carries its own.
pub fn merge_baseurls(current: &Url, new: &str) -> ReliveResult<Url> {
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        let mut merged = current.join(new)?;
        if merged.query().is_none() {
            merged.set_query(current.query());
        }
        Ok(merged)
    }
}

/// The directory of a URL: everything up to and including the last `/` of
/// its path.
pub(crate) fn directory(url: &Url) -> Url {
    let mut dir = url.clone();
    let path = dir.path();
    if let Some(cut) = path.rfind('/') {
        let trimmed = path[..=cut].to_string();
        dir.set_path(&trimmed);
    }
    dir
}

/// Append a relative path below the base URL's path.
pub(crate) fn join_path(base: &Url, relative: &str) -> ReliveResult<Url> {
    let relative = relative.trim_start_matches('/');
    if base.path().ends_with('/') {
        Ok(base.join(relative)?)
    } else {
        let mut slashed = base.clone();
        slashed.set_path(&format!("{}/", base.path()));
        Ok(slashed.join(relative)?)
    }
}

/// The base URL segments of a period resolve against: the period's own base
/// if absolute, otherwise the RFC 3986 resolution of the (possibly empty)
/// period base against the manifest URL's directory.
pub fn segment_base_url(period: &Period, mpd_url: &Url) -> ReliveResult<Url> {
    let dir = directory(mpd_url);
    match period.base_urls.first() {
        Some(base) if is_absolute_url(&base.base) => Ok(Url::parse(&base.base)?),
        Some(base) => merge_baseurls(&dir, &base.base),
        None => Ok(dir),
    }
}

/// Walk one segment template, calling `action(url, time, duration, offset)`
/// for the init segment (zero time and duration) and every media segment.
///
/// `offset` maps segment ticks onto the wall clock: a segment starting at
/// tick `t` begins at `ast + offset + t`.
pub fn walk_segment_template(
    st: &SegmentTemplate,
    segment_base: &Url,
    representation_id: &str,
    period_start: TimeDelta,
    action: &mut dyn FnMut(Url, TimeDelta, TimeDelta, TimeDelta) -> ReliveResult<()>,
) -> ReliveResult<()> {
    if let Some(init) = &st.initialization {
        let path = init.replace("$RepresentationID$", representation_id);
        action(
            join_path(segment_base, &path)?,
            TimeDelta::zero(),
            TimeDelta::zero(),
            TimeDelta::zero(),
        )?;
    }
    let Some(timeline) = st.segment_timeline.as_ref() else {
        return Err(ReliveError::NoTimeline);
    };
    let Some(media) = st.media.as_deref() else {
        return Ok(());
    };
    let template = PathTemplate::new(media);
    let timescale = st.timescale.unwrap_or(1);
    let pto = st.presentation_time_offset.unwrap_or(0);
    let offset = period_start - ticks_to_duration(pto as i64, timescale);
    let mut number = st.start_number.unwrap_or(1);
    for (t, d) in expand_timeline(timeline) {
        let rendered = template.render(t, number, representation_id);
        action(
            join_path(segment_base, &rendered)?,
            ticks_to_duration(t as i64, timescale),
            ticks_to_duration(d as i64, timescale),
            offset,
        )?;
        number += 1;
    }
    Ok(())
}

/// Enumerate every segment URL of every representation in the manifest.
/// A failing action aborts the current representation and moves on.
pub fn walk_segment_urls(
    mpd: &MPD,
    mpd_url: &Url,
    action: &mut dyn FnMut(Url, TimeDelta, TimeDelta, TimeDelta) -> ReliveResult<()>,
) -> ReliveResult<()> {
    for period in &mpd.periods {
        let start = period_start_offset(period);
        let base = segment_base_url(period, mpd_url)?;
        for set in &period.adaptation_sets {
            for representation in &set.representations {
                let Some(id) = representation.id.as_deref() else {
                    continue;
                };
                let st = set
                    .segment_template
                    .as_ref()
                    .or(representation.segment_template.as_ref());
                if let Some(st) = st {
                    if walk_segment_template(st, &base, id, start, action).is_err() {
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

/// The time range for which samples are available across all tracks of a
/// period: the latest first-sample time and the earliest last-sample time.
pub fn period_segment_limits(
    period: &Period,
    ast: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let period_start = ast + period_start_offset(period);
    let mut from: Option<DateTime<Utc>> = None;
    let mut to = now;
    let mut narrow = |extent: Option<(DateTime<Utc>, DateTime<Utc>)>| {
        if let Some((first, last)) = extent {
            from = Some(from.map_or(first, |f| f.max(first)));
            to = to.min(last);
        }
    };
    for set in &period.adaptation_sets {
        if let Some(st) = &set.segment_template {
            narrow(template_extent(st, period_start));
        } else {
            for representation in &set.representations {
                if let Some(st) = &representation.segment_template {
                    narrow(template_extent(st, period_start));
                }
            }
        }
    }
    from.map(|f| (f, to))
}

/// The duration of the shortest track, summed over all periods.
pub fn exact_duration(mpd: &MPD) -> TimeDelta {
    let ast = availability_start(mpd);
    let mut shortest: Option<TimeDelta> = None;
    let mut consider = |extent: Option<(DateTime<Utc>, DateTime<Utc>)>| {
        if let Some((from, to)) = extent {
            let span = to - from;
            shortest = Some(shortest.map_or(span, |s| s.min(span)));
        }
    };
    for period in &mpd.periods {
        let period_start = ast + period_start_offset(period);
        for set in &period.adaptation_sets {
            if let Some(st) = &set.segment_template {
                consider(template_extent(st, period_start));
            } else {
                for representation in &set.representations {
                    if let Some(st) = &representation.segment_template {
                        consider(template_extent(st, period_start));
                    }
                }
            }
        }
    }
    shortest.unwrap_or_else(TimeDelta::zero)
}
