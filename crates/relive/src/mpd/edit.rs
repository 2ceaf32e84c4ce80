//! In-place manifest surgery used by the replay synthesizer.

use chrono::TimeDelta;
use url::Url;

use super::walk::{is_absolute_url, join_path};
use super::{Period, SegmentTemplate, SegmentTimeline, XsDuration, MPD, S};
use crate::timing::duration_to_ticks;

/// Append one segment run to a timeline, coalescing with the previous entry
/// when the duration matches. Contiguity is the caller's concern; a zero `t`
/// marks a segment that continues the running tick.
pub fn append_segment(timeline: &mut SegmentTimeline, t: u64, d: u64, r: i64) {
    let entry = S {
        t: (t != 0).then_some(t),
        d,
        r: (r != 0).then_some(r),
    };
    match timeline.segments.last_mut() {
        Some(last) if last.d == d => {
            last.r = Some(last.r.unwrap_or(0) + r + 1);
        }
        _ => timeline.segments.push(entry),
    }
}

/// Add `shift` to the presentation time offset, and move `startNumber`
/// along when the template carries a fixed segment duration.
pub fn shift_pto(st: &mut SegmentTemplate, shift: TimeDelta) {
    let timescale = st.timescale.unwrap_or(1);
    let shift_ticks = duration_to_ticks(shift, timescale);
    let pto = st.presentation_time_offset.unwrap_or(0);
    let shifted = (pto as i64 + shift_ticks) as u64;
    st.presentation_time_offset = (shifted != 0).then_some(shifted);

    let duration = st.duration.unwrap_or(0);
    if duration == 0 {
        return;
    }
    let start_number = st.start_number.unwrap_or(0);
    let shifted = (start_number as i64 + shift_ticks / duration as i64) as u64;
    st.start_number = (shifted != 0).then_some(shifted);
}

/// Resolve `reference` against `base`: an absolute reference wins, a
/// relative one is appended below the base path, an empty one yields the
/// base itself.
pub fn concat_url(base: &Url, reference: &str) -> Option<Url> {
    if reference.is_empty() {
        return Some(base.clone());
    }
    if is_absolute_url(reference) {
        return Url::parse(reference).ok();
    }
    join_path(base, reference).ok()
}

/// Rewrite each period's base URL for serving from the archive:
/// absent bases stay untouched; relative ones are expanded against the
/// original source directory; with `local_media` the URL is reduced to its
/// path so clients fetch from the host serving the manifest.
pub fn rebase_periods(mpd: &mut MPD, original_base: Option<&Url>, local_media: bool) {
    let Some(original_base) = original_base else {
        return;
    };
    for period in &mut mpd.periods {
        let Some(base) = period.base_urls.first_mut() else {
            continue;
        };
        if base.base.is_empty() {
            continue;
        }
        let Some(expanded) = concat_url(original_base, &base.base) else {
            continue;
        };
        base.base = if local_media {
            expanded.path().trim_start_matches('/').to_string()
        } else {
            expanded.to_string()
        };
    }
}

/// A shallow copy of a period with its start replaced and, when given, its
/// id overwritten.
pub fn period_with_start(period: &Period, start: TimeDelta, id: Option<&str>) -> Period {
    let mut out = period.clone();
    out.start = Some(XsDuration(start));
    if let Some(id) = id {
        out.id = Some(id.to_string());
    }
    out
}

/// Append the periods of `second` onto `first`; either side may be absent.
pub fn merge_mpd(first: Option<MPD>, second: Option<MPD>) -> Option<MPD> {
    match (first, second) {
        (Some(mut first), Some(second)) => {
            first.periods.extend(second.periods);
            Some(first)
        }
        (first, second) => first.or(second),
    }
}
