//! Just enough fMP4 box parsing to cross-check a fetched media segment
//! against the manifest: the earliest presentation time and total duration
//! from the `sidx` segment index, with the `moof`→`traf`→`tfdt` decode time
//! as fallback for the start offset.

use chrono::TimeDelta;

use crate::error::{ReliveError, ReliveResult};
use crate::timing::ticks_to_duration;

/// Container timing of one media segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentTiming {
    /// Earliest presentation time.
    pub offset: TimeDelta,
    /// Sum of the subsegment durations.
    pub duration: TimeDelta,
}

struct BoxHeader<'a> {
    kind: &'a [u8],
    payload: &'a [u8],
    total: usize,
}

fn read_header(data: &[u8]) -> ReliveResult<BoxHeader<'_>> {
    if data.len() < 8 {
        return Err(ReliveError::SegmentParse(
            "buffer too small for box header".into(),
        ));
    }
    let size = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
    if size < 8 || size > data.len() {
        return Err(ReliveError::SegmentParse(format!(
            "corrupted box size {size} of {}",
            data.len()
        )));
    }
    Ok(BoxHeader {
        kind: &data[4..8],
        payload: &data[8..size],
        total: size,
    })
}

fn be_u32(data: &[u8], at: usize) -> ReliveResult<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
        .ok_or_else(|| ReliveError::SegmentParse("truncated box".into()))
}

fn be_u64(data: &[u8], at: usize) -> ReliveResult<u64> {
    data.get(at..at + 8)
        .map(|b| u64::from_be_bytes(b.try_into().unwrap()))
        .ok_or_else(|| ReliveError::SegmentParse("truncated box".into()))
}

/// Extract `(earliest presentation time, duration)` from a segment buffer.
///
/// The `tfdt` fallback only applies once a `sidx` in the same buffer has
/// provided the timescale; a buffer with neither yields an error.
pub fn decode_segment(data: &[u8]) -> ReliveResult<SegmentTiming> {
    let mut rest = data;
    let mut timescale = 0u32;
    let mut offset: Option<TimeDelta> = None;
    let mut duration: Option<TimeDelta> = None;

    while !rest.is_empty() {
        let header = read_header(rest)?;
        match header.kind {
            b"sidx" => {
                let payload = header.payload;
                let version = *payload
                    .first()
                    .ok_or_else(|| ReliveError::SegmentParse("empty sidx".into()))?;
                timescale = be_u32(payload, 8)?;
                let (earliest, refs_at) = if version == 0 {
                    (be_u32(payload, 12)? as u64, 24usize)
                } else {
                    (be_u64(payload, 12)?, 32usize)
                };
                let reference_count = be_u32(payload, refs_at - 4)? & 0xffff;
                let mut subsegment_sum = 0u64;
                for i in 0..reference_count as usize {
                    subsegment_sum += be_u32(payload, refs_at + i * 12 + 4)? as u64;
                }
                offset = Some(ticks_to_duration(earliest as i64, timescale as u64));
                duration = Some(ticks_to_duration(
                    subsegment_sum as i64,
                    timescale as u64,
                ));
            }
            b"moof" => {
                if let Some(decode_time) = find_tfdt(header.payload)? {
                    // The index may advertise an earliest presentation time
                    // of zero; the fragment decode time is authoritative
                    // then, but only once a sidx has fixed the timescale.
                    if timescale != 0 && offset.map_or(true, |o| o.is_zero()) {
                        offset =
                            Some(ticks_to_duration(decode_time as i64, timescale as u64));
                    }
                }
            }
            _ => {}
        }
        rest = &rest[header.total..];
    }

    match (offset, duration) {
        (Some(offset), duration) => Ok(SegmentTiming {
            offset,
            duration: duration.unwrap_or_else(TimeDelta::zero),
        }),
        _ => Err(ReliveError::SegmentParse(
            "no timing information in segment".into(),
        )),
    }
}

/// Walk `moof` children for the first `traf`/`tfdt` base media decode time.
fn find_tfdt(mut payload: &[u8]) -> ReliveResult<Option<u64>> {
    while !payload.is_empty() {
        let header = read_header(payload)?;
        if header.kind == b"traf" {
            let mut inner = header.payload;
            while !inner.is_empty() {
                let child = read_header(inner)?;
                if child.kind == b"tfdt" {
                    let version = *child
                        .payload
                        .first()
                        .ok_or_else(|| ReliveError::SegmentParse("empty tfdt".into()))?;
                    let time = if version == 1 {
                        be_u64(child.payload, 4)?
                    } else {
                        be_u32(child.payload, 4)? as u64
                    };
                    return Ok(Some(time));
                }
                inner = &inner[child.total..];
            }
        }
        payload = &payload[header.total..];
    }
    Ok(None)
}
