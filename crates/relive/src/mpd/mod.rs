//! Parsed manifest tree.
//!
//! The model keeps exactly the nodes and attributes the recorder and the
//! replay synthesizer touch, and it round-trips: `parse` → [`MPD::to_xml`] →
//! `parse` yields a structurally equal tree. Every attribute is an explicit
//! `Option` so that "absent" and "present with the zero value" stay distinct
//! across serialization.

pub mod duration;
pub mod edit;
pub mod template;
pub mod walk;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReliveResult;
pub use duration::XsDuration;

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "MPD")]
pub struct MPD {
    #[serde(rename = "@xmlns", skip_serializing_if = "Option::is_none")]
    pub xmlns: Option<String>,
    #[serde(rename = "@xmlns:xsi", skip_serializing_if = "Option::is_none")]
    pub xmlns_xsi: Option<String>,
    #[serde(
        rename = "@xsi:schemaLocation",
        skip_serializing_if = "Option::is_none"
    )]
    pub schema_location: Option<String>,
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@profiles", skip_serializing_if = "Option::is_none")]
    pub profiles: Option<String>,
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub mpd_type: Option<String>,
    #[serde(
        rename = "@availabilityStartTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub availability_start_time: Option<DateTime<Utc>>,
    #[serde(rename = "@publishTime", skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(
        rename = "@minimumUpdatePeriod",
        skip_serializing_if = "Option::is_none"
    )]
    pub minimum_update_period: Option<XsDuration>,
    #[serde(
        rename = "@timeShiftBufferDepth",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_shift_buffer_depth: Option<XsDuration>,
    #[serde(
        rename = "@mediaPresentationDuration",
        skip_serializing_if = "Option::is_none"
    )]
    pub media_presentation_duration: Option<XsDuration>,
    #[serde(
        rename = "@suggestedPresentationDelay",
        skip_serializing_if = "Option::is_none"
    )]
    pub suggested_presentation_delay: Option<XsDuration>,
    #[serde(rename = "@minBufferTime", skip_serializing_if = "Option::is_none")]
    pub min_buffer_time: Option<XsDuration>,
    #[serde(
        rename = "@maxSegmentDuration",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_segment_duration: Option<XsDuration>,
    #[serde(rename = "BaseURL", default, skip_serializing_if = "Vec::is_empty")]
    pub base_urls: Vec<BaseURL>,
    #[serde(rename = "Period", default, skip_serializing_if = "Vec::is_empty")]
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseURL {
    #[serde(
        rename = "@serviceLocation",
        skip_serializing_if = "Option::is_none"
    )]
    pub service_location: Option<String>,
    #[serde(rename = "$text", default)]
    pub base: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Period {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@start", skip_serializing_if = "Option::is_none")]
    pub start: Option<XsDuration>,
    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<XsDuration>,
    #[serde(rename = "BaseURL", default, skip_serializing_if = "Vec::is_empty")]
    pub base_urls: Vec<BaseURL>,
    #[serde(
        rename = "AdaptationSet",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub adaptation_sets: Vec<AdaptationSet>,
    #[serde(
        rename = "EventStream",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub event_streams: Vec<EventStream>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AdaptationSet {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@group", skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
    #[serde(rename = "@contentType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(rename = "@mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "@codecs", skip_serializing_if = "Option::is_none")]
    pub codecs: Option<String>,
    #[serde(rename = "@lang", skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(
        rename = "@segmentAlignment",
        skip_serializing_if = "Option::is_none"
    )]
    pub segment_alignment: Option<bool>,
    #[serde(rename = "@startWithSAP", skip_serializing_if = "Option::is_none")]
    pub start_with_sap: Option<u32>,
    #[serde(rename = "@maxWidth", skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u64>,
    #[serde(rename = "@maxHeight", skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u64>,
    #[serde(rename = "@frameRate", skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<String>,
    #[serde(rename = "Role", default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<Descriptor>,
    #[serde(
        rename = "ContentProtection",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub content_protections: Vec<Descriptor>,
    #[serde(rename = "SegmentTemplate", skip_serializing_if = "Option::is_none")]
    pub segment_template: Option<SegmentTemplate>,
    #[serde(
        rename = "Representation",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub representations: Vec<Representation>,
}

/// Role, ContentProtection and friends; carried verbatim, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Descriptor {
    #[serde(rename = "@schemeIdUri", skip_serializing_if = "Option::is_none")]
    pub scheme_id_uri: Option<String>,
    #[serde(rename = "@value", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(
        rename = "@cenc:default_KID",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_kid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Representation {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@bandwidth", skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<u64>,
    #[serde(rename = "@width", skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    #[serde(rename = "@height", skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(rename = "@frameRate", skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<String>,
    #[serde(rename = "@codecs", skip_serializing_if = "Option::is_none")]
    pub codecs: Option<String>,
    #[serde(rename = "@mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "@scanType", skip_serializing_if = "Option::is_none")]
    pub scan_type: Option<String>,
    #[serde(rename = "@sar", skip_serializing_if = "Option::is_none")]
    pub sar: Option<String>,
    #[serde(
        rename = "@audioSamplingRate",
        skip_serializing_if = "Option::is_none"
    )]
    pub audio_sampling_rate: Option<u64>,
    #[serde(rename = "SegmentTemplate", skip_serializing_if = "Option::is_none")]
    pub segment_template: Option<SegmentTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SegmentTemplate {
    #[serde(rename = "@media", skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(rename = "@initialization", skip_serializing_if = "Option::is_none")]
    pub initialization: Option<String>,
    #[serde(rename = "@timescale", skip_serializing_if = "Option::is_none")]
    pub timescale: Option<u64>,
    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(
        rename = "@presentationTimeOffset",
        skip_serializing_if = "Option::is_none"
    )]
    pub presentation_time_offset: Option<u64>,
    #[serde(rename = "@startNumber", skip_serializing_if = "Option::is_none")]
    pub start_number: Option<u64>,
    #[serde(
        rename = "@availabilityTimeOffset",
        skip_serializing_if = "Option::is_none"
    )]
    pub availability_time_offset: Option<f64>,
    #[serde(rename = "SegmentTimeline", skip_serializing_if = "Option::is_none")]
    pub segment_timeline: Option<SegmentTimeline>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SegmentTimeline {
    #[serde(rename = "S", default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<S>,
}

/// One run-length entry: at tick `t` a segment of duration `d` begins,
/// repeated `r + 1` times back to back.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct S {
    #[serde(rename = "@t", skip_serializing_if = "Option::is_none")]
    pub t: Option<u64>,
    #[serde(rename = "@d")]
    pub d: u64,
    #[serde(rename = "@r", skip_serializing_if = "Option::is_none")]
    pub r: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventStream {
    #[serde(rename = "@schemeIdUri", skip_serializing_if = "Option::is_none")]
    pub scheme_id_uri: Option<String>,
    #[serde(rename = "@value", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "@timescale", skip_serializing_if = "Option::is_none")]
    pub timescale: Option<u64>,
    #[serde(
        rename = "@presentationTimeOffset",
        skip_serializing_if = "Option::is_none"
    )]
    pub presentation_time_offset: Option<u64>,
    #[serde(rename = "Event", default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Event {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(
        rename = "@presentationTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub presentation_time: Option<u64>,
    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Opaque payload; dropped once the event has been deduplicated into a
    /// recording.
    #[serde(rename = "$text", default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Parse a manifest from its XML text.
pub fn parse(xml: &str) -> ReliveResult<MPD> {
    Ok(quick_xml::de::from_str(xml)?)
}

impl MPD {
    /// Serialize back to XML, with declaration.
    pub fn to_xml(&self) -> ReliveResult<String> {
        let body = quick_xml::se::to_string(self)?;
        Ok(format!("{XML_DECL}\n{body}"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeDelta;

    pub(crate) const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="2025-03-01T09:00:00Z" publishTime="2025-03-01T10:00:00Z" minimumUpdatePeriod="PT2S" timeShiftBufferDepth="PT25S">
  <Period id="p0" start="PT0S">
    <BaseURL>dash/</BaseURL>
    <AdaptationSet id="1" mimeType="video/mp4" codecs="avc1.64001f" segmentAlignment="true">
      <SegmentTemplate media="video/$RepresentationID$/$Time$.m4s" initialization="video/$RepresentationID$/init.mp4" timescale="90000" presentationTimeOffset="900000" startNumber="10">
        <SegmentTimeline>
          <S t="900000" d="172800" r="2"/>
          <S d="172800"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" bandwidth="2500000" width="1280" height="720"/>
      <Representation id="v1" bandwidth="5000000" width="1920" height="1080"/>
    </AdaptationSet>
    <EventStream schemeIdUri="urn:scte:scte35:2014:xml+bin" timescale="90000">
      <Event id="7" presentationTime="1800000" duration="900000"/>
    </EventStream>
  </Period>
</MPD>"#;

    #[test]
    fn parses_the_interesting_fields() {
        let mpd = parse(SAMPLE).unwrap();
        assert_eq!(mpd.mpd_type.as_deref(), Some("dynamic"));
        assert_eq!(
            mpd.time_shift_buffer_depth,
            Some(XsDuration(TimeDelta::seconds(25)))
        );
        let period = &mpd.periods[0];
        assert_eq!(period.id.as_deref(), Some("p0"));
        assert_eq!(period.base_urls[0].base, "dash/");
        let set = &period.adaptation_sets[0];
        assert_eq!(set.mime_type.as_deref(), Some("video/mp4"));
        let st = set.segment_template.as_ref().unwrap();
        assert_eq!(st.timescale, Some(90_000));
        assert_eq!(st.presentation_time_offset, Some(900_000));
        let timeline = st.segment_timeline.as_ref().unwrap();
        assert_eq!(timeline.segments.len(), 2);
        assert_eq!(timeline.segments[0].t, Some(900_000));
        assert_eq!(timeline.segments[0].r, Some(2));
        assert_eq!(timeline.segments[1].t, None);
        let es = &period.event_streams[0];
        assert_eq!(es.events[0].id, Some(7));
        assert_eq!(es.events[0].presentation_time, Some(1_800_000));
    }

    #[test]
    fn round_trip_is_structurally_equal() {
        let mpd = parse(SAMPLE).unwrap();
        let again = parse(&mpd.to_xml().unwrap()).unwrap();
        assert_eq!(mpd, again);
    }

    #[test]
    fn zero_valued_optionals_survive() {
        let mut mpd = parse(SAMPLE).unwrap();
        mpd.periods[0].start = Some(XsDuration::default());
        mpd.periods[0].adaptation_sets[0]
            .segment_template
            .as_mut()
            .unwrap()
            .presentation_time_offset = Some(0);
        let xml = mpd.to_xml().unwrap();
        assert!(xml.contains(r#"start="PT0S""#));
        assert!(xml.contains(r#"presentationTimeOffset="0""#));
        assert_eq!(parse(&xml).unwrap(), mpd);
    }
}
