//! Pairwise comparison of successive manifest snapshots.
//!
//! The differ latches the availability start time on the first update, then
//! matches periods, adaptation sets, representations and events between the
//! previous and the current snapshot, logging what changed and firing the
//! registered callbacks for new periods and events.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::mpd::walk::{
    adaptation_set_by_id, availability_start, event_by_scheme_id, period_by_id,
    period_start_offset, representation_by_id, template_extent,
};
use crate::mpd::{AdaptationSet, Event, Period, Representation, SegmentTemplate, MPD};
use crate::timing::{round, ticks_to_duration};
use crate::ReliveResult;

type PeriodCallback = Box<dyn Fn(&MPD, &Period) + Send + Sync>;
type EventCallback = Box<dyn Fn(&Event, &str, DateTime<Utc>, TimeDelta) + Send + Sync>;

#[derive(Default)]
pub struct MpdDiffer {
    last: Option<MPD>,
    ast: DateTime<Utc>,
    on_new_period: Vec<PeriodCallback>,
    on_new_event: Vec<EventCallback>,
}

impl MpdDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The availability start time latched from the first manifest.
    pub fn ast(&self) -> DateTime<Utc> {
        self.ast
    }

    /// Register a callback fired for every period not present in the
    /// previous snapshot, in document order.
    pub fn add_on_new_period(&mut self, cb: impl Fn(&MPD, &Period) + Send + Sync + 'static) {
        self.on_new_period.push(Box::new(cb));
    }

    /// Register a callback fired for every event not present in the
    /// previous snapshot, with its wall-clock start and duration.
    pub fn add_on_new_event(
        &mut self,
        cb: impl Fn(&Event, &str, DateTime<Utc>, TimeDelta) + Send + Sync + 'static,
    ) {
        self.on_new_event.push(Box::new(cb));
    }

    /// Feed the next snapshot. The first call latches the availability
    /// start time and reports every period as new.
    pub fn update(&mut self, mpd: &MPD) -> ReliveResult<()> {
        let Some(old) = self.last.take() else {
            self.ast = availability_start(mpd);
            for period in &mpd.periods {
                self.add_period(period);
                for cb in &self.on_new_period {
                    cb(mpd, period);
                }
            }
            self.last = Some(mpd.clone());
            return Ok(());
        };

        for old_period in &old.periods {
            match period_by_id(&mpd.periods, old_period.id.as_deref()) {
                Some(current) => self.diff_period(old_period, current),
                None => debug!(
                    "period id {} gone",
                    old_period.id.as_deref().unwrap_or_default()
                ),
            }
        }
        for period in &mpd.periods {
            if period_by_id(&old.periods, period.id.as_deref()).is_none() {
                for cb in &self.on_new_period {
                    cb(mpd, period);
                }
            }
        }

        self.last = Some(mpd.clone());
        Ok(())
    }

    fn add_period(&self, period: &Period) {
        let period_start = self.ast + period_start_offset(period);
        for set in &period.adaptation_sets {
            debug!(
                "new adaptation set {}",
                set.id.as_deref().unwrap_or_default()
            );
            self.add_adaptation_set(set, period_start);
        }
        self.fire_events(period, period_start, |_, _| true);
    }

    fn add_adaptation_set(&self, set: &AdaptationSet, period_start: DateTime<Utc>) {
        for representation in &set.representations {
            debug!(
                "new representation {}",
                representation.id.as_deref().unwrap_or_default()
            );
        }
        let label = set_label(set);
        if let Some(st) = &set.segment_template {
            if let Some((from, to)) = template_extent(st, period_start) {
                debug!("{label}: dropped {:>8} added {:>8}", "", round(to - from));
            }
        }
    }

    fn diff_period(&self, old: &Period, current: &Period) {
        let period_start = self.ast + period_start_offset(current);

        for (index, old_set) in old.adaptation_sets.iter().enumerate() {
            // Identity falls back to the position within the parent when the
            // id is absent.
            let matched = if old_set.id.is_none() {
                current.adaptation_sets.get(index)
            } else {
                adaptation_set_by_id(&current.adaptation_sets, old_set.id.as_deref())
            };
            match matched {
                Some(current_set) => {
                    self.diff_adaptation_set(old_set, current_set, period_start)
                }
                None => warn!(
                    "adaptation set id {} gone",
                    old_set.id.as_deref().unwrap_or_default()
                ),
            }
        }
        for set in &current.adaptation_sets {
            if adaptation_set_by_id(&old.adaptation_sets, set.id.as_deref()).is_none() {
                debug!(
                    "new adaptation set {}",
                    set.id.as_deref().unwrap_or_default()
                );
            }
        }

        for old_stream in &old.event_streams {
            for old_event in &old_stream.events {
                if event_by_scheme_id(
                    &current.event_streams,
                    old_stream.scheme_id_uri.as_deref(),
                    old_event.id.unwrap_or(0),
                )
                .is_none()
                {
                    debug!(
                        "event {}:{} gone",
                        old_stream.scheme_id_uri.as_deref().unwrap_or_default(),
                        old_event.id.unwrap_or(0)
                    );
                }
            }
        }
        self.fire_events(current, period_start, |scheme, event| {
            event_by_scheme_id(&old.event_streams, Some(scheme), event.id.unwrap_or(0)).is_none()
        });
    }

    /// Fire `on_new_event` for every event of the period accepted by
    /// `wanted`, mapping presentation times onto the wall clock.
    fn fire_events(
        &self,
        period: &Period,
        period_start: DateTime<Utc>,
        wanted: impl Fn(&str, &Event) -> bool,
    ) {
        for stream in &period.event_streams {
            let scheme = stream.scheme_id_uri.as_deref().unwrap_or_default();
            let timescale = stream.timescale.unwrap_or(0);
            let pto = stream.presentation_time_offset.unwrap_or(0);
            for event in &stream.events {
                if !wanted(scheme, event) {
                    continue;
                }
                let ticks = event.presentation_time.unwrap_or(0) as i64 - pto as i64;
                let at = period_start + ticks_to_duration(ticks, timescale);
                let duration =
                    ticks_to_duration(event.duration.unwrap_or(0) as i64, timescale);
                for cb in &self.on_new_event {
                    cb(event, scheme, at, duration);
                }
            }
        }
    }

    fn diff_adaptation_set(
        &self,
        old: &AdaptationSet,
        current: &AdaptationSet,
        period_start: DateTime<Utc>,
    ) {
        for old_rep in &old.representations {
            match representation_by_id(&current.representations, old_rep.id.as_deref()) {
                Some(current_rep) => {
                    self.diff_representation(old_rep, current_rep, period_start)
                }
                None => warn!(
                    "representation {} gone",
                    old_rep.id.as_deref().unwrap_or_default()
                ),
            }
        }
        for rep in &current.representations {
            if representation_by_id(&old.representations, rep.id.as_deref()).is_none() {
                debug!("new representation {}", rep.id.as_deref().unwrap_or_default());
            }
        }
        self.diff_segment_template(
            old.segment_template.as_ref(),
            current.segment_template.as_ref(),
            period_start,
            &set_label(current),
        );
    }

    fn diff_representation(
        &self,
        old: &Representation,
        current: &Representation,
        period_start: DateTime<Utc>,
    ) {
        let label = format!("rep: {}", current.id.as_deref().unwrap_or_default());
        self.diff_segment_template(
            old.segment_template.as_ref(),
            current.segment_template.as_ref(),
            period_start,
            &label,
        );
    }

    /// Compare the time extents of two segment templates and log the
    /// dropped and added windows.
    fn diff_segment_template(
        &self,
        old: Option<&SegmentTemplate>,
        current: Option<&SegmentTemplate>,
        period_start: DateTime<Utc>,
        label: &str,
    ) {
        let old_extent = old.and_then(|st| template_extent(st, period_start));
        let current_extent = current.and_then(|st| template_extent(st, period_start));
        let ((of, ot), (cf, ct)) = match (old_extent, current_extent) {
            (Some(old), Some(current)) => (old, current),
            _ => return,
        };
        if cf != of || ot != ct {
            debug!(
                "{label}: dropped {:>8} added {:>8}",
                round(cf - of),
                round(ct - ot)
            );
        }
    }
}

fn set_label(set: &AdaptationSet) -> String {
    format!(
        "AS{:>2}:{:>15}:{:<15}",
        set.id.as_deref().unwrap_or_default(),
        set.mime_type.as_deref().unwrap_or_default(),
        set.codecs.as_deref().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpd::parse;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn snapshot(events: &str) -> MPD {
        let xml = format!(
            r#"<MPD type="dynamic" availabilityStartTime="2025-03-01T09:00:00Z">
              <Period id="p0" start="PT30S">
                <AdaptationSet id="1" mimeType="video/mp4">
                  <SegmentTemplate media="$Time$.m4s" timescale="10">
                    <SegmentTimeline><S t="0" d="10" r="4"/></SegmentTimeline>
                  </SegmentTemplate>
                  <Representation id="v0" bandwidth="1000"/>
                </AdaptationSet>
                <EventStream schemeIdUri="urn:scte:scte35:2014:xml+bin" timescale="10" presentationTimeOffset="100">
                  {events}
                </EventStream>
              </Period>
            </MPD>"#
        );
        parse(&xml).unwrap()
    }

    #[test]
    fn first_update_latches_and_fires_periods() {
        let mut differ = MpdDiffer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        differ.add_on_new_period(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mpd = snapshot("");
        differ.update(&mpd).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(
            differ.ast(),
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
        );

        // The same snapshot again fires nothing.
        differ.update(&mpd).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_events_fire_with_wall_clock_mapping() {
        let mut differ = MpdDiffer::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        differ.add_on_new_event(move |event, scheme, at, duration| {
            sink.lock()
                .unwrap()
                .push((event.id, scheme.to_string(), at, duration));
        });

        differ.update(&snapshot("")).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        differ
            .update(&snapshot(
                r#"<Event id="9" presentationTime="150" duration="20"/>"#,
            ))
            .unwrap();
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        let (id, scheme, at, duration) = &events[0];
        assert_eq!(*id, Some(9));
        assert_eq!(scheme, "urn:scte:scte35:2014:xml+bin");
        // period start 09:00:30, (150 - 100) / 10 = 5 s in.
        assert_eq!(*at, Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 35).unwrap());
        assert_eq!(*duration, TimeDelta::seconds(2));
    }

    #[test]
    fn known_events_do_not_refire() {
        let mut differ = MpdDiffer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        differ.add_on_new_event(move |_, _, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let with_event = snapshot(r#"<Event id="9" presentationTime="150"/>"#);
        differ.update(&with_event).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        differ.update(&with_event).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_period_fires_on_later_updates() {
        let mut differ = MpdDiffer::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        differ.add_on_new_period(move |_, period| {
            sink.lock().unwrap().push(period.id.clone());
        });
        differ.update(&snapshot("")).unwrap();

        let mut two_periods = snapshot("");
        let mut second = two_periods.periods[0].clone();
        second.id = Some("p1".to_string());
        two_periods.periods.push(second);
        differ.update(&two_periods).unwrap();

        let ids = fired.lock().unwrap();
        assert_eq!(*ids, vec![Some("p0".to_string()), Some("p1".to_string())]);
    }
}
