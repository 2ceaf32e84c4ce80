//! Announced splice boundaries (SCTE-35 markers) awaiting correlation with
//! segment boundaries.

use chrono::{DateTime, TimeDelta, Utc};

/// Splices older than this are dropped on [`SpliceList::expire`].
fn expiration_timeout() -> TimeDelta {
    TimeDelta::minutes(1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpliceEvent {
    pub at: DateTime<Utc>,
    pub id: String,
}

#[derive(Debug, Default)]
pub struct SpliceList {
    events: Vec<SpliceEvent>,
}

impl SpliceList {
    /// Record a splice boundary unless the instant is already known.
    pub fn add_if_new(&mut self, at: DateTime<Utc>, id: impl Into<String>) -> bool {
        if self.events.iter().any(|e| e.at == at) {
            return false;
        }
        self.events.push(SpliceEvent { at, id: id.into() });
        true
    }

    /// Drop events that ended more than the expiration timeout ago.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        let cutoff = now - expiration_timeout();
        self.events.retain(|e| e.at >= cutoff);
    }

    /// The first splice within `[from, to]`, if any.
    pub fn first_in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<&SpliceEvent> {
        self.events.iter().find(|e| e.at >= from && e.at <= to)
    }

    /// All splices within `[from, to]`.
    pub fn in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Iterator<Item = &SpliceEvent> {
        self.events.iter().filter(move |e| e.at >= from && e.at <= to)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_instants_are_ignored() {
        let mut list = SpliceList::default();
        let at = Utc::now();
        assert!(list.add_if_new(at, "evid_1"));
        assert!(!list.add_if_new(at, "evid_1"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn expiry_drops_old_events() {
        let mut list = SpliceList::default();
        let now = Utc::now();
        list.add_if_new(now - TimeDelta::minutes(5), "old");
        list.add_if_new(now + TimeDelta::seconds(10), "upcoming");
        list.expire(now);
        assert_eq!(list.len(), 1);
        assert!(list
            .first_in_range(now, now + TimeDelta::minutes(1))
            .is_some());
    }

    #[test]
    fn range_queries_are_inclusive() {
        let mut list = SpliceList::default();
        let now = Utc::now();
        list.add_if_new(now, "a");
        list.add_if_new(now + TimeDelta::seconds(30), "b");
        assert_eq!(list.in_range(now, now + TimeDelta::seconds(30)).count(), 2);
        assert_eq!(
            list.in_range(now + TimeDelta::seconds(1), now + TimeDelta::seconds(29))
                .count(),
            0
        );
    }
}
