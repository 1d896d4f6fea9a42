//! Greedy windowed clustering of one entity-day's anomaly timestamps.
//!
//! The scan walks anomalies in time order. Each not-yet-consumed anomaly
//! anchors a right-open window `[t, t + minutes)`; if enough anomalies fall
//! in it, the window becomes a burst or plateau and all of its members are
//! consumed. Anchors that fail the burst threshold are left unconsumed and
//! may still join a later window. The result depends on scan order and is
//! not a globally optimal clustering.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::config::WindowPolicy;

/// Anomalies grouped by one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    /// Earliest member timestamp.
    pub start: NaiveDateTime,
    /// Latest member timestamp.
    pub end: NaiveDateTime,
    /// Indices into the classified slice.
    pub members: Vec<usize>,
}

impl Cluster {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn duration_minutes(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 60_000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Burst(Cluster),
    Plateau(Cluster),
}

impl Event {
    pub fn cluster(&self) -> &Cluster {
        match self {
            Event::Burst(c) | Event::Plateau(c) => c,
        }
    }
}

/// Events found on one entity-day, in scan order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DayEvents {
    pub events: Vec<Event>,
}

impl DayEvents {
    pub fn burst_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Burst(_)))
            .count()
    }

    pub fn plateau_count(&self) -> usize {
        self.plateaus().count()
    }

    pub fn plateaus(&self) -> impl Iterator<Item = &Cluster> {
        self.events.iter().filter_map(|e| match e {
            Event::Plateau(c) => Some(c),
            Event::Burst(_) => None,
        })
    }
}

/// Classify the anomaly timestamps of a single entity on a single day.
///
/// `timestamps` need not be sorted; they are ordered stably before scanning.
pub fn classify(timestamps: &[NaiveDateTime], policy: &WindowPolicy) -> DayEvents {
    let mut order: Vec<usize> = (0..timestamps.len()).collect();
    order.sort_by_key(|&i| timestamps[i]);
    let sorted: Vec<NaiveDateTime> = order.iter().map(|&i| timestamps[i]).collect();

    let span = Duration::minutes(policy.minutes);
    let mut consumed = vec![false; sorted.len()];
    let mut events = Vec::new();

    for pos in 0..sorted.len() {
        if consumed[pos] {
            continue;
        }
        let anchor = sorted[pos];
        let limit = anchor + span;

        // Sorted input makes the window's members one contiguous run. It can
        // start before `pos` when earlier anchors share this timestamp.
        let lo = sorted.partition_point(|t| *t < anchor);
        let hi = sorted.partition_point(|t| *t < limit);
        let n = hi - lo;

        let plateau = n >= policy.plateau_threshold;
        if !plateau && n < policy.burst_threshold {
            continue;
        }

        debug_assert!(consumed[lo..hi].iter().all(|c| !c));
        consumed[lo..hi].iter_mut().for_each(|c| *c = true);

        let cluster = Cluster {
            start: sorted[lo],
            end: sorted[hi - 1],
            members: order[lo..hi].to_vec(),
        };
        events.push(if plateau {
            Event::Plateau(cluster)
        } else {
            Event::Burst(cluster)
        });
    }

    DayEvents { events }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn policy() -> WindowPolicy {
        WindowPolicy::default()
    }

    #[test]
    fn test_empty_day() {
        let events = classify(&[], &policy());
        assert_eq!(events.burst_count(), 0);
        assert_eq!(events.plateau_count(), 0);
    }

    #[test]
    fn test_three_same_minute_is_burst() {
        let ts = vec![at(10, 0, 0); 3];
        let events = classify(&ts, &policy());
        assert_eq!(events.burst_count(), 1);
        assert_eq!(events.plateau_count(), 0);
    }

    #[test]
    fn test_two_is_nothing() {
        let events = classify(&[at(10, 0, 0), at(10, 1, 0)], &policy());
        assert!(events.events.is_empty());
    }

    #[test]
    fn test_ten_within_window_is_plateau() {
        let ts: Vec<_> = (0..10).map(|m| at(10, m, 0)).collect();
        let events = classify(&ts, &policy());
        assert_eq!(events.plateau_count(), 1);
        assert_eq!(events.burst_count(), 0);
        assert_eq!(events.plateaus().next().unwrap().count(), 10);
    }

    #[test]
    fn test_window_is_right_open() {
        // 10:10 is exactly one window past 10:00 and is excluded from it.
        let ts = vec![at(10, 0, 0), at(10, 5, 0), at(10, 10, 0)];
        let events = classify(&ts, &policy());
        assert!(events.events.is_empty());
    }

    #[test]
    fn test_failed_anchor_joins_later_window() {
        // From 10:00 only 2 fall in window; from 10:08 there are 3.
        let ts = vec![at(10, 0, 0), at(10, 8, 0), at(10, 12, 0), at(10, 17, 0)];
        let events = classify(&ts, &policy());
        assert_eq!(events.burst_count(), 1);
        let burst = events.events[0].cluster();
        assert_eq!(burst.members, vec![1, 2, 3]);
        assert_eq!(burst.start, at(10, 8, 0));
        assert_eq!(burst.end, at(10, 17, 0));
    }

    #[test]
    fn test_plateau_duration_minutes() {
        let mut ts: Vec<_> = (0..9).map(|s| at(10, 0, s)).collect();
        ts.push(at(10, 7, 0));
        let events = classify(&ts, &policy());
        let plateau = events.plateaus().next().unwrap();
        assert_eq!(plateau.duration_minutes(), 7.0);
    }

    #[test]
    fn test_twelve_at_thirty_seconds() {
        let ts: Vec<_> = (0..12).map(|i| at(9, 0, 0) + Duration::seconds(30 * i)).collect();
        let events = classify(&ts, &policy());
        assert_eq!(events.plateau_count(), 1);
        assert_eq!(events.burst_count(), 0);
        let plateau = events.plateaus().next().unwrap();
        assert_eq!(plateau.count(), 12);
        assert_eq!(plateau.duration_minutes(), 5.5);
    }

    #[test]
    fn test_unsorted_input_members_index_input() {
        let ts = vec![at(11, 2, 0), at(11, 0, 0), at(11, 1, 0)];
        let events = classify(&ts, &policy());
        let burst = events.events[0].cluster();
        assert_eq!(burst.members, vec![1, 2, 0]);
        assert_eq!(burst.start, at(11, 0, 0));
    }

    #[test]
    fn test_burst_then_plateau() {
        let mut ts: Vec<_> = (0..4).map(|m| at(8, m, 0)).collect();
        ts.extend((0..11).map(|m| at(9, m / 2, 0)));
        let events = classify(&ts, &policy());
        assert_eq!(events.burst_count(), 1);
        assert_eq!(events.plateau_count(), 1);
        assert!(matches!(events.events[0], Event::Burst(_)));
        assert!(matches!(events.events[1], Event::Plateau(_)));
    }
}
