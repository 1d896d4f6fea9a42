//! Per-entity, per-day roll-up of anomaly records.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use super::classifier::classify;
use crate::config::WindowPolicy;
use crate::detect::AnomalyRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayCounts {
    pub anomalies: usize,
    pub bursts: usize,
    pub plateaus: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateauInterval {
    pub entity_id: String,
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_minutes: f64,
    pub anomaly_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub entity_id: String,
    /// Aligned with [`SummaryTable::dates`].
    pub days: Vec<DayCounts>,
}

/// Wide table: one row per entity, one column group per observed date.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryTable {
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn get(&self, entity_id: &str, date: NaiveDate) -> Option<DayCounts> {
        let col = self.dates.binary_search(&date).ok()?;
        self.rows
            .iter()
            .find(|r| r.entity_id == entity_id)
            .map(|r| r.days[col])
    }

    /// `proxyid`, the raw-count date columns, then `<date>_bursts`, then
    /// `<date>_plateaus`.
    pub fn header(&self) -> Vec<String> {
        let mut header = vec!["proxyid".to_string()];
        header.extend(self.dates.iter().map(|d| d.to_string()));
        header.extend(self.dates.iter().map(|d| format!("{d}_bursts")));
        header.extend(self.dates.iter().map(|d| format!("{d}_plateaus")));
        header
    }

    /// Rows laid out to match [`Self::header`].
    pub fn records(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                let mut cells = vec![row.entity_id.clone()];
                cells.extend(row.days.iter().map(|d| d.anomalies.to_string()));
                cells.extend(row.days.iter().map(|d| d.bursts.to_string()));
                cells.extend(row.days.iter().map(|d| d.plateaus.to_string()));
                cells
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub table: SummaryTable,
    /// Sorted by entity, date, then start.
    pub plateaus: Vec<PlateauInterval>,
}

/// Roll `(entity_id, timestamp)` anomaly points up into a [`Summary`].
pub fn summarize<I>(points: I, policy: &WindowPolicy) -> Summary
where
    I: IntoIterator<Item = (String, NaiveDateTime)>,
{
    let mut groups: BTreeMap<(String, NaiveDate), Vec<NaiveDateTime>> = BTreeMap::new();
    for (entity_id, ts) in points {
        groups.entry((entity_id, ts.date())).or_default().push(ts);
    }

    let dates: Vec<NaiveDate> = groups
        .keys()
        .map(|(_, d)| *d)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut per_entity: BTreeMap<String, Vec<DayCounts>> = BTreeMap::new();
    let mut plateaus = Vec::new();

    for ((entity_id, date), timestamps) in &groups {
        let events = classify(timestamps, policy);
        let col = dates.binary_search(date).unwrap_or_default();

        let days = per_entity
            .entry(entity_id.clone())
            .or_insert_with(|| vec![DayCounts::default(); dates.len()]);
        days[col] = DayCounts {
            anomalies: timestamps.len(),
            bursts: events.burst_count(),
            plateaus: events.plateau_count(),
        };

        plateaus.extend(events.plateaus().map(|c| PlateauInterval {
            entity_id: entity_id.clone(),
            date: *date,
            start: c.start,
            end: c.end,
            duration_minutes: c.duration_minutes(),
            anomaly_count: c.count(),
        }));
    }

    plateaus.sort_by(|a, b| {
        (&a.entity_id, a.date, a.start).cmp(&(&b.entity_id, b.date, b.start))
    });

    let rows = per_entity
        .into_iter()
        .map(|(entity_id, days)| SummaryRow { entity_id, days })
        .collect();

    Summary {
        table: SummaryTable { dates, rows },
        plateaus,
    }
}

/// [`summarize`] over extracted anomaly records.
pub fn summarize_records(records: &[AnomalyRecord], policy: &WindowPolicy) -> Summary {
    summarize(
        records
            .iter()
            .filter(|r| r.is_anomaly)
            .map(|r| (r.entity_id.clone(), r.timestamp)),
        policy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, m, 0).unwrap()
    }

    fn points(entity: &str, ts: &[NaiveDateTime]) -> Vec<(String, NaiveDateTime)> {
        ts.iter().map(|t| (entity.to_string(), *t)).collect()
    }

    #[test]
    fn test_missing_days_fill_zero() {
        let mut input = points("A", &[at(15, 10, 0), at(16, 10, 0)]);
        input.extend(points("B", &[at(16, 11, 0)]));
        let summary = summarize(input, &WindowPolicy::default());

        assert_eq!(summary.table.dates, vec![day(15), day(16)]);
        assert_eq!(summary.table.get("B", day(15)), Some(DayCounts::default()));
        assert_eq!(summary.table.get("B", day(16)).unwrap().anomalies, 1);
        assert_eq!(summary.table.get("C", day(16)), None);
    }

    #[test]
    fn test_bursts_and_plateaus_counted_per_day() {
        let mut ts: Vec<_> = (0..3).map(|m| at(15, 10, m)).collect();
        ts.extend((0..10).map(|m| at(15, 14, m)));
        ts.extend((0..12).map(|i| at(16, 9, 0) + Duration::seconds(30 * i)));
        let summary = summarize(points("X", &ts), &WindowPolicy::default());

        let d15 = summary.table.get("X", day(15)).unwrap();
        assert_eq!(d15, DayCounts { anomalies: 13, bursts: 1, plateaus: 1 });
        let d16 = summary.table.get("X", day(16)).unwrap();
        assert_eq!(d16, DayCounts { anomalies: 12, bursts: 0, plateaus: 1 });

        assert_eq!(summary.plateaus.len(), 2);
        assert_eq!(summary.plateaus[0].date, day(15));
        assert_eq!(summary.plateaus[0].anomaly_count, 10);
        assert_eq!(summary.plateaus[1].duration_minutes, 5.5);
    }

    #[test]
    fn test_windows_do_not_cross_midnight() {
        let ts = vec![at(15, 23, 58), at(15, 23, 59), at(16, 0, 0), at(16, 0, 1)];
        let summary = summarize(points("X", &ts), &WindowPolicy::default());
        assert_eq!(summary.table.get("X", day(15)).unwrap().bursts, 0);
        assert_eq!(summary.table.get("X", day(16)).unwrap().bursts, 0);
    }

    #[test]
    fn test_wide_layout() {
        let mut input = points("B", &[at(16, 1, 0)]);
        input.extend(points("A", &[at(15, 1, 0), at(15, 1, 1), at(15, 1, 2)]));
        let summary = summarize(input, &WindowPolicy::default());

        assert_eq!(
            summary.table.header(),
            vec![
                "proxyid",
                "2024-01-15",
                "2024-01-16",
                "2024-01-15_bursts",
                "2024-01-16_bursts",
                "2024-01-15_plateaus",
                "2024-01-16_plateaus",
            ]
        );
        let records = summary.table.records();
        assert_eq!(records[0], vec!["A", "3", "0", "1", "0", "0", "0"]);
        assert_eq!(records[1], vec!["B", "0", "1", "0", "0", "0", "0"]);
    }

    #[test]
    fn test_plateaus_sorted_by_entity_then_date() {
        let mut input = points("Z", &(0..10).map(|m| at(15, 5, m)).collect::<Vec<_>>());
        input.extend(points("A", &(0..10).map(|m| at(16, 5, m)).collect::<Vec<_>>()));
        input.extend(points("A", &(0..10).map(|m| at(15, 20, m)).collect::<Vec<_>>()));
        let summary = summarize(input, &WindowPolicy::default());
        let keys: Vec<_> = summary
            .plateaus
            .iter()
            .map(|p| (p.entity_id.as_str(), p.date))
            .collect();
        assert_eq!(keys, vec![("A", day(15)), ("A", day(16)), ("Z", day(15))]);
    }

    #[test]
    fn test_empty_input() {
        let summary = summarize(Vec::new(), &WindowPolicy::default());
        assert!(summary.table.rows.is_empty());
        assert!(summary.table.dates.is_empty());
        assert!(summary.plateaus.is_empty());
    }
}
