//! Per-entity feature construction.
//!
//! Turns a raw counter series into a chronologically ordered [`FeatureTable`]
//! holding calendar fields and, in rolling mode, a trailing z-score.

pub mod calendar;
pub mod rolling;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

use crate::config::{DateRange, FeatureConfig, FeatureMode};
pub use calendar::CalendarFields;

/// One row of a per-entity source before timestamp parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub timestamp: String,
    pub entity_id: String,
    /// `None` for an empty or non-numeric cell.
    pub value: Option<u64>,
}

/// A per-entity series as handed over by the ingest collaborator.
#[derive(Debug, Clone)]
pub struct RawSeries {
    pub entity_id: String,
    pub counter: String,
    /// False when the source had no column for `counter`.
    pub has_counter: bool,
    pub records: Vec<RawRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub entity_id: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub observation: Observation,
    pub calendar: CalendarFields,
    /// Present only when rolling statistics were computed.
    pub z_score: Option<f64>,
}

impl FeatureRow {
    /// Detector input: value, hour, day-of-week, weekend flag, then the
    /// z-score when present.
    pub fn vector(&self) -> Vec<f64> {
        let mut v = vec![
            self.observation.value as f64,
            f64::from(self.calendar.hour),
            f64::from(self.calendar.day_of_week),
            if self.calendar.is_weekend { 1.0 } else { 0.0 },
        ];
        if let Some(z) = self.z_score {
            v.push(z);
        }
        v
    }
}

/// Featurized series for one entity and one counter, sorted by timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureTable {
    pub counter: String,
    pub rolling: bool,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds feature tables according to a [`FeatureConfig`].
#[derive(Debug, Clone)]
pub struct Featurizer {
    config: FeatureConfig,
    range: DateRange,
}

impl Featurizer {
    pub fn new(config: FeatureConfig) -> Self {
        Self {
            config,
            range: DateRange::default(),
        }
    }

    /// Drop out-of-range observations before rolling statistics are taken,
    /// so the trailing window only sees in-range history.
    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Parse timestamps, zero-fill missing counter values, and featurize.
    ///
    /// Rows whose timestamp does not match the configured format are dropped.
    pub fn featurize_raw(&self, series: RawSeries) -> FeatureTable {
        let total = series.records.len();
        let has_counter = series.has_counter;
        let observations: Vec<Observation> = series
            .records
            .into_iter()
            .filter_map(|rec| {
                let timestamp =
                    NaiveDateTime::parse_from_str(rec.timestamp.trim(), &self.config.timestamp_format)
                        .ok()?;
                Some(Observation {
                    timestamp,
                    entity_id: rec.entity_id,
                    value: if has_counter { rec.value.unwrap_or(0) } else { 0 },
                })
            })
            .collect();

        let dropped = total - observations.len();
        if dropped > 0 {
            debug!(
                entity = %series.entity_id,
                dropped,
                format = %self.config.timestamp_format,
                "dropped rows with unparseable timestamps"
            );
        }
        self.featurize(series.counter, observations)
    }

    /// Featurize already-parsed observations.
    pub fn featurize(&self, counter: String, mut observations: Vec<Observation>) -> FeatureTable {
        if !self.range.is_unbounded() {
            observations.retain(|o| self.range.contains(&o.timestamp));
        }
        // Stable: equal timestamps keep their input order.
        observations.sort_by_key(|o| o.timestamp);

        let rolling = self.config.mode == FeatureMode::Rolling;
        let z_scores = if rolling {
            let values: Vec<f64> = observations.iter().map(|o| o.value as f64).collect();
            Some(rolling::rolling_z_scores(&values, self.config.rolling_window))
        } else {
            None
        };

        let rows = observations
            .into_iter()
            .enumerate()
            .map(|(i, observation)| FeatureRow {
                calendar: CalendarFields::from_timestamp(&observation.timestamp),
                z_score: z_scores.as_ref().map(|z| z[i]),
                observation,
            })
            .collect();

        FeatureTable {
            counter,
            rolling,
            rows,
        }
    }
}
