//! Month-end aware outlier detection.
//!
//! End-of-month traffic runs at a different level from regular days, so the
//! two populations are scored by separate model fits and then merged back in
//! time order.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::{DetectError, IsolationForest, Label, ModelFactory, OutlierModel};
use crate::config::{DateRange, ModelParams};
use crate::features::{FeatureRow, FeatureTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Regular,
    MonthEnd,
}

impl Segment {
    pub const ALL: [Segment; 2] = [Segment::Regular, Segment::MonthEnd];

    pub fn of(row: &FeatureRow) -> Self {
        if row.calendar.is_month_end_window {
            Segment::MonthEnd
        } else {
            Segment::Regular
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Regular => write!(f, "regular"),
            Segment::MonthEnd => write!(f, "month_end"),
        }
    }
}

impl FromStr for Segment {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(Segment::Regular),
            "month_end" => Ok(Segment::MonthEnd),
            _ => Err(DetectError::UnknownSegment(s.to_string())),
        }
    }
}

/// A feature row with the detector's verdict attached.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRow {
    pub row: FeatureRow,
    pub segment: Segment,
    pub label: Label,
    pub is_anomaly: bool,
}

/// The full in-range table in chronological order, every row labelled.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredTable {
    pub counter: String,
    pub rolling: bool,
    pub rows: Vec<ScoredRow>,
}

impl ScoredTable {
    pub fn anomalies(&self) -> impl Iterator<Item = &ScoredRow> {
        self.rows.iter().filter(|r| r.is_anomaly)
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies().count()
    }
}

/// Applies a fresh outlier model to each calendar segment independently.
#[derive(Clone)]
pub struct SegmentedDetector {
    factory: ModelFactory,
}

impl std::fmt::Debug for SegmentedDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedDetector").finish_non_exhaustive()
    }
}

impl SegmentedDetector {
    /// Detector backed by an isolation forest per segment.
    pub fn new(params: ModelParams) -> Self {
        Self {
            factory: Arc::new(move || -> Box<dyn OutlierModel> {
                Box::new(IsolationForest::new(params.clone()))
            }),
        }
    }

    /// Detector backed by any model; `factory` is called once per segment.
    pub fn with_factory(factory: ModelFactory) -> Self {
        Self { factory }
    }

    /// Label every in-range row of `table`.
    ///
    /// Rows outside `range` are left out of both scoring and output. An empty
    /// segment is skipped; an empty table yields an empty result.
    pub fn detect(&self, table: &FeatureTable, range: &DateRange) -> Result<ScoredTable, DetectError> {
        let rows: Vec<&FeatureRow> = table
            .rows
            .iter()
            .filter(|r| range.contains(&r.observation.timestamp))
            .collect();

        let mut labels = vec![Label::Inlier; rows.len()];
        for segment in Segment::ALL {
            let members: Vec<usize> = (0..rows.len())
                .filter(|&i| Segment::of(rows[i]) == segment)
                .collect();
            if members.is_empty() {
                debug!(counter = %table.counter, %segment, "segment empty, skipping");
                continue;
            }

            let vectors: Vec<Vec<f64>> = members.iter().map(|&i| rows[i].vector()).collect();
            let mut model = (self.factory)();
            let verdicts = model.fit_predict(&vectors)?;
            if verdicts.len() != members.len() {
                return Err(DetectError::LabelCount {
                    expected: members.len(),
                    have: verdicts.len(),
                });
            }
            for (&i, verdict) in members.iter().zip(verdicts) {
                labels[i] = verdict;
            }

            debug!(
                counter = %table.counter,
                %segment,
                model = model.name(),
                rows = members.len(),
                anomalies = members.iter().filter(|&&i| labels[i].is_outlier()).count(),
                "segment scored"
            );
        }

        // `rows` is already chronological, so labelling in place keeps order.
        let rows = rows
            .into_iter()
            .zip(labels)
            .map(|(row, label)| ScoredRow {
                segment: Segment::of(row),
                is_anomaly: label.is_outlier(),
                label,
                row: row.clone(),
            })
            .collect();

        Ok(ScoredTable {
            counter: table.counter.clone(),
            rolling: table.rolling,
            rows,
        })
    }
}
