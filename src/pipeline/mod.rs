//! End-to-end runs: one entity at a time, or a directory fanned out in parallel.

pub mod batch;

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{DateRange, PipelineConfig, WindowPolicy};
use crate::detect::{extract_anomalies, AnomalyRecord, ScoredTable, SegmentedDetector};
use crate::features::{Featurizer, RawSeries};
use crate::ingest;
use crate::summary::{summarize_records, Summary};

pub use batch::{run_batch, BatchJob, BatchProgress, BatchReport};

/// Everything produced for one entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    pub entity_id: String,
    pub counter: String,
    /// Annotated in-range table, chronological.
    pub table: ScoredTable,
    pub records: Vec<AnomalyRecord>,
    pub summary: Summary,
}

/// Featurize, detect and summarize a single entity's series.
#[derive(Debug, Clone)]
pub struct EntityPipeline {
    featurizer: Featurizer,
    detector: SegmentedDetector,
    window: WindowPolicy,
    range: DateRange,
}

impl EntityPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            featurizer: Featurizer::new(config.features.clone()).with_range(config.range),
            detector: SegmentedDetector::new(config.model.clone()),
            window: config.window,
            range: config.range,
        }
    }

    /// Swap in a different detector, e.g. one backed by another model.
    pub fn with_detector(mut self, detector: SegmentedDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn run(&self, series: RawSeries) -> Result<EntityReport> {
        let fallback_id = series.entity_id.clone();
        let table = self.featurizer.featurize_raw(series);
        let entity_id = table
            .rows
            .first()
            .map(|r| r.observation.entity_id.clone())
            .unwrap_or(fallback_id);
        debug!(entity = %entity_id, rows = table.len(), rolling = table.rolling, "featurized");

        let scored = self
            .detector
            .detect(&table, &self.range)
            .with_context(|| format!("Detection failed for {entity_id}"))?;
        let records = extract_anomalies(&scored);
        let summary = summarize_records(&records, &self.window);

        info!(
            entity = %entity_id,
            counter = %scored.counter,
            rows = scored.rows.len(),
            anomalies = records.len(),
            plateaus = summary.plateaus.len(),
            "entity analysed"
        );

        Ok(EntityReport {
            entity_id,
            counter: scored.counter.clone(),
            table: scored,
            records,
            summary,
        })
    }

    pub fn run_file(&self, path: &Path, counter: &str) -> Result<EntityReport> {
        let series = ingest::read_series_file(path, counter)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if !series.has_counter {
            debug!(path = %path.display(), counter, "counter column absent, zero-filling");
        }
        self.run(series)
    }
}
