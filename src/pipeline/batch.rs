//! Parallel fan-out over per-entity files.
//!
//! Each file is one work unit run on the blocking pool. Units never share
//! mutable state; the merge into one summary happens after all of them
//! finish. Cancellation is checked before a unit starts, never mid-unit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::EntityPipeline;
use crate::config::PipelineConfig;
use crate::detect::AnomalyRecord;
use crate::{ingest, report};
use crate::summary::{summarize_records, Summary};

/// A batch of per-entity files for one counter.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub units: Vec<PathBuf>,
    pub counter: String,
    pub config: PipelineConfig,
    /// When set, each unit writes `<file stem>_<counter>.csv` here.
    pub output_dir: Option<PathBuf>,
    /// Write the compact record layout instead of the full one.
    pub compact: bool,
}

/// Sent after every finished unit, in completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub counter: String,
    pub succeeded: usize,
    /// Failed units and the reason, sorted by path.
    pub failed: Vec<(PathBuf, String)>,
    /// True when some units were skipped due to cancellation.
    pub cancelled: bool,
    /// Anomaly records of all successful units, grouped by entity.
    pub records: Vec<AnomalyRecord>,
    pub summary: Summary,
    pub elapsed: Duration,
}

/// What a finished unit hands to the merge; the scored table stays behind.
struct UnitResult {
    /// Input file stem.
    unit: String,
    entity_id: String,
    records: Vec<AnomalyRecord>,
}

enum UnitOutcome {
    Done(UnitResult),
    Failed(String),
    Skipped,
}

/// Output file for the anomaly records of the input file with stem `unit`.
pub fn record_path(dir: &Path, unit: &str, counter: &str) -> PathBuf {
    dir.join(format!("{unit}_{counter}.csv"))
}

fn process_unit(pipeline: &EntityPipeline, job: &BatchJob, path: &Path) -> Result<UnitResult> {
    let entity = pipeline.run_file(path, &job.counter)?;
    let unit = ingest::entity_from_path(path);
    if let Some(dir) = &job.output_dir {
        let out = record_path(dir, &unit, &job.counter);
        if job.compact {
            report::write_compact_records_file(&out, &job.counter, &entity.records)?;
        } else {
            report::write_records_file(&out, &job.counter, entity.table.rolling, &entity.records)?;
        }
        debug!(path = %out.display(), records = entity.records.len(), "wrote anomaly records");
    }
    Ok(UnitResult {
        unit,
        entity_id: entity.entity_id,
        records: entity.records,
    })
}

/// Run every unit of `job`, at most `config.batch.workers` at a time.
///
/// A failing unit is logged and listed in the report but never aborts its
/// siblings. `progress`, when given, receives one event per finished unit.
pub async fn run_batch(
    job: BatchJob,
    cancel: CancellationToken,
    progress: Option<mpsc::Sender<BatchProgress>>,
) -> Result<BatchReport> {
    job.config.validate().context("Invalid pipeline configuration")?;
    let pipeline = EntityPipeline::new(&job.config);
    run_batch_with(job, pipeline, cancel, progress).await
}

/// [`run_batch`] with a caller-built per-entity pipeline.
pub(crate) async fn run_batch_with(
    job: BatchJob,
    pipeline: EntityPipeline,
    cancel: CancellationToken,
    progress: Option<mpsc::Sender<BatchProgress>>,
) -> Result<BatchReport> {

    let run_id = Uuid::new_v4();
    let started = Instant::now();
    let total = job.units.len();
    let workers = job.config.batch.effective_workers();
    info!(%run_id, units = total, workers, counter = %job.counter, "starting batch");

    if let Some(dir) = &job.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }

    let job = Arc::new(job);
    let pipeline = Arc::new(pipeline);
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    for path in job.units.iter().cloned() {
        let job = job.clone();
        let pipeline = pipeline.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();

        set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (path, UnitOutcome::Skipped),
            };
            if cancel.is_cancelled() {
                return (path, UnitOutcome::Skipped);
            }

            let unit = path.clone();
            let joined = tokio::task::spawn_blocking(move || process_unit(&pipeline, &job, &unit)).await;
            let outcome = match joined {
                Ok(Ok(result)) => UnitOutcome::Done(result),
                Ok(Err(e)) => UnitOutcome::Failed(format!("{e:#}")),
                Err(e) => UnitOutcome::Failed(format!("worker panicked: {e}")),
            };
            (path, outcome)
        });
    }

    let mut units = Vec::new();
    let mut failed = Vec::new();
    let mut skipped = 0usize;
    let mut completed = 0usize;

    while let Some(joined) = set.join_next().await {
        let (path, outcome) = match joined {
            Ok(result) => result,
            Err(e) => {
                error!(%run_id, error = %e, "batch task aborted");
                continue;
            }
        };

        match outcome {
            UnitOutcome::Done(result) => units.push(result),
            UnitOutcome::Failed(reason) => {
                error!(%run_id, path = %path.display(), error = %reason, "work unit failed");
                failed.push((path, reason));
            }
            UnitOutcome::Skipped => {
                skipped += 1;
                continue;
            }
        }

        completed += 1;
        if let Some(tx) = &progress {
            let event = BatchProgress {
                completed,
                total,
                succeeded: units.len(),
            };
            if tx.send(event).await.is_err() {
                debug!(%run_id, "progress receiver dropped");
            }
        }
    }

    if skipped > 0 {
        warn!(%run_id, skipped, "batch cancelled before all units started");
    }

    // Completion order is arbitrary; merge in a stable order.
    units.sort_by(|a, b| (&a.entity_id, &a.unit).cmp(&(&b.entity_id, &b.unit)));
    failed.sort();

    let succeeded = units.len();
    let records: Vec<AnomalyRecord> = units.into_iter().flat_map(|u| u.records).collect();
    let summary = summarize_records(&records, &job.config.window);

    let report = BatchReport {
        run_id,
        counter: job.counter.clone(),
        succeeded,
        failed,
        cancelled: skipped > 0,
        records,
        summary,
        elapsed: started.elapsed(),
    };

    info!(
        %run_id,
        succeeded = report.succeeded,
        failed = report.failed.len(),
        anomalies = report.records.len(),
        plateaus = report.summary.plateaus.len(),
        "batch complete"
    );
    Ok(report)
}
