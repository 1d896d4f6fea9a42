//! proxywatch -- anomaly detection and burst/plateau summaries for proxy traffic counters.
//!
//! This crate provides the per-entity featurizer, the month-end segmented
//! outlier detector, the windowed burst/plateau classifier, and the batch
//! pipeline that fans a directory of per-proxy files out over a worker pool.

pub mod config;
pub mod detect;
pub mod entity;
pub mod features;
pub mod ingest;
pub mod pipeline;
pub mod report;
pub mod summary;

use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use config::PipelineConfig;
use pipeline::{BatchJob, BatchProgress, BatchReport};

/// File name of the wide per-day summary for `counter`.
pub fn summary_file_name(counter: &str) -> String {
    format!("{counter}_summary.csv")
}

/// File name of the plateau detail list for `counter`.
pub fn plateau_file_name(counter: &str) -> String {
    format!("{counter}_plateau_details.csv")
}

/// Analyse every `*.csv` in `input_dir` for `counter` and write per-proxy
/// anomaly files, the wide summary and the plateau details into `output_dir`.
pub async fn analyze_directory(
    input_dir: &Path,
    output_dir: &Path,
    counter: &str,
    config: PipelineConfig,
    compact: bool,
    cancel: CancellationToken,
    progress: Option<mpsc::Sender<BatchProgress>>,
) -> Result<BatchReport> {
    let units = ingest::list_csv_files(input_dir)
        .with_context(|| format!("Failed to list {}", input_dir.display()))?;
    if units.is_empty() {
        tracing::warn!(dir = %input_dir.display(), "no CSV files found");
    }

    let job = BatchJob {
        units,
        counter: counter.to_string(),
        config,
        output_dir: Some(output_dir.to_path_buf()),
        compact,
    };
    let report = pipeline::run_batch(job, cancel, progress).await?;

    report::write_summary_file(&output_dir.join(summary_file_name(counter)), &report.summary.table)?;
    report::write_plateaus_file(&output_dir.join(plateau_file_name(counter)), &report.summary.plateaus)?;
    tracing::info!(dir = %output_dir.display(), "wrote batch summary");

    Ok(report)
}

/// Re-summarize a directory of previously written anomaly files.
pub fn summarize_directory(input_dir: &Path, config: &PipelineConfig) -> Result<summary::Summary> {
    let mut points = Vec::new();
    for path in ingest::list_csv_files(input_dir)? {
        match ingest::read_anomaly_points_file(&path) {
            Ok(found) => {
                tracing::debug!(path = %path.display(), points = found.len(), "read anomaly file");
                points.extend(found);
            }
            // Summary and plateau files live alongside and have no Timestamp.
            Err(ingest::IngestError::MissingColumn { .. }) => {
                tracing::debug!(path = %path.display(), "not an anomaly file, skipping");
            }
            Err(e) => tracing::error!(path = %path.display(), error = %e, "skipping unreadable anomaly file"),
        }
    }
    Ok(summary::summarize(points, &config.window))
}
