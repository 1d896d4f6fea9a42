//! CSV output for anomaly records and summaries, plus console one-liners.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::detect::AnomalyRecord;
use crate::ingest::RECORD_TIMESTAMP_FORMAT;
use crate::pipeline::BatchReport;
use crate::summary::{PlateauInterval, SummaryTable};

fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

/// Full anomaly table. The `z_score` column is present only when `rolling`.
pub fn write_records<W: Write>(out: W, counter: &str, rolling: bool, records: &[AnomalyRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);

    let mut header = vec![
        "Timestamp",
        "ProxyId",
        counter,
        "hour",
        "day_of_week",
        "is_weekend",
        "day",
        "monthend_flag",
    ];
    if rolling {
        header.push("z_score");
    }
    header.extend(["anomaly", "is_anomaly"]);
    wtr.write_record(&header)?;

    for rec in records {
        let mut row = vec![
            rec.timestamp.format(RECORD_TIMESTAMP_FORMAT).to_string(),
            rec.entity_id.clone(),
            rec.counter_value.to_string(),
            rec.hour.to_string(),
            rec.day_of_week.to_string(),
            flag(rec.is_weekend).to_string(),
            rec.day.to_string(),
            flag(rec.monthend_flag).to_string(),
        ];
        if rolling {
            row.push(rec.z_score.unwrap_or(0.0).to_string());
        }
        row.push(rec.raw_label.to_string());
        row.push(flag(rec.is_anomaly).to_string());
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Compact table: timestamp, entity, counter value, and day of month.
pub fn write_compact_records<W: Write>(out: W, counter: &str, records: &[AnomalyRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(["Timestamp", "ProxyId", counter, "day"])?;
    for rec in records {
        wtr.write_record([
            rec.timestamp.format(RECORD_TIMESTAMP_FORMAT).to_string(),
            rec.entity_id.clone(),
            rec.counter_value.to_string(),
            rec.day.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_summary<W: Write>(out: W, table: &SummaryTable) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(table.header())?;
    for row in table.records() {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_plateaus<W: Write>(out: W, plateaus: &[PlateauInterval]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record([
        "ProxyId",
        "date",
        "plateau_start",
        "plateau_end",
        "duration_minutes",
        "anomaly_count",
    ])?;
    for p in plateaus {
        wtr.write_record([
            p.entity_id.clone(),
            p.date.to_string(),
            p.start.format(RECORD_TIMESTAMP_FORMAT).to_string(),
            p.end.format(RECORD_TIMESTAMP_FORMAT).to_string(),
            format!("{:.2}", p.duration_minutes),
            p.anomaly_count.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn create(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))
}

pub fn write_records_file(path: &Path, counter: &str, rolling: bool, records: &[AnomalyRecord]) -> Result<()> {
    write_records(create(path)?, counter, rolling, records)
        .with_context(|| format!("Failed to write {}", path.display()))
}

pub fn write_compact_records_file(path: &Path, counter: &str, records: &[AnomalyRecord]) -> Result<()> {
    write_compact_records(create(path)?, counter, records)
        .with_context(|| format!("Failed to write {}", path.display()))
}

pub fn write_summary_file(path: &Path, table: &SummaryTable) -> Result<()> {
    write_summary(create(path)?, table).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn write_plateaus_file(path: &Path, plateaus: &[PlateauInterval]) -> Result<()> {
    write_plateaus(create(path)?, plateaus).with_context(|| format!("Failed to write {}", path.display()))
}

/// Format a batch run as a human-readable summary line.
pub fn format_batch_summary(report: &BatchReport) -> String {
    let total = report.succeeded + report.failed.len();
    let plateaus = report.summary.plateaus.len();

    let mut summary = format!(
        "{} run {}: {}/{} entit{} analysed, {} anomal{}, {} plateau{} ({:.1}s)",
        report.counter,
        report.run_id,
        report.succeeded,
        total,
        if total == 1 { "y" } else { "ies" },
        report.records.len(),
        if report.records.len() == 1 { "y" } else { "ies" },
        plateaus,
        if plateaus == 1 { "" } else { "s" },
        report.elapsed.as_secs_f64(),
    );

    if !report.failed.is_empty() {
        summary.push_str(&format!(", {} failed", report.failed.len()));
    }
    if report.cancelled {
        summary.push_str(", cancelled");
    }

    summary
}
