//! Readers for per-entity counter tables and previously written anomaly files.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::features::{RawRecord, RawSeries};

pub const TIMESTAMP_COLUMN: &str = "Timestamp";
pub const ENTITY_COLUMN: &str = "ProxyId";

/// Timestamp format of anomaly files written by [`crate::report`].
pub const RECORD_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{source_name}: missing required column '{column}'")]
    MissingColumn {
        source_name: String,
        column: &'static str,
    },

    #[error("{source_name}: {error}")]
    Csv {
        source_name: String,
        #[source]
        error: csv::Error,
    },

    #[error("{path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },
}

fn csv_err(source_name: &str) -> impl Fn(csv::Error) -> IngestError + '_ {
    move |error| IngestError::Csv {
        source_name: source_name.to_string(),
        error,
    }
}

/// Entity id implied by a file name, e.g. `SCPProxy_01_Pune.csv`.
pub fn entity_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lenient counter cell parse: integers, or non-negative whole floats as
/// written by some exporters (`12.0`). Anything else is `None`.
fn parse_count(cell: &str) -> Option<u64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    if let Ok(v) = cell.parse::<u64>() {
        return Some(v);
    }
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Some(v as u64),
        _ => None,
    }
}

/// Read one entity's series for `counter` from CSV.
///
/// `source_name` names the source in errors and supplies the entity id when
/// the table has no `ProxyId` column. A missing counter column is not an
/// error; the featurizer zero-fills it.
pub fn read_series<R: Read>(reader: R, source_name: &str, counter: &str) -> Result<RawSeries, IngestError> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr.headers().map_err(csv_err(source_name))?.clone();

    let ts_col = headers
        .iter()
        .position(|h| h.trim() == TIMESTAMP_COLUMN)
        .ok_or_else(|| IngestError::MissingColumn {
            source_name: source_name.to_string(),
            column: TIMESTAMP_COLUMN,
        })?;
    let entity_col = headers.iter().position(|h| h.trim() == ENTITY_COLUMN);
    let counter_col = headers.iter().position(|h| h.trim() == counter);

    let mut fallback_entity = entity_from_path(Path::new(source_name));
    if fallback_entity.is_empty() {
        fallback_entity = source_name.to_string();
    }

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row.map_err(csv_err(source_name))?;
        let entity_id = entity_col
            .and_then(|c| row.get(c))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback_entity.clone());
        records.push(RawRecord {
            timestamp: row.get(ts_col).unwrap_or_default().to_string(),
            entity_id,
            value: counter_col.and_then(|c| row.get(c)).and_then(parse_count),
        });
    }

    Ok(RawSeries {
        entity_id: fallback_entity,
        counter: counter.to_string(),
        has_counter: counter_col.is_some(),
        records,
    })
}

pub fn read_series_file(path: &Path, counter: &str) -> Result<RawSeries, IngestError> {
    let file = std::fs::File::open(path).map_err(|error| IngestError::Io {
        path: path.display().to_string(),
        error,
    })?;
    read_series(file, &path.display().to_string(), counter)
}

/// Read `(entity_id, timestamp)` pairs back from an anomaly CSV.
///
/// Rows whose timestamp does not parse are skipped.
pub fn read_anomaly_points<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<Vec<(String, NaiveDateTime)>, IngestError> {
    let series = read_series(reader, source_name, "")?;
    Ok(series
        .records
        .into_iter()
        .filter_map(|rec| {
            NaiveDateTime::parse_from_str(rec.timestamp.trim(), RECORD_TIMESTAMP_FORMAT)
                .ok()
                .map(|ts| (rec.entity_id, ts))
        })
        .collect())
}

pub fn read_anomaly_points_file(path: &Path) -> Result<Vec<(String, NaiveDateTime)>, IngestError> {
    let file = std::fs::File::open(path).map_err(|error| IngestError::Io {
        path: path.display().to_string(),
        error,
    })?;
    read_anomaly_points(file, &path.display().to_string())
}

/// All `*.csv` files directly inside `dir`, sorted by name.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let io_err = |error| IngestError::Io {
        path: dir.display().to_string(),
        error,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_csv = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: &str = "response4xxForwardedCounter";

    #[test]
    fn test_reads_counter_column() {
        let data = "\
Timestamp,ProxyId,response2xxForwardedCounter,response4xxForwardedCounter
15-01-2024-10-00,SCPProxy_01_Pune,100,4
15-01-2024-10-01,SCPProxy_01_Pune,101,
15-01-2024-10-02,SCPProxy_01_Pune,99,7.0
";
        let series = read_series(data.as_bytes(), "SCPProxy_01_Pune.csv", COUNTER).unwrap();
        assert!(series.has_counter);
        assert_eq!(series.entity_id, "SCPProxy_01_Pune");
        let values: Vec<_> = series.records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![Some(4), None, Some(7)]);
        assert_eq!(series.records[0].timestamp, "15-01-2024-10-00");
    }

    #[test]
    fn test_missing_counter_column_is_flagged() {
        let data = "Timestamp,ProxyId\n15-01-2024-10-00,p1\n";
        let series = read_series(data.as_bytes(), "p1.csv", COUNTER).unwrap();
        assert!(!series.has_counter);
        assert_eq!(series.records.len(), 1);
        assert_eq!(series.records[0].value, None);
    }

    #[test]
    fn test_missing_timestamp_column_is_error() {
        let data = "Time,ProxyId\nx,p1\n";
        let err = read_series(data.as_bytes(), "p1.csv", COUNTER).unwrap_err();
        assert!(matches!(
            err,
            IngestError::MissingColumn { column: "Timestamp", .. }
        ));
    }

    #[test]
    fn test_entity_falls_back_to_file_stem() {
        let data = "Timestamp,response4xxForwardedCounter\n15-01-2024-10-00,3\n";
        let series = read_series(data.as_bytes(), "dir/AMFProxy_02_Delhi.csv", COUNTER).unwrap();
        assert_eq!(series.records[0].entity_id, "AMFProxy_02_Delhi");
    }

    #[test]
    fn test_reads_anomaly_points() {
        let data = "\
Timestamp,ProxyId,response4xxForwardedCounter,day
2024-01-15 10:00:00,p1,40,15
garbage,p1,41,15
2024-01-15 10:01:00,p1,42,15
";
        let points = read_anomaly_points(data.as_bytes(), "p1_c.csv").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].0, "p1");
    }

    #[test]
    fn test_lists_only_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "Timestamp\n").unwrap();
        std::fs::write(dir.path().join("a.CSV"), "Timestamp\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let files = list_csv_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.csv"]);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(" 12 "), Some(12));
        assert_eq!(parse_count("3.0"), Some(3));
        assert_eq!(parse_count("-1"), None);
        assert_eq!(parse_count("NaN"), None);
        assert_eq!(parse_count(""), None);
    }
}
