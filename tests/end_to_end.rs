//! Library-level scenarios spanning ingest, detection and summarization.

use chrono::{Duration, NaiveDate};
use tokio_util::sync::CancellationToken;

use proxywatch::config::{PipelineConfig, WindowPolicy};
use proxywatch::summary::summarize;

#[test]
fn test_twelve_anomalies_thirty_seconds_apart_form_one_plateau() {
    let start = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    let points = (0..12).map(|i| ("X".to_string(), start + Duration::seconds(30 * i)));
    let summary = summarize(points, &WindowPolicy::default());

    let day = summary
        .table
        .get("X", start.date())
        .expect("X has a column for 2024-01-15");
    assert_eq!(day.anomalies, 12);
    assert_eq!(day.bursts, 0);
    assert_eq!(day.plateaus, 1);

    assert_eq!(summary.plateaus.len(), 1);
    let plateau = &summary.plateaus[0];
    assert_eq!(plateau.anomaly_count, 12);
    assert_eq!(plateau.start, start);
    assert_eq!(plateau.duration_minutes, 5.5);
}

#[test]
fn test_summarize_directory_reads_anomaly_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut csv = String::from("Timestamp,ProxyId,response5xxForwardedCounter,day\n");
    for m in 0..10 {
        csv.push_str(&format!("2024-01-27 14:{m:02}:00,AMFProxy_02_Delhi,9,27\n"));
    }
    csv.push_str("2024-01-28 01:00:00,AMFProxy_02_Delhi,9,28\n");
    std::fs::write(dir.path().join("AMFProxy_02_Delhi_5xx.csv"), csv).unwrap();
    // Summary outputs sitting in the same directory are ignored.
    std::fs::write(dir.path().join("x_summary.csv"), "proxyid,2024-01-27\nA,1\n").unwrap();

    let summary = proxywatch::summarize_directory(dir.path(), &PipelineConfig::default()).unwrap();
    assert_eq!(summary.table.rows.len(), 1);
    assert_eq!(summary.table.dates.len(), 2);

    let d27 = summary
        .table
        .get("AMFProxy_02_Delhi", NaiveDate::from_ymd_opt(2024, 1, 27).unwrap())
        .unwrap();
    assert_eq!((d27.anomalies, d27.bursts, d27.plateaus), (10, 0, 1));
    let d28 = summary
        .table
        .get("AMFProxy_02_Delhi", NaiveDate::from_ymd_opt(2024, 1, 28).unwrap())
        .unwrap();
    assert_eq!((d28.anomalies, d28.bursts, d28.plateaus), (1, 0, 0));
}

#[tokio::test]
async fn test_analyze_directory_round_trips_through_summarize() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input).unwrap();

    let counter = "response4xxForwardedCounter";
    let start = NaiveDate::from_ymd_opt(2024, 1, 22)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    for (name, phase) in [("SCPProxy_01_Pune", 0u64), ("SMFProxy_01_Pune", 3)] {
        let mut csv = format!("Timestamp,ProxyId,{counter}\n");
        for m in 0..(6 * 24 * 60) {
            let ts = start + Duration::minutes(m);
            let mut value = 20 + (m as u64 + phase) % 7;
            if m % 997 == 0 {
                value = 4000;
            }
            csv.push_str(&format!("{},{name},{value}\n", ts.format("%d-%m-%Y-%H-%M")));
        }
        std::fs::write(input.join(format!("{name}.csv")), csv).unwrap();
    }

    let mut config = PipelineConfig::default();
    config.batch.workers = 2;
    let report = proxywatch::analyze_directory(
        &input,
        &output,
        counter,
        config.clone(),
        false,
        CancellationToken::new(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(report.succeeded, 2);
    assert!(report.failed.is_empty());
    assert!(!report.records.is_empty());

    // Per-proxy anomaly files carry everything needed to rebuild the summary.
    let rebuilt = proxywatch::summarize_directory(&output, &config).unwrap();
    assert_eq!(rebuilt.table, report.summary.table);
    assert_eq!(rebuilt.plateaus, report.summary.plateaus);
}
