use std::collections::HashSet;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

use proxywatch::config::{DateRange, FeatureConfig, ModelParams, WindowPolicy};
use proxywatch::detect::SegmentedDetector;
use proxywatch::features::{rolling::rolling_z_scores, CalendarFields, Featurizer, Observation};
use proxywatch::summary::{classify, Event};

fn midnight() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

proptest! {
    #[test]
    fn classifier_windows_partition_anomalies(
        offsets in prop::collection::vec(0i64..86_400, 0..250),
        minutes in 1i64..30,
        burst in 1usize..5,
        extra in 1usize..10,
    ) {
        let policy = WindowPolicy { minutes, burst_threshold: burst, plateau_threshold: burst + extra };
        let timestamps: Vec<_> = offsets.iter().map(|s| midnight() + Duration::seconds(*s)).collect();
        let events = classify(&timestamps, &policy);

        let mut seen = HashSet::new();
        for event in &events.events {
            let cluster = event.cluster();
            for &i in &cluster.members {
                prop_assert!(i < timestamps.len());
                prop_assert!(seen.insert(i), "index {} in two windows", i);
                prop_assert!(timestamps[i] >= cluster.start && timestamps[i] <= cluster.end);
            }
            prop_assert!(cluster.end - cluster.start < Duration::minutes(minutes));
            match event {
                Event::Plateau(c) => prop_assert!(c.count() >= policy.plateau_threshold),
                Event::Burst(c) => {
                    prop_assert!(c.count() >= policy.burst_threshold);
                    prop_assert!(c.count() < policy.plateau_threshold);
                }
            }
        }
    }

    #[test]
    fn month_end_window_is_days_26_to_30(days in 0i64..3650) {
        let ts = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
            + Duration::days(days);
        let fields = CalendarFields::from_timestamp(&ts);
        prop_assert_eq!(fields.is_month_end_window, (26..=30).contains(&fields.day_of_month));
    }

    #[test]
    fn rolling_z_scores_keep_length_and_warmup(
        values in prop::collection::vec(0.0f64..1e6, 0..300),
        window in 2usize..50,
    ) {
        let z = rolling_z_scores(&values, window);
        prop_assert_eq!(z.len(), values.len());
        for v in z.iter().take(window - 1) {
            prop_assert_eq!(*v, 0.0);
        }
        prop_assert!(z.iter().all(|v| v.is_finite()));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn detector_output_is_chronological_and_deterministic(
        minutes in prop::collection::vec((0i64..20_160, 0u64..500), 1..300),
        seed in any::<u64>(),
    ) {
        // Two weeks from Jan 20 cover both the regular and month-end segments.
        let start = NaiveDate::from_ymd_opt(2024, 1, 20).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let observations: Vec<_> = minutes
            .iter()
            .map(|(m, v)| Observation {
                timestamp: start + Duration::minutes(*m),
                entity_id: "p".to_string(),
                value: *v,
            })
            .collect();
        let table = Featurizer::new(FeatureConfig::default()).featurize("c".to_string(), observations);

        let params = ModelParams {
            tree_count: 8,
            sample_fraction: 0.5,
            contamination_fraction: 0.05,
            random_seed: seed,
            ..ModelParams::default()
        };
        let detector = SegmentedDetector::new(params);
        let a = detector.detect(&table, &DateRange::default()).unwrap();
        let b = detector.detect(&table, &DateRange::default()).unwrap();

        prop_assert_eq!(a.rows.len(), table.len());
        for pair in a.rows.windows(2) {
            prop_assert!(pair[0].row.observation.timestamp <= pair[1].row.observation.timestamp);
        }
        let labels_a: Vec<_> = a.rows.iter().map(|r| r.is_anomaly).collect();
        let labels_b: Vec<_> = b.rows.iter().map(|r| r.is_anomaly).collect();
        prop_assert_eq!(labels_a, labels_b);
    }
}
