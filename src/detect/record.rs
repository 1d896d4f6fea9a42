//! Reporting projection of anomalous rows.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::ScoredTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub timestamp: NaiveDateTime,
    pub entity_id: String,
    pub counter_value: u64,
    pub hour: u32,
    pub day_of_week: u32,
    pub is_weekend: bool,
    pub day: u32,
    pub monthend_flag: bool,
    /// Only set when the table carried rolling statistics.
    pub z_score: Option<f64>,
    pub raw_label: i8,
    pub is_anomaly: bool,
}

impl AnomalyRecord {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Anomalous rows of `table`, in table order.
pub fn extract_anomalies(table: &ScoredTable) -> Vec<AnomalyRecord> {
    table
        .anomalies()
        .map(|scored| {
            let row = &scored.row;
            AnomalyRecord {
                timestamp: row.observation.timestamp,
                entity_id: row.observation.entity_id.clone(),
                counter_value: row.observation.value,
                hour: row.calendar.hour,
                day_of_week: row.calendar.day_of_week,
                is_weekend: row.calendar.is_weekend,
                day: row.calendar.day_of_month,
                monthend_flag: row.calendar.is_month_end_window,
                z_score: row.z_score,
                raw_label: scored.label.raw(),
                is_anomaly: scored.is_anomaly,
            }
        })
        .collect()
}
