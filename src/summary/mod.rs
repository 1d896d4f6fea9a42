//! Burst/plateau summaries of detected anomalies.

pub mod aggregate;
pub mod classifier;

pub use aggregate::{summarize, summarize_records, DayCounts, PlateauInterval, Summary, SummaryTable};
pub use classifier::{classify, Cluster, DayEvents, Event};
