//! Outlier scoring over featurized series.

pub mod isolation;
pub mod record;
pub mod segmented;

use thiserror::Error;

pub use isolation::IsolationForest;
pub use record::{extract_anomalies, AnomalyRecord};
pub use segmented::{ScoredRow, ScoredTable, Segment, SegmentedDetector};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("cannot fit a model on zero rows")]
    EmptyInput,

    #[error("feature row {row} has {have} columns, expected {expected}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        have: usize,
    },

    #[error("model returned {have} labels for {expected} rows")]
    LabelCount { expected: usize, have: usize },

    #[error("unknown segment '{0}' (expected 'regular' or 'month_end')")]
    UnknownSegment(String),

    #[error("invalid model parameters: {0}")]
    InvalidParams(#[from] crate::config::ConfigError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Per-row verdict of an outlier model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Label {
    Inlier,
    Outlier,
}

impl Label {
    /// Numeric label as reported downstream: `1` inlier, `-1` outlier.
    pub fn raw(self) -> i8 {
        match self {
            Label::Inlier => 1,
            Label::Outlier => -1,
        }
    }

    pub fn is_outlier(self) -> bool {
        self == Label::Outlier
    }
}

/// An unsupervised model that labels every row of the data it is fit on.
///
/// Implementations may keep mutable fit state, so an instance is never
/// shared between segments or workers.
pub trait OutlierModel: Send {
    fn name(&self) -> &str;

    /// Fit on `rows` and label each of them. Every row has the same width.
    fn fit_predict(&mut self, rows: &[Vec<f64>]) -> Result<Vec<Label>, DetectError>;
}

/// Builds a fresh model for each segment.
pub type ModelFactory = std::sync::Arc<dyn Fn() -> Box<dyn OutlierModel> + Send + Sync>;
