//! TOML configuration for a proxywatch run.
//!
//! One immutable [`PipelineConfig`] is built at startup and passed into every
//! pipeline entry point. Loading is layered: an explicit path, then the
//! `PROXYWATCH_CONFIG` environment variable, then compiled-in defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "PROXYWATCH_CONFIG";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown direction '{0}' (expected 'inbound' or 'outbound')")]
    UnknownDirection(String),

    #[error("unknown counter '{counter}' for {direction} traffic")]
    UnknownCounter { direction: Direction, counter: String },

    #[error("{field} = {value} is out of range: {expected}")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("invalid date '{0}' (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("date range start {start} is after end {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub model: ModelParams,
    #[serde(default)]
    pub window: WindowPolicy,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub range: DateRange,
}

impl PipelineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded pipeline configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. `explicit` if given.
    /// 2. The path in `PROXYWATCH_CONFIG`.
    /// 3. Compiled-in defaults.
    ///
    /// A named file that cannot be loaded or fails validation is an error.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::resolve_from(explicit, from_env.as_deref())
    }

    fn resolve_from(explicit: Option<&Path>, from_env: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Some(path) = from_env {
            return Self::load(path).with_context(|| format!("{CONFIG_ENV} names an unusable config"));
        }

        debug!("no config file given, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Check every section for contract violations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.features.validate()?;
        self.model.validate()?;
        self.window.validate()?;
        self.range.validate()
    }
}

// ---------------------------------------------------------------------------
// Direction and counters
// ---------------------------------------------------------------------------

/// Traffic direction; each owns its own set of counter columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

const RESPONSE_CLASSES: [&str; 10] = [
    "1xx", "2xx", "3xx", "4xx", "5xx", "400", "404", "408", "424", "429",
];

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Direction::Inbound => "Forwarded",
            Direction::Outbound => "Received",
        }
    }

    /// All counter columns recorded for this direction.
    pub fn counters(self) -> Vec<String> {
        RESPONSE_CLASSES
            .iter()
            .map(|class| format!("response{}{}Counter", class, self.verb()))
            .collect()
    }

    /// Resolve a counter given either as its full column name or as a
    /// response-class alias such as `4xx` or `429`.
    pub fn resolve_counter(self, name: &str) -> Result<String, ConfigError> {
        let wanted = name.trim();
        let counters = self.counters();
        if counters.iter().any(|c| c == wanted) {
            return Ok(wanted.to_string());
        }
        let alias = wanted.to_ascii_lowercase();
        if RESPONSE_CLASSES.contains(&alias.as_str()) {
            return Ok(format!("response{}{}Counter", alias, self.verb()));
        }
        Err(ConfigError::UnknownCounter {
            direction: self,
            counter: name.to_string(),
        })
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

impl FromStr for Direction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            _ => Err(ConfigError::UnknownDirection(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// Which feature columns are built for the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMode {
    /// Counter value plus calendar fields.
    #[default]
    Calendar,
    /// Calendar features plus a trailing-window z-score.
    Rolling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub mode: FeatureMode,
    /// Trailing window length (rows) for the rolling z-score.
    pub rolling_window: usize,
    /// `chrono` format of the `Timestamp` column in per-entity sources.
    pub timestamp_format: String,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            mode: FeatureMode::Calendar,
            rolling_window: 200,
            timestamp_format: "%d-%m-%Y-%H-%M".to_string(),
        }
    }
}

impl FeatureConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.rolling_window < 2 {
            return Err(ConfigError::OutOfRange {
                field: "features.rolling_window",
                value: self.rolling_window.to_string(),
                expected: ">= 2",
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Parameter bundle for the outlier-scoring model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Number of isolation trees.
    pub tree_count: usize,
    /// Fraction of the segment drawn for each tree, in (0, 1].
    pub sample_fraction: f64,
    /// Expected share of outliers, in (0, 0.5].
    pub contamination_fraction: f64,
    /// Fraction of feature columns each tree may split on, in (0, 1].
    pub feature_fraction: f64,
    pub use_bootstrap_sampling: bool,
    /// Threads used to build trees. Does not affect results.
    pub parallelism_hint: usize,
    pub random_seed: u64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            tree_count: 25,
            sample_fraction: 0.1,
            contamination_fraction: 0.0075,
            feature_fraction: 0.8,
            use_bootstrap_sampling: true,
            parallelism_hint: 1,
            random_seed: 42,
        }
    }
}

fn fraction_check(
    field: &'static str,
    value: f64,
    upper: f64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= upper {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        })
    }
}

impl ModelParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tree_count == 0 {
            return Err(ConfigError::OutOfRange {
                field: "model.tree_count",
                value: "0".to_string(),
                expected: "a positive integer",
            });
        }
        if self.parallelism_hint == 0 {
            return Err(ConfigError::OutOfRange {
                field: "model.parallelism_hint",
                value: "0".to_string(),
                expected: "a positive integer",
            });
        }
        fraction_check("model.sample_fraction", self.sample_fraction, 1.0, "(0, 1]")?;
        fraction_check(
            "model.contamination_fraction",
            self.contamination_fraction,
            0.5,
            "(0, 0.5]",
        )?;
        fraction_check("model.feature_fraction", self.feature_fraction, 1.0, "(0, 1]")
    }
}

// ---------------------------------------------------------------------------
// Burst / plateau window
// ---------------------------------------------------------------------------

/// Lookahead window and size thresholds for burst/plateau classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowPolicy {
    pub minutes: i64,
    pub burst_threshold: usize,
    pub plateau_threshold: usize,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            minutes: 10,
            burst_threshold: 3,
            plateau_threshold: 10,
        }
    }
}

impl WindowPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.minutes <= 0 {
            return Err(ConfigError::OutOfRange {
                field: "window.minutes",
                value: self.minutes.to_string(),
                expected: "a positive number of minutes",
            });
        }
        if self.burst_threshold == 0 || self.burst_threshold >= self.plateau_threshold {
            return Err(ConfigError::OutOfRange {
                field: "window.burst_threshold",
                value: self.burst_threshold.to_string(),
                expected: "1 <= burst_threshold < plateau_threshold",
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Concurrent work units; 0 means one per available CPU.
    pub workers: usize,
}

impl BatchConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

// ---------------------------------------------------------------------------
// Date range
// ---------------------------------------------------------------------------

/// Optional inclusive calendar-date bounds on observation timestamps.
///
/// The upper bound covers the whole end day, through `23:59:59`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, ConfigError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Parse optional `YYYY-MM-DD` bounds; empty strings count as unset.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, ConfigError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => {
                Err(ConfigError::InvertedRange { start, end })
            }
            _ => Ok(()),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        if let Some(start) = self.start {
            if *ts < start.and_time(NaiveTime::MIN) {
                return false;
            }
        }
        if let Some(end) = self.end {
            let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
            if *ts > end.and_time(last_second) {
                return false;
            }
        }
        true
    }
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ConfigError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ConfigError::InvalidDate(s.to_string())),
    }
}
