use crate::error::{RankError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use time::Duration;

pub const LOOKBACK_HOURS: (u32, u32) = (36, 720);
pub const BUFFER_HOURS: (u32, u32) = (0, 48);
pub const RUN_PERIOD_MINUTES: (u32, u32) = (15, 120);
pub const PERIOD_MINUTES: (u32, u32) = (15, 120);
pub const CLUSTER_FAN_OUT: (usize, usize) = (1, 50);
pub const SHORT_LINK_TIMEOUT_SECS: (u64, u64) = (1, 30);

/// Incremental reads reach this far behind the previous cutoff to pick up records whose
/// write landed after that read but whose creation stamp is older.
pub const LATE_WRITE_GRACE: Duration = Duration::minutes(2);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    #[default]
    Popularity,
    PopularitySimilarity,
}

impl RankingMode {
    pub fn clusters(&self) -> bool { matches!(self, RankingMode::PopularitySimilarity) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub name: String,
    #[serde(default)]
    pub mode: RankingMode,
}

/// Ranker settings. Out-of-range values are replaced by their defaults on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    pub lookback_hours: u32,
    pub buffer_hours: u32,
    pub run_period_minutes: u32,
    pub period_minutes: u32,
    pub cluster_fan_out: usize,
    pub similarity_threshold: f64,
    pub short_link_timeout_secs: u64,
    pub parallel: bool,
    pub partitions: Vec<PartitionConfig>,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 36,
            buffer_hours: 6,
            run_period_minutes: 15,
            period_minutes: 15,
            cluster_fan_out: 5,
            similarity_threshold: 0.5,
            short_link_timeout_secs: 5,
            parallel: true,
            partitions: Vec::new(),
        }
    }
}

fn in_range<T: PartialOrd + Copy + std::fmt::Debug>(name: &str, value: T, (lo, hi): (T, T), default: T) -> T {
    if value < lo || value > hi {
        tracing::warn!(setting = name, ?value, ?default, "setting out of range, using default");
        return default;
    }
    value
}

impl RankerConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| RankError::Unavailable(format!("config {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let cfg: RankerConfig =
            serde_json::from_str(raw).map_err(|e| RankError::MalformedRecord(format!("config: {e}")))?;
        Ok(cfg.validated())
    }

    pub fn validated(mut self) -> Self {
        let d = Self::default();
        self.lookback_hours = in_range("lookback_hours", self.lookback_hours, LOOKBACK_HOURS, d.lookback_hours);
        self.buffer_hours = in_range("buffer_hours", self.buffer_hours, BUFFER_HOURS, d.buffer_hours);
        self.run_period_minutes =
            in_range("run_period_minutes", self.run_period_minutes, RUN_PERIOD_MINUTES, d.run_period_minutes);
        self.period_minutes = in_range("period_minutes", self.period_minutes, PERIOD_MINUTES, d.period_minutes);
        self.cluster_fan_out = in_range("cluster_fan_out", self.cluster_fan_out, CLUSTER_FAN_OUT, d.cluster_fan_out);
        self.short_link_timeout_secs = in_range(
            "short_link_timeout_secs",
            self.short_link_timeout_secs,
            SHORT_LINK_TIMEOUT_SECS,
            d.short_link_timeout_secs,
        );
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold < 1.0) {
            tracing::warn!(value = self.similarity_threshold, "similarity_threshold outside (0, 1), using default");
            self.similarity_threshold = d.similarity_threshold;
        }
        self
    }

    pub fn lookback(&self) -> Duration { Duration::hours(self.lookback_hours as i64) }
    pub fn buffer(&self) -> Duration { Duration::hours(self.buffer_hours as i64) }
    pub fn period(&self) -> Duration { Duration::minutes(self.period_minutes as i64) }
    pub fn run_period(&self) -> Duration { Duration::minutes(self.run_period_minutes as i64) }

    /// Span of history loaded on startup and kept by the similarity model.
    pub fn retention(&self) -> Duration { self.lookback() + self.buffer() }

    /// Citation records older than this are deleted from the store.
    pub fn citation_retention(&self) -> Duration { self.retention() + Duration::hours(1) }
}
