use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Score weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Multiplier on the frequency-weighted benefit
    pub frequency_weight: f64,
    /// Deducted once per index field beyond the first
    pub field_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            frequency_weight: 1.0,
            field_penalty: 0.0,
        }
    }
}

/// Advisor run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Upper bound on concurrent sample counting requests
    pub max_concurrency: usize,
    /// Operand variations kept per workload shape
    pub max_representatives: usize,
    pub scoring: ScoringConfig,
    /// Cut the ranked list after this many recommendations
    pub max_recommendations: Option<usize>,
    /// Cancel the run after this many milliseconds
    pub run_timeout_ms: Option<u64>,
    /// Also propose a single-field index for every predicate field
    pub include_single_field: bool,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_representatives: 3,
            scoring: ScoringConfig::default(),
            max_recommendations: None,
            run_timeout_ms: None,
            include_single_field: true,
        }
    }
}

impl AdvisorConfig {
    /// Load from a JSON file; missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("JSON parse error in {}: {}", path.as_ref().display(), e)))
    }

    /// Apply `INDEX_ADVISOR_*` environment variables on top of this config.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("INDEX_ADVISOR_MAX_CONCURRENCY") {
            self.max_concurrency = parse_var("INDEX_ADVISOR_MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("INDEX_ADVISOR_MAX_REPRESENTATIVES") {
            self.max_representatives = parse_var("INDEX_ADVISOR_MAX_REPRESENTATIVES", &value)?;
        }
        if let Some(value) = lookup("INDEX_ADVISOR_FREQUENCY_WEIGHT") {
            self.scoring.frequency_weight = parse_var("INDEX_ADVISOR_FREQUENCY_WEIGHT", &value)?;
        }
        if let Some(value) = lookup("INDEX_ADVISOR_FIELD_PENALTY") {
            self.scoring.field_penalty = parse_var("INDEX_ADVISOR_FIELD_PENALTY", &value)?;
        }
        if let Some(value) = lookup("INDEX_ADVISOR_MAX_RECOMMENDATIONS") {
            self.max_recommendations = Some(parse_var("INDEX_ADVISOR_MAX_RECOMMENDATIONS", &value)?);
        }
        if let Some(value) = lookup("INDEX_ADVISOR_RUN_TIMEOUT_MS") {
            self.run_timeout_ms = Some(parse_var("INDEX_ADVISOR_RUN_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("INDEX_ADVISOR_INCLUDE_SINGLE_FIELD") {
            self.include_single_field = parse_var("INDEX_ADVISOR_INCLUDE_SINGLE_FIELD", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be at least 1".into()));
        }
        if self.max_representatives == 0 {
            return Err(Error::Config("max_representatives must be at least 1".into()));
        }
        if !self.scoring.frequency_weight.is_finite() || self.scoring.frequency_weight <= 0.0 {
            return Err(Error::Config("frequency_weight must be a positive number".into()));
        }
        if !self.scoring.field_penalty.is_finite() || self.scoring.field_penalty < 0.0 {
            return Err(Error::Config("field_penalty must not be negative".into()));
        }
        if self.max_recommendations == Some(0) {
            return Err(Error::Config("max_recommendations must be at least 1".into()));
        }
        if self.run_timeout_ms == Some(0) {
            return Err(Error::Config("run_timeout_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {:?}", key, value)))
}
