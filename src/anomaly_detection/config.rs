//! Anomaly detection configuration
//!
//! Every threshold the scorers use lives here. Defaults reproduce the documented
//! scoring rules exactly; deployments can override them from a JSON/TOML file or
//! the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::anomaly_detection::errors::{AnomalyDetectionError, Result};

/// Environment variable naming a config file
pub const CONFIG_PATH_ENV: &str = "EXPENSE_ANOMALY_CONFIG";
/// Environment variable overriding `min_historical_data`
pub const MIN_HISTORY_ENV: &str = "EXPENSE_ANOMALY_MIN_HISTORY";

/// Default minimum history size before detection runs
pub const MIN_HISTORICAL_DATA: usize = 10;

/// Longest frequency window or history span, in days
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// Anomaly detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyDetectionConfig {
    /// Below this many historical expenses nothing is flagged
    pub min_historical_data: usize,
    pub amount: AmountConfig,
    pub time: TimeConfig,
    pub frequency: FrequencyConfig,
    pub category: CategoryConfig,
    pub merchant: MerchantConfig,
    pub pattern: PatternConfig,
    /// Composite score weights
    pub weights: ScoreWeights,
    pub events: EventConfig,
}

impl Default for AnomalyDetectionConfig {
    fn default() -> Self {
        Self {
            min_historical_data: MIN_HISTORICAL_DATA,
            amount: AmountConfig::default(),
            time: TimeConfig::default(),
            frequency: FrequencyConfig::default(),
            category: CategoryConfig::default(),
            merchant: MerchantConfig::default(),
            pattern: PatternConfig::default(),
            weights: ScoreWeights::default(),
            events: EventConfig::default(),
        }
    }
}

/// Amount deviation scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountConfig {
    /// Deviation beyond `std_dev * multiplier` is anomalous
    pub std_dev_multiplier: f64,
    /// Relevant expenses required before scoring at all
    pub min_relevant: usize,
    /// Same-category expenses required to narrow the comparison set
    pub min_same_category: usize,
}

impl Default for AmountConfig {
    fn default() -> Self {
        Self {
            std_dev_multiplier: 2.5,
            min_relevant: 3,
            min_same_category: 5,
        }
    }
}

/// Hour-of-day scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Hours seen less often than this share of history are anomalous
    pub rare_hour_rate: f64,
    /// Unseen hours strictly before this are quiet hours
    pub quiet_before_hour: u32,
    /// Unseen hours strictly after this are quiet hours
    pub quiet_after_hour: u32,
    pub unseen_quiet_score: f64,
    pub unseen_score: f64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            rare_hour_rate: 0.02,
            quiet_before_hour: 6,
            quiet_after_hour: 22,
            unseen_quiet_score: 1.0,
            unseen_score: 0.5,
        }
    }
}

/// Similar-expense burst scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    /// Look-back window for "recent" similar expenses
    pub window_days: i64,
    /// Recent count above `expected * multiplier` is anomalous
    pub multiplier: f64,
    /// Merchant similarity needed to count as the same merchant
    pub merchant_similarity: f64,
    /// Relative amount difference still considered the same amount
    pub amount_tolerance: f64,
    /// Lower bound on the history span used for the weekly rate
    pub min_history_days: i64,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            multiplier: 3.0,
            merchant_similarity: 0.7,
            amount_tolerance: 0.2,
            min_history_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    /// Categories used less often than this share of history are anomalous
    pub rare_frequency: f64,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            rare_frequency: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MerchantConfig {
    /// A known merchant at least this similar is not new
    pub similarity_threshold: f64,
}

impl Default for MerchantConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
        }
    }
}

/// Round-amount and duplicate-description heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub round_divisors: Vec<u32>,
    /// Round amounts are unusual when history has fewer than this share of them
    pub round_frequency_threshold: f64,
    pub duplicate_similarity: f64,
    /// More near-duplicates than this is unusual
    pub duplicate_count: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            round_divisors: vec![100, 50, 25, 10],
            round_frequency_threshold: 0.10,
            duplicate_similarity: 0.9,
            duplicate_count: 5,
        }
    }
}

/// Composite score weights. The pattern heuristic has no weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub amount: f64,
    pub time: f64,
    pub frequency: f64,
    pub category: f64,
    pub merchant: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            amount: 0.30,
            time: 0.15,
            frequency: 0.20,
            category: 0.15,
            merchant: 0.20,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.amount + self.time + self.frequency + self.category + self.merchant
    }

    fn all(&self) -> [f64; 5] {
        [
            self.amount,
            self.time,
            self.frequency,
            self.category,
            self.merchant,
        ]
    }
}

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub enabled: bool,
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 1000,
        }
    }
}

impl AnomalyDetectionConfig {
    /// Load from a file; `.toml` is parsed as TOML, anything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = if is_toml(path) {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save to a file, format chosen by extension like `from_file`.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from environment variables
    ///
    /// `EXPENSE_ANOMALY_CONFIG` points at a config file; `EXPENSE_ANOMALY_MIN_HISTORY`
    /// overrides the history gate on top of whatever was loaded.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };

        if let Ok(raw) = std::env::var(MIN_HISTORY_ENV) {
            config.min_historical_data = raw.trim().parse().map_err(|_| {
                AnomalyDetectionError::Configuration(format!(
                    "{} must be a positive integer, got {:?}",
                    MIN_HISTORY_ENV, raw
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration validity
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(AnomalyDetectionError::Configuration(msg.to_string()));

        if self.min_historical_data == 0 {
            return fail("min_historical_data must be greater than 0");
        }
        if self.weights.all().iter().any(|w| !(0.0..=1.0).contains(w)) {
            return fail("Score weights must be between 0.0 and 1.0");
        }
        if (self.weights.total() - 1.0).abs() > 1e-9 {
            return fail("Score weights must sum to 1.0");
        }
        if self.amount.std_dev_multiplier <= 0.0 {
            return fail("Amount std_dev_multiplier must be greater than 0");
        }
        if self.time.rare_hour_rate <= 0.0 || self.time.rare_hour_rate > 1.0 {
            return fail("Time rare_hour_rate must be in (0, 1]");
        }
        if self.time.quiet_before_hour > 23 || self.time.quiet_after_hour > 23 {
            return fail("Quiet hours must be between 0 and 23");
        }
        if self.frequency.window_days <= 0 || self.frequency.min_history_days <= 0 {
            return fail("Frequency windows must be positive");
        }
        if self.frequency.window_days > MAX_WINDOW_DAYS
            || self.frequency.min_history_days > MAX_WINDOW_DAYS
        {
            return fail("Frequency windows must not exceed 3650 days");
        }
        if self.frequency.multiplier <= 0.0 {
            return fail("Frequency multiplier must be greater than 0");
        }
        if self.category.rare_frequency <= 0.0 || self.category.rare_frequency > 1.0 {
            return fail("Category rare_frequency must be in (0, 1]");
        }
        let similarities = [
            self.frequency.merchant_similarity,
            self.merchant.similarity_threshold,
            self.pattern.duplicate_similarity,
        ];
        if similarities.iter().any(|s| !(0.0..=1.0).contains(s)) {
            return fail("Similarity thresholds must be between 0.0 and 1.0");
        }
        if self.pattern.round_divisors.contains(&0) {
            return fail("Round divisors must be non-zero");
        }
        if self.events.buffer_size == 0 {
            return fail("Event buffer size must be greater than 0");
        }

        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}
