//! Expense anomaly detection engine
//!
//! Decides whether a newly submitted expense is statistically unusual for its
//! user and produces a normalized anomaly score.
//!
//! ## Pieces
//! - Five weighted feature scorers (amount, time, frequency, category, merchant)
//! - A boolean pattern heuristic (round amounts, duplicate descriptions)
//! - Per-user baselines, rebuilt wholesale by the trainer into a pluggable store
//! - Chronological replay statistics
//! - Event bus for consumers that act on flagged expenses
//!
//! Detection never fails outward: a scorer error only clears that one feature.

pub mod config;
pub mod detector;
pub mod errors;
pub mod events;
pub mod features;
pub mod model;
pub mod rules;
pub mod similarity;
pub mod statistics;
pub mod storage;

pub use config::AnomalyDetectionConfig;
pub use detector::AnomalyDetector;
pub use errors::{AnomalyDetectionError, Result};
pub use events::{AnomalyEvent, EventBus, EventSubscriber, LoggingSubscriber, StatisticsSubscriber};
pub use features::{
    AmountScorer, CategoryScorer, FeatureScorer, FrequencyScorer, MerchantScorer, TimeScorer,
};
pub use model::{ModelTrainer, PerformanceMetrics, TrainingOutcome, TrainingReport, UserBaselineModel};
pub use rules::{PatternScorer, ThreatLevel};
pub use similarity::jaccard;
pub use statistics::UserAnomalyStatistics;
pub use storage::{BaselineStore, MemoryBaselineStore};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Anomaly tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    UnusualAmount,
    UnusualTime,
    HighFrequency,
    UnusualCategory,
    NewMerchant,
    UnusualPattern,
}

impl AnomalyType {
    /// All tags in evaluation order
    pub const ALL: [AnomalyType; 6] = [
        AnomalyType::UnusualAmount,
        AnomalyType::UnusualTime,
        AnomalyType::HighFrequency,
        AnomalyType::UnusualCategory,
        AnomalyType::NewMerchant,
        AnomalyType::UnusualPattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::UnusualAmount => "UNUSUAL_AMOUNT",
            AnomalyType::UnusualTime => "UNUSUAL_TIME",
            AnomalyType::HighFrequency => "HIGH_FREQUENCY",
            AnomalyType::UnusualCategory => "UNUSUAL_CATEGORY",
            AnomalyType::NewMerchant => "NEW_MERCHANT",
            AnomalyType::UnusualPattern => "UNUSUAL_PATTERN",
        }
    }

    /// Short scorer name used in logs, metrics labels and errors
    pub fn scorer_name(&self) -> &'static str {
        match self {
            AnomalyType::UnusualAmount => "amount",
            AnomalyType::UnusualTime => "time",
            AnomalyType::HighFrequency => "frequency",
            AnomalyType::UnusualCategory => "category",
            AnomalyType::NewMerchant => "merchant",
            AnomalyType::UnusualPattern => "pattern",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one feature scorer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    /// Whether the feature is anomalous
    pub triggered: bool,
    /// Continuous score in [0, 1]
    pub score: f64,
}

impl FeatureScore {
    /// Scores are clamped into [0, 1]; NaN collapses to 0.0
    pub fn new(triggered: bool, score: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self { triggered, score }
    }

    /// Not anomalous, score 0.0
    pub fn clear() -> Self {
        Self {
            triggered: false,
            score: 0.0,
        }
    }
}

impl Default for FeatureScore {
    fn default() -> Self {
        Self::clear()
    }
}

/// Per-feature scores that make up the composite
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureBreakdown {
    pub amount: FeatureScore,
    pub time: FeatureScore,
    pub frequency: FeatureScore,
    pub category: FeatureScore,
    pub merchant: FeatureScore,
}

impl FeatureBreakdown {
    pub fn get(&self, anomaly_type: AnomalyType) -> Option<FeatureScore> {
        match anomaly_type {
            AnomalyType::UnusualAmount => Some(self.amount),
            AnomalyType::UnusualTime => Some(self.time),
            AnomalyType::HighFrequency => Some(self.frequency),
            AnomalyType::UnusualCategory => Some(self.category),
            AnomalyType::NewMerchant => Some(self.merchant),
            AnomalyType::UnusualPattern => None,
        }
    }

    pub(crate) fn set(&mut self, anomaly_type: AnomalyType, score: FeatureScore) {
        match anomaly_type {
            AnomalyType::UnusualAmount => self.amount = score,
            AnomalyType::UnusualTime => self.time = score,
            AnomalyType::HighFrequency => self.frequency = score,
            AnomalyType::UnusualCategory => self.category = score,
            AnomalyType::NewMerchant => self.merchant = score,
            AnomalyType::UnusualPattern => {}
        }
    }
}

/// Full evaluation of one expense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// History gate passed and at least one tag fired
    pub is_anomalous: bool,
    /// Composite score (0.0-1.0)
    pub score: f64,
    pub threat_level: ThreatLevel,
    /// Triggered tags in evaluation order
    pub anomalies: Vec<AnomalyType>,
    pub features: FeatureBreakdown,
    /// Number of historical expenses the evaluation saw
    pub history_size: usize,
}

impl AnomalyResult {
    /// Result for an expense with too little history to judge
    pub fn insufficient_history(history_size: usize) -> Self {
        Self {
            is_anomalous: false,
            score: 0.0,
            threat_level: ThreatLevel::None,
            anomalies: Vec::new(),
            features: FeatureBreakdown::default(),
            history_size,
        }
    }

    /// Human-readable summary for review queues and logs
    pub fn reason(&self) -> String {
        if self.anomalies.is_empty() {
            return "No anomalies detected".to_string();
        }
        let tags: Vec<&str> = self.anomalies.iter().map(|a| a.as_str()).collect();
        format!("Triggered {}: score {:.2}", tags.join(", "), self.score)
    }
}
