//! Rule-based pattern checks
//!
//! Boolean heuristics that feed the anomaly tag list but not the weighted score,
//! plus the threat level buckets consumers use to triage flagged expenses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::anomaly_detection::config::PatternConfig;
use crate::anomaly_detection::similarity::jaccard;
use crate::core::expense::Expense;

/// Threat level classification for a scored expense
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThreatLevel {
    /// Nothing unusual
    None,
    Low,
    Medium,
    High,
    /// Should be held for manual review
    Critical,
}

impl ThreatLevel {
    /// Convert a composite score to a threat level
    pub fn from_score(score: f64) -> Self {
        if score < 0.2 {
            Self::None
        } else if score < 0.4 {
            Self::Low
        } else if score < 0.6 {
            Self::Medium
        } else if score < 0.8 {
            Self::High
        } else {
            Self::Critical
        }
    }

    /// Check if the expense should be routed to review
    pub fn needs_review(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// Round-number and near-duplicate description heuristics.
pub struct PatternScorer {
    config: PatternConfig,
}

impl PatternScorer {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// Divisible by one of the round divisors, or written with a trailing ".50".
    pub fn is_round_amount(&self, amount: Decimal) -> bool {
        let divisible = self
            .config
            .round_divisors
            .iter()
            .filter(|d| **d != 0)
            .any(|d| (amount % Decimal::from(*d)).is_zero());

        divisible || amount.to_string().ends_with(".50")
    }

    /// A round amount from a user who rarely spends round amounts.
    pub fn is_unusual_round_amount(&self, expense: &Expense, history: &[Expense]) -> bool {
        if !self.is_round_amount(expense.amount) {
            return false;
        }

        let round_count = history
            .iter()
            .filter(|h| self.is_round_amount(h.amount))
            .count();
        let frequency = if history.is_empty() {
            0.0
        } else {
            round_count as f64 / history.len() as f64
        };

        frequency < self.config.round_frequency_threshold
    }

    /// Number of past expenses whose description nearly matches the candidate's.
    pub fn duplicate_description_count(&self, expense: &Expense, history: &[Expense]) -> usize {
        let Some(description) = expense.description_text() else {
            return 0;
        };

        history
            .iter()
            .filter_map(|h| h.description_text())
            .filter(|past| jaccard(description, past) > self.config.duplicate_similarity)
            .count()
    }

    /// True when either heuristic fires.
    pub fn evaluate(&self, expense: &Expense, history: &[Expense]) -> bool {
        self.is_unusual_round_amount(expense, history)
            || self.duplicate_description_count(expense, history) > self.config.duplicate_count
    }
}
