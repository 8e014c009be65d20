//! Feature scorers
//!
//! Each scorer compares one candidate expense against the caller-supplied history
//! and reports whether its feature looks unusual plus a continuous score in [0, 1].
//! Scorers are stateless: every statistic is recomputed from `history` on each call,
//! so they can be shared across threads freely.

use chrono::Duration;

use crate::anomaly_detection::config::{
    AmountConfig, CategoryConfig, FrequencyConfig, MerchantConfig, TimeConfig,
};
use crate::anomaly_detection::errors::{AnomalyDetectionError, Result};
use crate::anomaly_detection::similarity::jaccard;
use crate::anomaly_detection::{AnomalyType, FeatureScore};
use crate::core::expense::Expense;

/// A single weighted feature of the composite score.
pub trait FeatureScorer: Send + Sync {
    /// Tag reported when this feature triggers
    fn anomaly_type(&self) -> AnomalyType;

    /// Score `expense` against `history`.
    fn evaluate(&self, expense: &Expense, history: &[Expense]) -> Result<FeatureScore>;

    fn name(&self) -> &'static str {
        self.anomaly_type().scorer_name()
    }
}

/// Mean and sample standard deviation (n - 1 denominator).
///
/// Fewer than two values have no spread, so the deviation is 0.0.
pub(crate) fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let sq_diff: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, (sq_diff / (n - 1.0)).sqrt())
}

fn amount_of(scorer: &'static str, expense: &Expense) -> Result<f64> {
    expense.amount_f64().ok_or_else(|| {
        AnomalyDetectionError::scorer(
            scorer,
            format!("amount {} of expense {} is not representable", expense.amount, expense.id),
        )
    })
}

fn finite(scorer: &'static str, what: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AnomalyDetectionError::scorer(
            scorer,
            format!("{} is not finite", what),
        ))
    }
}

/// Flags amounts far outside the user's usual spread.
pub struct AmountScorer {
    config: AmountConfig,
}

impl AmountScorer {
    pub fn new(config: AmountConfig) -> Self {
        Self { config }
    }
}

impl FeatureScorer for AmountScorer {
    fn anomaly_type(&self) -> AnomalyType {
        AnomalyType::UnusualAmount
    }

    fn evaluate(&self, expense: &Expense, history: &[Expense]) -> Result<FeatureScore> {
        let name = self.name();
        let amount = amount_of(name, expense)?;

        // Narrow to the same category only when there is enough of it to be meaningful
        let same_category: Vec<&Expense> = history
            .iter()
            .filter(|h| h.same_category(expense))
            .collect();
        let relevant: Vec<&Expense> = if same_category.len() >= self.config.min_same_category {
            same_category
        } else {
            history.iter().collect()
        };

        if relevant.len() < self.config.min_relevant {
            return Ok(FeatureScore::clear());
        }

        let amounts = relevant
            .iter()
            .map(|e| amount_of(name, e))
            .collect::<Result<Vec<f64>>>()?;
        let (mean, std_dev) = mean_and_std_dev(&amounts);
        let mean = finite(name, "mean", mean)?;
        let std_dev = finite(name, "standard deviation", std_dev)?;

        if std_dev == 0.0 {
            return Ok(FeatureScore::clear());
        }

        let deviation = (amount - mean).abs();
        let threshold = std_dev * self.config.std_dev_multiplier;
        let score = finite(name, "score", deviation / std_dev / self.config.std_dev_multiplier)?;

        Ok(FeatureScore::new(deviation > threshold, score.min(1.0)))
    }
}

/// Flags expenses recorded at hours the user rarely or never spends.
pub struct TimeScorer {
    config: TimeConfig,
}

impl TimeScorer {
    pub fn new(config: TimeConfig) -> Self {
        Self { config }
    }

    fn is_quiet_hour(&self, hour: u32) -> bool {
        hour < self.config.quiet_before_hour || hour > self.config.quiet_after_hour
    }
}

impl FeatureScorer for TimeScorer {
    fn anomaly_type(&self) -> AnomalyType {
        AnomalyType::UnusualTime
    }

    fn evaluate(&self, expense: &Expense, history: &[Expense]) -> Result<FeatureScore> {
        let hour = expense.hour();

        let mut histogram = [0usize; 24];
        for past in history {
            histogram[past.hour() as usize] += 1;
        }

        let count = histogram[hour as usize];
        if count == 0 {
            let quiet = self.is_quiet_hour(hour);
            let score = if quiet {
                self.config.unseen_quiet_score
            } else {
                self.config.unseen_score
            };
            return Ok(FeatureScore::new(quiet, score));
        }

        let rate = count as f64 / history.len() as f64;
        let score = (1.0 - rate / self.config.rare_hour_rate).max(0.0);

        Ok(FeatureScore::new(rate < self.config.rare_hour_rate, score))
    }
}

/// Flags bursts of expenses similar to the candidate within a short window.
pub struct FrequencyScorer {
    config: FrequencyConfig,
}

impl FrequencyScorer {
    pub fn new(config: FrequencyConfig) -> Self {
        Self { config }
    }

    /// Two expenses are similar when at least two of category, merchant and amount agree.
    pub fn is_similar(&self, a: &Expense, b: &Expense) -> Result<bool> {
        let mut matches = 0;

        if a.same_category(b) {
            matches += 1;
        }

        if let (Some(left), Some(right)) = (a.merchant(), b.merchant()) {
            if jaccard(left, right) > self.config.merchant_similarity {
                matches += 1;
            }
        }

        let name = self.name();
        let x = amount_of(name, a)?;
        let y = amount_of(name, b)?;
        let larger = x.abs().max(y.abs());
        if larger == 0.0 || (x - y).abs() <= self.config.amount_tolerance * larger {
            matches += 1;
        }

        Ok(matches >= 2)
    }
}

impl FeatureScorer for FrequencyScorer {
    fn anomaly_type(&self) -> AnomalyType {
        AnomalyType::HighFrequency
    }

    fn evaluate(&self, expense: &Expense, history: &[Expense]) -> Result<FeatureScore> {
        let window_start = Duration::try_days(self.config.window_days)
            .and_then(|window| expense.expense_date.checked_sub_signed(window))
            .ok_or_else(|| {
                AnomalyDetectionError::scorer(
                    self.name(),
                    format!(
                        "{}-day window before {} is out of the calendar range",
                        self.config.window_days, expense.expense_date
                    ),
                )
            })?;

        let mut total_similar = 0usize;
        let mut recent_count = 0usize;
        for past in history {
            if !self.is_similar(expense, past)? {
                continue;
            }
            total_similar += 1;
            if past.expense_date >= window_start && past.expense_date <= expense.expense_date {
                recent_count += 1;
            }
        }

        if total_similar == 0 {
            return Ok(FeatureScore::clear());
        }

        let earliest = history
            .iter()
            .map(|e| e.expense_date)
            .min()
            .unwrap_or(expense.expense_date);
        let history_days = (expense.expense_date - earliest)
            .num_days()
            .max(self.config.min_history_days);

        let expected = total_similar as f64 * self.config.window_days as f64 / history_days as f64;
        let expected = finite(self.name(), "expected weekly rate", expected)?;

        let recent = recent_count as f64;
        let triggered = recent > expected * self.config.multiplier;
        let score = ((recent / expected - 1.0) / self.config.multiplier).clamp(0.0, 1.0);

        Ok(FeatureScore::new(triggered, score))
    }
}

/// Flags categories the user rarely or never uses.
pub struct CategoryScorer {
    config: CategoryConfig,
}

impl CategoryScorer {
    pub fn new(config: CategoryConfig) -> Self {
        Self { config }
    }
}

impl FeatureScorer for CategoryScorer {
    fn anomaly_type(&self) -> AnomalyType {
        AnomalyType::UnusualCategory
    }

    fn evaluate(&self, expense: &Expense, history: &[Expense]) -> Result<FeatureScore> {
        if expense.category_name().is_none() {
            return Ok(FeatureScore::clear());
        }

        let count = history.iter().filter(|h| h.same_category(expense)).count();
        if count == 0 {
            return Ok(FeatureScore::new(true, 1.0));
        }

        let frequency = count as f64 / history.len() as f64;
        let score = (1.0 - frequency / self.config.rare_frequency).max(0.0);

        Ok(FeatureScore::new(frequency < self.config.rare_frequency, score))
    }
}

/// Flags merchants that resemble nothing in the user's history.
pub struct MerchantScorer {
    config: MerchantConfig,
}

impl MerchantScorer {
    pub fn new(config: MerchantConfig) -> Self {
        Self { config }
    }
}

impl FeatureScorer for MerchantScorer {
    fn anomaly_type(&self) -> AnomalyType {
        AnomalyType::NewMerchant
    }

    fn evaluate(&self, expense: &Expense, history: &[Expense]) -> Result<FeatureScore> {
        let Some(merchant) = expense.merchant() else {
            return Ok(FeatureScore::clear());
        };

        let lowered = merchant.to_lowercase();
        let known: Vec<&str> = history.iter().filter_map(|h| h.merchant()).collect();
        if known.iter().any(|k| k.to_lowercase() == lowered) {
            return Ok(FeatureScore::clear());
        }

        let max_similarity = known
            .iter()
            .map(|k| jaccard(merchant, k))
            .fold(0.0_f64, f64::max);

        Ok(FeatureScore::new(
            max_similarity <= self.config.similarity_threshold,
            1.0 - max_similarity,
        ))
    }
}
