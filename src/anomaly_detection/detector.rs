//! Anomaly detector - main entry point
//!
//! Runs the feature scorers and the pattern heuristic over a candidate expense,
//! combines them into tags and a weighted score, and fronts baseline training.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::anomaly_detection::config::AnomalyDetectionConfig;
use crate::anomaly_detection::errors::Result;
use crate::anomaly_detection::events::{AnomalyEvent, EventBus, LoggingSubscriber};
use crate::anomaly_detection::features::{
    AmountScorer, CategoryScorer, FeatureScorer, FrequencyScorer, MerchantScorer, TimeScorer,
};
use crate::anomaly_detection::model::{
    ModelTrainer, PerformanceMetrics, TrainingOutcome, TrainingReport, UserBaselineModel,
};
use crate::anomaly_detection::rules::{PatternScorer, ThreatLevel};
use crate::anomaly_detection::storage::{BaselineStore, MemoryBaselineStore};
use crate::anomaly_detection::{AnomalyResult, AnomalyType, FeatureBreakdown, FeatureScore};
use crate::core::expense::Expense;
use crate::monitoring::DetectionMetrics;

/// Anomaly detector
///
/// Detection methods take `&self` and only read their arguments, so one detector
/// can serve many threads. Training writes go through the injected store.
pub struct AnomalyDetector {
    config: AnomalyDetectionConfig,
    /// Weighted scorers in evaluation order
    scorers: Vec<Box<dyn FeatureScorer>>,
    pattern: PatternScorer,
    trainer: ModelTrainer,
    event_bus: Arc<EventBus>,
    metrics: Option<Arc<DetectionMetrics>>,
}

impl AnomalyDetector {
    /// Create a detector with default configuration over `store`
    pub fn new(store: Arc<dyn BaselineStore>) -> Self {
        Self::build(AnomalyDetectionConfig::default(), store)
    }

    /// Default configuration with an in-memory baseline store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBaselineStore::new()))
    }

    /// Create a detector from a custom configuration, rejecting invalid ones
    pub fn with_config(
        config: AnomalyDetectionConfig,
        store: Arc<dyn BaselineStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, store))
    }

    fn build(config: AnomalyDetectionConfig, store: Arc<dyn BaselineStore>) -> Self {
        info!(
            min_historical_data = config.min_historical_data,
            "🤖 Initializing expense anomaly detector"
        );

        let event_bus = Arc::new(EventBus::new(config.events.buffer_size));
        if config.events.enabled {
            event_bus.subscribe(Arc::new(LoggingSubscriber::new("logging")));
        }

        Self {
            scorers: Self::build_scorers(&config),
            pattern: PatternScorer::new(config.pattern.clone()),
            trainer: ModelTrainer::new(store, config.min_historical_data),
            event_bus,
            metrics: None,
            config,
        }
    }

    /// Attach Prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<DetectionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn build_scorers(config: &AnomalyDetectionConfig) -> Vec<Box<dyn FeatureScorer>> {
        vec![
            Box::new(AmountScorer::new(config.amount.clone())),
            Box::new(TimeScorer::new(config.time.clone())),
            Box::new(FrequencyScorer::new(config.frequency.clone())),
            Box::new(CategoryScorer::new(config.category.clone())),
            Box::new(MerchantScorer::new(config.merchant.clone())),
        ]
    }

    /// Whether `history` is large enough to judge against
    pub fn has_sufficient_history(&self, history: &[Expense]) -> bool {
        history.len() >= self.config.min_historical_data
    }

    // === Detection ===

    /// Triggered tags, in the fixed order amount, time, frequency, category,
    /// merchant, pattern.
    ///
    /// Not gated on history size: tags can fire against fewer than
    /// `min_historical_data` expenses. Submission paths should go through
    /// [`evaluate`](Self::evaluate) or [`is_anomalous`](Self::is_anomalous), which
    /// never judge an expense on too little history.
    pub fn detect_anomalies(&self, expense: &Expense, history: &[Expense]) -> Vec<AnomalyType> {
        let features = self.score_features(expense, history);
        let pattern = self.pattern.evaluate(expense, history);
        Self::collect_anomalies(&features, pattern)
    }

    /// True when history passes the gate and at least one tag fires
    pub fn is_anomalous(&self, expense: &Expense, history: &[Expense]) -> bool {
        if !self.has_sufficient_history(history) {
            return false;
        }
        !self.detect_anomalies(expense, history).is_empty()
    }

    /// Weighted composite of the five feature scores, 0.0 below the history gate
    pub fn calculate_anomaly_score(&self, expense: &Expense, history: &[Expense]) -> f64 {
        if !self.has_sufficient_history(history) {
            return 0.0;
        }
        let features = self.score_features(expense, history);
        self.composite_score(&features)
    }

    /// Weighted sum of feature scores clamped to [0, 1]. The pattern heuristic
    /// has no weight and never contributes.
    pub fn composite_score(&self, features: &FeatureBreakdown) -> f64 {
        let weights = &self.config.weights;
        let score = weights.amount * features.amount.score
            + weights.time * features.time.score
            + weights.frequency * features.frequency.score
            + weights.category * features.category.score
            + weights.merchant * features.merchant.score;

        if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        }
    }

    /// Full evaluation for the submission path: tags, score and threat level in one
    /// pass, published to the event bus and metrics.
    pub fn evaluate(&self, expense: &Expense, history: &[Expense]) -> AnomalyResult {
        let result = if self.has_sufficient_history(history) {
            let features = self.score_features(expense, history);
            let pattern = self.pattern.evaluate(expense, history);
            let anomalies = Self::collect_anomalies(&features, pattern);
            let score = self.composite_score(&features);

            AnomalyResult {
                is_anomalous: !anomalies.is_empty(),
                score,
                threat_level: ThreatLevel::from_score(score),
                anomalies,
                features,
                history_size: history.len(),
            }
        } else {
            debug!(
                expense_id = %expense.id,
                history_size = history.len(),
                "Insufficient history, skipping detection"
            );
            AnomalyResult::insufficient_history(history.len())
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_detection(&result.anomalies, result.score, result.is_anomalous);
        }

        if self.config.events.enabled {
            self.event_bus.publish(AnomalyEvent::DetectionCompleted {
                expense_id: expense.id,
                user_id: expense.user_id.clone(),
                anomalies: result.anomalies.clone(),
                score: result.score,
                threat_level: result.threat_level,
                timestamp: Utc::now(),
            });
            if result.is_anomalous {
                self.event_bus.publish(AnomalyEvent::AnomalyFlagged {
                    expense_id: expense.id,
                    user_id: expense.user_id.clone(),
                    anomalies: result.anomalies.clone(),
                    score: result.score,
                    threat_level: result.threat_level,
                    timestamp: Utc::now(),
                });
            }
        }

        if result.is_anomalous {
            info!(
                expense_id = %expense.id,
                user_id = %expense.user_id,
                "⚠️ {}",
                result.reason()
            );
        } else {
            debug!(expense_id = %expense.id, score = %format!("{:.2}", result.score), "✅ Expense looks normal");
        }

        result
    }

    fn score_features(&self, expense: &Expense, history: &[Expense]) -> FeatureBreakdown {
        let mut features = FeatureBreakdown::default();
        for scorer in &self.scorers {
            let score = self.run_scorer(scorer.as_ref(), expense, history);
            features.set(scorer.anomaly_type(), score);
        }
        features
    }

    /// A failing scorer counts as "not anomalous" for its feature only.
    fn run_scorer(
        &self,
        scorer: &dyn FeatureScorer,
        expense: &Expense,
        history: &[Expense],
    ) -> FeatureScore {
        match scorer.evaluate(expense, history) {
            Ok(score) => score,
            Err(e) => {
                self.report_scorer_failure(scorer.anomaly_type(), expense, &e.to_string());
                FeatureScore::clear()
            }
        }
    }

    fn report_scorer_failure(&self, scorer: AnomalyType, expense: &Expense, error: &str) {
        warn!(
            expense_id = %expense.id,
            scorer = scorer.scorer_name(),
            error,
            "Scorer failed, treating feature as not anomalous"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_scorer_failure(scorer);
        }
        if self.config.events.enabled {
            self.event_bus.publish(AnomalyEvent::ScorerFailed {
                expense_id: expense.id,
                scorer,
                error: error.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    fn collect_anomalies(features: &FeatureBreakdown, pattern: bool) -> Vec<AnomalyType> {
        AnomalyType::ALL
            .iter()
            .copied()
            .filter(|anomaly| match features.get(*anomaly) {
                Some(score) => score.triggered,
                None => pattern,
            })
            .collect()
    }

    // === Training ===

    /// Rebuild baselines for every user in `expenses`.
    pub fn train_model(&self, expenses: &[Expense]) -> TrainingReport {
        let report = self.trainer.train_model(expenses);
        self.after_training(&report);
        report
    }

    /// [`train_model`](Self::train_model) with one blocking task per user.
    pub async fn train_model_concurrent(&self, expenses: Vec<Expense>) -> TrainingReport {
        let report = self.trainer.train_model_concurrent(expenses).await;
        self.after_training(&report);
        report
    }

    pub fn train_user_model(&self, user_id: &str, expenses: &[Expense]) -> Result<TrainingOutcome> {
        let result = self.trainer.train_user_model(user_id, expenses);
        match &result {
            Ok(outcome) => self.publish_outcome(user_id, outcome),
            Err(e) => self.publish_outcome(
                user_id,
                &TrainingOutcome::Failed {
                    error: e.to_string(),
                },
            ),
        }
        result
    }

    /// Refresh one user's baseline after new expenses land
    pub fn update_user_model(&self, user_id: &str, expenses: &[Expense]) -> Result<TrainingOutcome> {
        info!(user_id, expense_count = expenses.len(), "🔄 Refreshing user baseline");
        self.train_user_model(user_id, expenses)
    }

    fn after_training(&self, report: &TrainingReport) {
        for (user_id, outcome) in &report.outcomes {
            self.publish_outcome(user_id, outcome);
        }

        let metrics = self.trainer.performance_metrics();
        if let Some(prometheus) = &self.metrics {
            prometheus.record_training(report.failed_users().len(), metrics.user_baselines_count);
        }

        if self.config.events.enabled {
            self.event_bus.publish(AnomalyEvent::TrainingCompleted {
                trained: report.trained_users().len(),
                skipped: report.skipped_users().len(),
                failed: report.failed_users().len(),
                timestamp: report.finished_at,
            });
        }
    }

    fn publish_outcome(&self, user_id: &str, outcome: &TrainingOutcome) {
        if !self.config.events.enabled {
            return;
        }
        let event = match outcome {
            TrainingOutcome::Trained { expense_count } => AnomalyEvent::BaselineUpdated {
                user_id: user_id.to_string(),
                expense_count: *expense_count,
                timestamp: Utc::now(),
            },
            TrainingOutcome::Failed { error } => AnomalyEvent::UserTrainingFailed {
                user_id: user_id.to_string(),
                error: error.clone(),
                timestamp: Utc::now(),
            },
            TrainingOutcome::Skipped { .. } => return,
        };
        self.event_bus.publish(event);
    }

    /// Stored baseline for a user, if one has been trained
    pub fn baseline(&self, user_id: &str) -> Result<Option<Arc<UserBaselineModel>>> {
        self.trainer.store().get(user_id)
    }

    /// Snapshot of the last training batch's counters
    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        self.trainer.performance_metrics()
    }

    // === Configuration ===

    pub fn config(&self) -> &AnomalyDetectionConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn store(&self) -> Arc<dyn BaselineStore> {
        self.trainer.store()
    }

    /// Swap in a new validated configuration; stored baselines and counters are kept.
    pub fn update_config(&mut self, config: AnomalyDetectionConfig) -> Result<()> {
        config.validate()?;

        self.scorers = Self::build_scorers(&config);
        self.pattern = PatternScorer::new(config.pattern.clone());
        self.trainer.set_min_historical_data(config.min_historical_data);
        self.config = config;

        info!("✅ Anomaly detection configuration updated");
        Ok(())
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly_detection::errors::AnomalyDetectionError;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    /// Frequency scorer stand-in that always errors
    struct BrokenFrequencyScorer;

    impl FeatureScorer for BrokenFrequencyScorer {
        fn anomaly_type(&self) -> AnomalyType {
            AnomalyType::HighFrequency
        }

        fn evaluate(&self, _expense: &Expense, _history: &[Expense]) -> Result<FeatureScore> {
            Err(AnomalyDetectionError::scorer(self.name(), "window unavailable"))
        }
    }

    fn expense(amount: i64, day: u32, hour: u32) -> Expense {
        let date = NaiveDate::from_ymd_opt(2024, 4, day).unwrap();
        Expense::new(
            "alice",
            Decimal::from(amount),
            date,
            date.and_hms_opt(hour, 0, 0).unwrap(),
        )
    }

    /// Twelve lunches clustered around 20
    fn lunch_history() -> Vec<Expense> {
        [14, 27, 19, 22, 16, 24, 12, 21, 18, 29, 17, 21]
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                expense(*amount, 1 + i as u32, 12 + (i % 2) as u32)
                    .with_category("Meals")
                    .with_merchant("Corner Deli")
            })
            .collect()
    }

    #[test]
    fn test_detector_creation() {
        let detector = AnomalyDetector::default();
        assert_eq!(detector.config().min_historical_data, 10);
        assert_eq!(detector.event_bus().subscriber_count(), 1);
    }

    #[test]
    fn test_composite_score_fixture() {
        let detector = AnomalyDetector::default();
        let features = FeatureBreakdown {
            amount: FeatureScore::new(true, 0.8),
            time: FeatureScore::new(false, 0.2),
            frequency: FeatureScore::new(false, 0.0),
            category: FeatureScore::new(true, 1.0),
            merchant: FeatureScore::new(false, 0.5),
        };

        assert!((detector.composite_score(&features) - 0.52).abs() < 1e-12);
    }

    #[test]
    fn test_insufficient_history_gate() {
        let detector = AnomalyDetector::default();
        let history: Vec<Expense> = lunch_history().into_iter().take(9).collect();
        let candidate = expense(5000, 20, 3).with_merchant("Casino");

        assert!(!detector.is_anomalous(&candidate, &history));
        assert_eq!(detector.calculate_anomaly_score(&candidate, &history), 0.0);
        // tags themselves are not gated
        assert!(!detector.detect_anomalies(&candidate, &history).is_empty());

        let result = detector.evaluate(&candidate, &history);
        assert_eq!(result, AnomalyResult::insufficient_history(9));
    }

    #[test]
    fn test_typical_expense_is_quiet() {
        let detector = AnomalyDetector::default();
        let candidate = expense(21, 20, 12)
            .with_category("Meals")
            .with_merchant("Corner Deli");

        let result = detector.evaluate(&candidate, &lunch_history());
        assert!(!result.anomalies.contains(&AnomalyType::UnusualAmount));
        assert!(!result.anomalies.contains(&AnomalyType::NewMerchant));
        assert!(!result.anomalies.contains(&AnomalyType::UnusualCategory));
        assert!(result.score < 0.3);
    }

    #[test]
    fn test_pattern_does_not_move_score() {
        let detector = AnomalyDetector::default();
        let history = lunch_history();
        let round = expense(20, 20, 12).with_category("Meals").with_merchant("Corner Deli");
        let odd = expense(21, 20, 12).with_category("Meals").with_merchant("Corner Deli");

        let anomalies = detector.detect_anomalies(&round, &history);
        assert!(anomalies.contains(&AnomalyType::UnusualPattern));

        let features_round = detector.score_features(&round, &history);
        assert_eq!(
            detector.calculate_anomaly_score(&round, &history),
            detector.composite_score(&features_round)
        );
        assert!(!detector.detect_anomalies(&odd, &history).contains(&AnomalyType::UnusualPattern));
    }

    #[test]
    fn test_events_published_for_flagged_expense() {
        let detector = AnomalyDetector::default();
        let candidate = expense(500, 20, 3)
            .with_category("Meals")
            .with_merchant("Brand New Place");

        let result = detector.evaluate(&candidate, &lunch_history());
        assert!(result.is_anomalous);

        let events = detector.event_bus().get_recent_events(10);
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["detection_completed", "anomaly_flagged"]);
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let mut detector = AnomalyDetector::default();
        let mut config = AnomalyDetectionConfig::default();
        config.weights.merchant = 0.9;
        assert!(detector.update_config(config).is_err());

        let mut config = AnomalyDetectionConfig::default();
        config.min_historical_data = 3;
        detector.update_config(config).unwrap();
        let history: Vec<Expense> = lunch_history().into_iter().take(3).collect();
        assert!(detector.has_sufficient_history(&history));
    }

    #[test]
    fn test_failing_scorer_is_cleared_and_reported() {
        let metrics = Arc::new(DetectionMetrics::new().unwrap());
        let mut detector = AnomalyDetector::default().with_metrics(metrics.clone());
        let slot = detector
            .scorers
            .iter()
            .position(|s| s.anomaly_type() == AnomalyType::HighFrequency)
            .unwrap();
        detector.scorers[slot] = Box::new(BrokenFrequencyScorer);

        let candidate = expense(500, 20, 3)
            .with_category("Meals")
            .with_merchant("Brand New Place");
        let result = detector.evaluate(&candidate, &lunch_history());

        assert_eq!(result.features.frequency, FeatureScore::clear());
        assert!(!result.anomalies.contains(&AnomalyType::HighFrequency));
        assert!(result.anomalies.contains(&AnomalyType::UnusualAmount));
        assert!(result.anomalies.contains(&AnomalyType::NewMerchant));
        assert!(result.is_anomalous);

        assert_eq!(metrics.scorer_failures(AnomalyType::HighFrequency), 1);
        assert_eq!(metrics.detections(), 1);

        let events = detector.event_bus().get_recent_events(10);
        let failure = events
            .iter()
            .find(|e| e.event_type() == "scorer_failed")
            .unwrap();
        match failure {
            AnomalyEvent::ScorerFailed {
                expense_id,
                scorer,
                error,
                ..
            } => {
                assert_eq!(*expense_id, candidate.id);
                assert_eq!(*scorer, AnomalyType::HighFrequency);
                assert!(error.contains("window unavailable"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_expense_at_calendar_start_does_not_panic() {
        let metrics = Arc::new(DetectionMetrics::new().unwrap());
        let detector = AnomalyDetector::default().with_metrics(metrics.clone());
        let at_min = |amount: i64| {
            Expense::new(
                "alice",
                Decimal::from(amount),
                NaiveDate::MIN,
                NaiveDate::MIN.and_hms_opt(12, 0, 0).unwrap(),
            )
            .with_category("Meals")
        };
        let history: Vec<Expense> = (0..12).map(|i| at_min(20 + i % 3)).collect();
        let candidate = at_min(21);

        let score = detector.calculate_anomaly_score(&candidate, &history);
        assert!((0.0..=1.0).contains(&score));
        assert!(!detector
            .detect_anomalies(&candidate, &history)
            .contains(&AnomalyType::HighFrequency));
        assert_eq!(metrics.scorer_failures(AnomalyType::HighFrequency), 2);
    }

    #[test]
    fn test_with_config_validates() {
        let store: Arc<dyn BaselineStore> = Arc::new(MemoryBaselineStore::new());

        let mut config = AnomalyDetectionConfig::default();
        config.min_historical_data = 0;
        assert!(AnomalyDetector::with_config(config, store.clone()).is_err());

        let mut config = AnomalyDetectionConfig::default();
        config.frequency.window_days = 100_000_000;
        assert!(AnomalyDetector::with_config(config.clone(), store.clone()).is_err());
        assert!(AnomalyDetector::default().update_config(config).is_err());

        let mut config = AnomalyDetectionConfig::default();
        config.min_historical_data = 5;
        let detector = AnomalyDetector::with_config(config, store).unwrap();
        assert_eq!(detector.config().min_historical_data, 5);
    }
}
