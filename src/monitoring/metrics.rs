//! Detection and training metrics
//!
//! Prometheus counters for the anomaly engine, kept in their own registry so an
//! embedding service can merge or expose them as it likes.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::info;

use crate::anomaly_detection::AnomalyType;

/// Anomaly engine metrics
pub struct DetectionMetrics {
    registry: Registry,

    detections_total: IntCounter,
    anomalies_flagged_total: IntCounter,
    anomaly_tags_total: IntCounterVec,
    scorer_failures_total: IntCounterVec,
    anomaly_score: Histogram,

    training_runs_total: IntCounter,
    training_user_failures_total: IntCounter,
    user_baselines: IntGauge,
}

impl DetectionMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let detections_total = IntCounter::new(
            "expense_anomaly_detections_total",
            "Expenses evaluated by the anomaly engine",
        )?;
        let anomalies_flagged_total = IntCounter::new(
            "expense_anomaly_flagged_total",
            "Expenses judged anomalous",
        )?;
        let anomaly_tags_total = IntCounterVec::new(
            Opts::new("expense_anomaly_tags_total", "Triggered anomaly tags by type"),
            &["anomaly_type"],
        )?;
        let scorer_failures_total = IntCounterVec::new(
            Opts::new(
                "expense_anomaly_scorer_failures_total",
                "Scorer errors downgraded to not anomalous",
            ),
            &["scorer"],
        )?;
        let anomaly_score = Histogram::with_opts(
            HistogramOpts::new("expense_anomaly_score", "Composite anomaly scores")
                .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
        )?;
        let training_runs_total = IntCounter::new(
            "expense_anomaly_training_runs_total",
            "Batch baseline training runs",
        )?;
        let training_user_failures_total = IntCounter::new(
            "expense_anomaly_training_user_failures_total",
            "Users whose baseline training failed",
        )?;
        let user_baselines = IntGauge::new(
            "expense_anomaly_user_baselines",
            "Users with a stored baseline",
        )?;

        registry.register(Box::new(detections_total.clone()))?;
        registry.register(Box::new(anomalies_flagged_total.clone()))?;
        registry.register(Box::new(anomaly_tags_total.clone()))?;
        registry.register(Box::new(scorer_failures_total.clone()))?;
        registry.register(Box::new(anomaly_score.clone()))?;
        registry.register(Box::new(training_runs_total.clone()))?;
        registry.register(Box::new(training_user_failures_total.clone()))?;
        registry.register(Box::new(user_baselines.clone()))?;

        info!("📊 Anomaly metrics initialized");

        Ok(Self {
            registry,
            detections_total,
            anomalies_flagged_total,
            anomaly_tags_total,
            scorer_failures_total,
            anomaly_score,
            training_runs_total,
            training_user_failures_total,
            user_baselines,
        })
    }

    /// Record one full evaluation
    pub fn record_detection(&self, anomalies: &[AnomalyType], score: f64, flagged: bool) {
        self.detections_total.inc();
        self.anomaly_score.observe(score);
        if flagged {
            self.anomalies_flagged_total.inc();
        }
        for anomaly in anomalies {
            self.anomaly_tags_total
                .with_label_values(&[anomaly.as_str()])
                .inc();
        }
    }

    pub fn record_scorer_failure(&self, scorer: AnomalyType) {
        self.scorer_failures_total
            .with_label_values(&[scorer.scorer_name()])
            .inc();
    }

    pub fn record_training(&self, failed_users: usize, user_baselines: usize) {
        self.training_runs_total.inc();
        self.training_user_failures_total.inc_by(failed_users as u64);
        self.user_baselines.set(user_baselines as i64);
    }

    pub fn detections(&self) -> u64 {
        self.detections_total.get()
    }

    pub fn anomalies_flagged(&self) -> u64 {
        self.anomalies_flagged_total.get()
    }

    pub fn scorer_failures(&self, scorer: AnomalyType) -> u64 {
        self.scorer_failures_total
            .with_label_values(&[scorer.scorer_name()])
            .get()
    }

    /// Export in the Prometheus text format
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
