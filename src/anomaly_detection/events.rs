//! Event system
//!
//! Publish-subscribe hooks for whatever acts on detection results (review
//! queues, notifications). Delivery lives outside the engine.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::anomaly_detection::{AnomalyType, ThreatLevel};

/// Anomaly detection event
#[derive(Debug, Clone, PartialEq)]
pub enum AnomalyEvent {
    /// An expense went through full evaluation
    DetectionCompleted {
        expense_id: Uuid,
        user_id: String,
        anomalies: Vec<AnomalyType>,
        score: f64,
        threat_level: ThreatLevel,
        timestamp: DateTime<Utc>,
    },

    /// An expense was judged anomalous
    AnomalyFlagged {
        expense_id: Uuid,
        user_id: String,
        anomalies: Vec<AnomalyType>,
        score: f64,
        threat_level: ThreatLevel,
        timestamp: DateTime<Utc>,
    },

    /// A scorer failed and was treated as not anomalous
    ScorerFailed {
        expense_id: Uuid,
        scorer: AnomalyType,
        error: String,
        timestamp: DateTime<Utc>,
    },

    BaselineUpdated {
        user_id: String,
        expense_count: usize,
        timestamp: DateTime<Utc>,
    },

    UserTrainingFailed {
        user_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A batch training run finished
    TrainingCompleted {
        trained: usize,
        skipped: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl AnomalyEvent {
    /// Event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            AnomalyEvent::DetectionCompleted { .. } => "detection_completed",
            AnomalyEvent::AnomalyFlagged { .. } => "anomaly_flagged",
            AnomalyEvent::ScorerFailed { .. } => "scorer_failed",
            AnomalyEvent::BaselineUpdated { .. } => "baseline_updated",
            AnomalyEvent::UserTrainingFailed { .. } => "user_training_failed",
            AnomalyEvent::TrainingCompleted { .. } => "training_completed",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AnomalyEvent::DetectionCompleted { timestamp, .. }
            | AnomalyEvent::AnomalyFlagged { timestamp, .. }
            | AnomalyEvent::ScorerFailed { timestamp, .. }
            | AnomalyEvent::BaselineUpdated { timestamp, .. }
            | AnomalyEvent::UserTrainingFailed { timestamp, .. }
            | AnomalyEvent::TrainingCompleted { timestamp, .. } => *timestamp,
        }
    }
}

/// Event subscriber trait
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &AnomalyEvent);

    fn name(&self) -> &str;

    /// Event types of interest; empty means all
    fn interested_events(&self) -> Vec<&'static str>;
}

/// Event bus with a bounded buffer of recent events
pub struct EventBus {
    subscribers: Mutex<Vec<Arc<dyn EventSubscriber>>>,
    event_buffer: Mutex<VecDeque<AnomalyEvent>>,
    buffer_size: usize,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            subscribers: Mutex::new(Vec::new()),
            event_buffer: Mutex::new(VecDeque::with_capacity(buffer_size)),
            buffer_size,
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.lock().push(subscriber);
    }

    pub fn unsubscribe(&self, subscriber_name: &str) {
        self.subscribers.lock().retain(|s| s.name() != subscriber_name);
    }

    pub fn publish(&self, event: AnomalyEvent) {
        {
            let mut buffer = self.event_buffer.lock();
            if buffer.len() >= self.buffer_size {
                buffer.pop_front();
            }
            buffer.push_back(event.clone());
        }

        // Snapshot so a subscriber may publish or subscribe without deadlocking
        let subscribers: Vec<Arc<dyn EventSubscriber>> = self.subscribers.lock().clone();
        for subscriber in subscribers {
            let interested = subscriber.interested_events();
            if interested.is_empty() || interested.contains(&event.event_type()) {
                subscriber.on_event(&event);
            }
        }
    }

    /// Most recent `count` events, oldest first
    pub fn get_recent_events(&self, count: usize) -> Vec<AnomalyEvent> {
        let buffer = self.event_buffer.lock();
        let start = buffer.len().saturating_sub(count);
        buffer.iter().skip(start).cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Logging subscriber - writes events to the tracing log
pub struct LoggingSubscriber {
    name: String,
}

impl LoggingSubscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl EventSubscriber for LoggingSubscriber {
    fn on_event(&self, event: &AnomalyEvent) {
        use tracing::{debug, info, warn};

        match event {
            AnomalyEvent::DetectionCompleted {
                expense_id, score, ..
            } => {
                debug!(expense_id = %expense_id, score = %format!("{:.2}", score), "Expense scored");
            }
            AnomalyEvent::AnomalyFlagged {
                expense_id,
                user_id,
                anomalies,
                score,
                threat_level,
                ..
            } => {
                warn!(
                    expense_id = %expense_id,
                    user_id = %user_id,
                    anomalies = ?anomalies,
                    score = %format!("{:.2}", score),
                    threat_level = ?threat_level,
                    "Expense flagged as anomalous"
                );
            }
            AnomalyEvent::ScorerFailed {
                expense_id,
                scorer,
                error,
                ..
            } => {
                warn!(expense_id = %expense_id, scorer = %scorer, error = %error, "Scorer failed");
            }
            AnomalyEvent::UserTrainingFailed { user_id, error, .. } => {
                warn!(user_id = %user_id, error = %error, "Baseline training failed");
            }
            AnomalyEvent::TrainingCompleted {
                trained,
                skipped,
                failed,
                ..
            } => {
                info!(trained, skipped, failed, "Baseline training completed");
            }
            AnomalyEvent::BaselineUpdated { .. } => {}
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn interested_events(&self) -> Vec<&'static str> {
        vec![]
    }
}

/// Statistics subscriber - aggregates detection counts
pub struct StatisticsSubscriber {
    name: String,
    stats: Mutex<DetectionStatistics>,
}

impl StatisticsSubscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stats: Mutex::new(DetectionStatistics::default()),
        }
    }

    pub fn get_statistics(&self) -> DetectionStatistics {
        self.stats.lock().clone()
    }

    pub fn reset_statistics(&self) {
        *self.stats.lock() = DetectionStatistics::default();
    }
}

impl EventSubscriber for StatisticsSubscriber {
    fn on_event(&self, event: &AnomalyEvent) {
        let mut stats = self.stats.lock();

        match event {
            AnomalyEvent::DetectionCompleted {
                anomalies,
                threat_level,
                ..
            } => {
                stats.total_detections += 1;
                if !anomalies.is_empty() {
                    stats.anomalies_detected += 1;
                }
                for anomaly in anomalies {
                    *stats.by_type.entry(*anomaly).or_insert(0) += 1;
                }
                if threat_level.needs_review() {
                    stats.needs_review += 1;
                }
            }
            AnomalyEvent::ScorerFailed { .. } => {
                stats.scorer_failures += 1;
            }
            AnomalyEvent::UserTrainingFailed { .. } => {
                stats.training_failures += 1;
            }
            _ => {}
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn interested_events(&self) -> Vec<&'static str> {
        vec!["detection_completed", "scorer_failed", "user_training_failed"]
    }
}

/// Detection statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionStatistics {
    pub total_detections: u64,
    pub anomalies_detected: u64,
    pub needs_review: u64,
    pub scorer_failures: u64,
    pub training_failures: u64,
    pub by_type: BTreeMap<AnomalyType, u64>,
}

impl DetectionStatistics {
    pub fn anomaly_rate(&self) -> f64 {
        if self.total_detections == 0 {
            0.0
        } else {
            self.anomalies_detected as f64 / self.total_detections as f64
        }
    }
}
