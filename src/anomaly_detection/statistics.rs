//! Per-user anomaly statistics
//!
//! Replays a user's expenses in date order, judging each one against only the
//! expenses dated strictly before it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::anomaly_detection::detector::AnomalyDetector;
use crate::anomaly_detection::AnomalyType;
use crate::core::expense::Expense;

/// Anomaly summary over one user's expense history
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserAnomalyStatistics {
    pub user_id: String,
    pub total_expenses: usize,
    pub anomalous_expenses: usize,
    /// anomalous / total, 0.0 for an empty history
    pub anomaly_rate: f64,
    pub anomaly_breakdown: BTreeMap<AnomalyType, usize>,
}

impl AnomalyDetector {
    /// Replay `expenses` for `user_id` chronologically and count anomalies.
    ///
    /// Expenses of other users are ignored. Same-day expenses never see each other
    /// as history.
    pub fn get_user_anomaly_statistics(
        &self,
        user_id: &str,
        expenses: &[Expense],
    ) -> UserAnomalyStatistics {
        let mut timeline: Vec<Expense> = expenses
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        timeline.sort_by(|a, b| {
            a.expense_date
                .cmp(&b.expense_date)
                .then(a.created_at.cmp(&b.created_at))
        });

        let mut anomalous_expenses = 0;
        let mut anomaly_breakdown = BTreeMap::new();

        for expense in &timeline {
            let cutoff = timeline.partition_point(|e| e.expense_date < expense.expense_date);
            let context = &timeline[..cutoff];
            if !self.has_sufficient_history(context) {
                continue;
            }

            let anomalies = self.detect_anomalies(expense, context);
            if anomalies.is_empty() {
                continue;
            }
            anomalous_expenses += 1;
            for anomaly in anomalies {
                *anomaly_breakdown.entry(anomaly).or_insert(0) += 1;
            }
        }

        let total_expenses = timeline.len();
        let anomaly_rate = if total_expenses == 0 {
            0.0
        } else {
            anomalous_expenses as f64 / total_expenses as f64
        };

        debug!(
            user_id,
            total_expenses, anomalous_expenses, "📈 Computed user anomaly statistics"
        );

        UserAnomalyStatistics {
            user_id: user_id.to_string(),
            total_expenses,
            anomalous_expenses,
            anomaly_rate,
            anomaly_breakdown,
        }
    }
}
