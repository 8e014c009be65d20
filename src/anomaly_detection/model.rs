//! Per-user baseline models and their trainer
//!
//! A baseline is a plain statistical summary (counts and means) of a user's
//! spending. Every training call rebuilds it from scratch and swaps it into the
//! store; nothing is merged incrementally.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::anomaly_detection::errors::{AnomalyDetectionError, Result};
use crate::anomaly_detection::features::mean_and_std_dev;
use crate::anomaly_detection::storage::BaselineStore;
use crate::core::expense::Expense;

/// Statistical profile of one user's spending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBaselineModel {
    pub user_id: String,
    pub expense_count: usize,
    pub average_amount: f64,
    pub amount_std_dev: f64,
    /// Category name -> number of expenses
    pub category_frequency: BTreeMap<String, usize>,
    /// Lowercased merchant names
    pub known_merchants: BTreeSet<String>,
    /// Hour of day (0-23) -> number of expenses
    pub hour_frequency: BTreeMap<u32, usize>,
    pub last_updated: DateTime<Utc>,
}

/// Process-wide training counters, replaced wholesale on every batch
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_training_expenses: usize,
    pub user_baselines_count: usize,
    pub last_training_time: Option<DateTime<Utc>>,
    pub average_expenses_per_user: f64,
    pub unique_users: usize,
}

impl PerformanceMetrics {
    /// Flat snapshot for status endpoints and reports
    pub fn to_map(&self) -> BTreeMap<&'static str, serde_json::Value> {
        let mut map = BTreeMap::new();
        map.insert("total_training_expenses", self.total_training_expenses.into());
        map.insert("user_baselines_count", self.user_baselines_count.into());
        map.insert(
            "last_training_time",
            self.last_training_time
                .map(|t| serde_json::Value::String(t.to_rfc3339()))
                .unwrap_or(serde_json::Value::Null),
        );
        map.insert("average_expenses_per_user", self.average_expenses_per_user.into());
        map.insert("unique_users", self.unique_users.into());
        map
    }
}

/// What happened to one user during training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    /// Baseline rebuilt and stored
    Trained { expense_count: usize },
    /// Too little history, existing baseline left untouched
    Skipped { expense_count: usize },
    Failed { error: String },
}

/// Per-user outcomes of a batch training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub outcomes: BTreeMap<String, TrainingOutcome>,
    pub finished_at: DateTime<Utc>,
}

impl TrainingReport {
    pub fn trained_users(&self) -> Vec<&str> {
        self.users_where(|o| matches!(o, TrainingOutcome::Trained { .. }))
    }

    pub fn skipped_users(&self) -> Vec<&str> {
        self.users_where(|o| matches!(o, TrainingOutcome::Skipped { .. }))
    }

    pub fn failed_users(&self) -> Vec<&str> {
        self.users_where(|o| matches!(o, TrainingOutcome::Failed { .. }))
    }

    /// No user failed
    pub fn is_clean(&self) -> bool {
        self.failed_users().is_empty()
    }

    fn users_where(&self, pred: impl Fn(&TrainingOutcome) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(user_id, _)| user_id.as_str())
            .collect()
    }
}

/// Builds baselines into an injected store and keeps the training counters
#[derive(Clone)]
pub struct ModelTrainer {
    store: Arc<dyn BaselineStore>,
    metrics: Arc<RwLock<PerformanceMetrics>>,
    min_historical_data: usize,
}

impl ModelTrainer {
    pub fn new(store: Arc<dyn BaselineStore>, min_historical_data: usize) -> Self {
        Self {
            store,
            metrics: Arc::new(RwLock::new(PerformanceMetrics::default())),
            min_historical_data,
        }
    }

    pub fn store(&self) -> Arc<dyn BaselineStore> {
        self.store.clone()
    }

    pub fn min_historical_data(&self) -> usize {
        self.min_historical_data
    }

    pub fn set_min_historical_data(&mut self, min_historical_data: usize) {
        self.min_historical_data = min_historical_data;
    }

    /// Snapshot of the last batch's counters
    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.metrics.read().clone()
    }

    /// Compute a baseline without storing it.
    pub fn build_baseline(&self, user_id: &str, expenses: &[Expense]) -> Result<UserBaselineModel> {
        let fail = |message: String| AnomalyDetectionError::Training {
            user_id: user_id.to_string(),
            message,
        };

        if user_id.trim().is_empty() {
            return Err(AnomalyDetectionError::InvalidInput(
                "user_id must not be blank".to_string(),
            ));
        }

        let mut amounts = Vec::with_capacity(expenses.len());
        let mut category_frequency = BTreeMap::new();
        let mut known_merchants = BTreeSet::new();
        let mut hour_frequency = BTreeMap::new();

        for expense in expenses {
            if expense.user_id != user_id {
                return Err(fail(format!(
                    "expense {} belongs to user {}",
                    expense.id, expense.user_id
                )));
            }
            if expense.amount.is_sign_negative() && !expense.amount.is_zero() {
                return Err(fail(format!(
                    "expense {} has negative amount {}",
                    expense.id, expense.amount
                )));
            }
            let amount = expense
                .amount_f64()
                .ok_or_else(|| fail(format!("expense {} amount is not representable", expense.id)))?;
            amounts.push(amount);

            if let Some(category) = expense.category_name() {
                *category_frequency.entry(category.to_string()).or_insert(0) += 1;
            }
            if let Some(merchant) = expense.merchant() {
                known_merchants.insert(merchant.to_lowercase());
            }
            *hour_frequency.entry(expense.hour()).or_insert(0) += 1;
        }

        let (average_amount, amount_std_dev) = mean_and_std_dev(&amounts);
        if !average_amount.is_finite() || !amount_std_dev.is_finite() {
            return Err(fail("amount statistics are not finite".to_string()));
        }

        Ok(UserBaselineModel {
            user_id: user_id.to_string(),
            expense_count: expenses.len(),
            average_amount,
            amount_std_dev,
            category_frequency,
            known_merchants,
            hour_frequency,
            last_updated: Utc::now(),
        })
    }

    /// Rebuild one user's baseline, replacing any previous one.
    ///
    /// Users below the history threshold are skipped and keep their old baseline.
    pub fn train_user_model(&self, user_id: &str, expenses: &[Expense]) -> Result<TrainingOutcome> {
        if expenses.len() < self.min_historical_data {
            debug!(
                user_id,
                expense_count = expenses.len(),
                "Not enough history to train baseline"
            );
            return Ok(TrainingOutcome::Skipped {
                expense_count: expenses.len(),
            });
        }

        let model = self.build_baseline(user_id, expenses)?;
        let expense_count = model.expense_count;
        self.store.replace(model)?;

        debug!(user_id, expense_count, "Baseline replaced");
        Ok(TrainingOutcome::Trained { expense_count })
    }

    /// Train every user found in `expenses`; one user's failure never stops the batch.
    pub fn train_model(&self, expenses: &[Expense]) -> TrainingReport {
        let groups = group_by_user(expenses.iter().cloned());
        let unique_users = groups.len();
        info!(
            expense_count = expenses.len(),
            unique_users, "🧠 Training baselines"
        );

        let outcomes = groups
            .into_iter()
            .map(|(user_id, user_expenses)| {
                let outcome = match self.train_user_model(&user_id, &user_expenses) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Baseline training failed");
                        TrainingOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                (user_id, outcome)
            })
            .collect();

        self.finish_batch(expenses.len(), unique_users, outcomes)
    }

    /// Like [`train_model`](Self::train_model) with one blocking task per user.
    ///
    /// A task that panics is reported as that user's failure.
    pub async fn train_model_concurrent(&self, expenses: Vec<Expense>) -> TrainingReport {
        let total = expenses.len();
        let groups = group_by_user(expenses);
        let unique_users = groups.len();
        info!(expense_count = total, unique_users, "🧠 Training baselines concurrently");

        let handles: Vec<_> = groups
            .into_iter()
            .map(|(user_id, user_expenses)| {
                let trainer = self.clone();
                let task_user = user_id.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    trainer.train_user_model(&task_user, &user_expenses)
                });
                (user_id, handle)
            })
            .collect();

        let mut outcomes = BTreeMap::new();
        for (user_id, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!(user_id = %user_id, error = %e, "Baseline training failed");
                    TrainingOutcome::Failed {
                        error: e.to_string(),
                    }
                }
                Err(join_error) => {
                    error!(user_id = %user_id, error = %join_error, "Baseline training task aborted");
                    TrainingOutcome::Failed {
                        error: format!("training task aborted: {}", join_error),
                    }
                }
            };
            outcomes.insert(user_id, outcome);
        }

        self.finish_batch(total, unique_users, outcomes)
    }

    fn finish_batch(
        &self,
        total_expenses: usize,
        unique_users: usize,
        outcomes: BTreeMap<String, TrainingOutcome>,
    ) -> TrainingReport {
        let finished_at = Utc::now();
        let report = TrainingReport {
            outcomes,
            finished_at,
        };

        let user_baselines_count = match self.store.count() {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Could not count stored baselines");
                report.trained_users().len()
            }
        };
        let average_expenses_per_user = if unique_users == 0 {
            0.0
        } else {
            total_expenses as f64 / unique_users as f64
        };

        *self.metrics.write() = PerformanceMetrics {
            total_training_expenses: total_expenses,
            user_baselines_count,
            last_training_time: Some(finished_at),
            average_expenses_per_user,
            unique_users,
        };

        info!(
            trained = report.trained_users().len(),
            skipped = report.skipped_users().len(),
            failed = report.failed_users().len(),
            "✅ Baseline training finished"
        );
        report
    }
}

fn group_by_user(expenses: impl IntoIterator<Item = Expense>) -> BTreeMap<String, Vec<Expense>> {
    let mut groups: BTreeMap<String, Vec<Expense>> = BTreeMap::new();
    for expense in expenses {
        groups.entry(expense.user_id.clone()).or_default().push(expense);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly_detection::storage::MemoryBaselineStore;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn expenses(user_id: &str, count: usize) -> Vec<Expense> {
        (0..count)
            .map(|i| {
                let date = NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap();
                Expense::new(
                    user_id,
                    Decimal::from(10 + i as i64),
                    date,
                    date.and_hms_opt(8 + (i % 3) as u32, 15, 0).unwrap(),
                )
                .with_category(if i % 2 == 0 { "Meals" } else { "Taxi" })
                .with_merchant(if i % 2 == 0 { "Cafe Uno" } else { "City CAB" })
            })
            .collect()
    }

    fn trainer() -> ModelTrainer {
        ModelTrainer::new(Arc::new(MemoryBaselineStore::new()), 10)
    }

    #[test]
    fn test_build_baseline_statistics() {
        let trainer = trainer();
        let model = trainer.build_baseline("alice", &expenses("alice", 10)).unwrap();

        assert_eq!(model.expense_count, 10);
        assert!((model.average_amount - 14.5).abs() < 1e-12);
        assert!((model.amount_std_dev - (82.5_f64 / 9.0).sqrt()).abs() < 1e-12);
        assert_eq!(model.category_frequency.get("Meals"), Some(&5));
        assert!(model.known_merchants.contains("city cab"));
        assert_eq!(model.hour_frequency.values().sum::<usize>(), 10);
        assert_eq!(model.hour_frequency.get(&8), Some(&4));
    }

    #[test]
    fn test_threshold_boundary() {
        let trainer = trainer();

        let outcome = trainer.train_user_model("alice", &expenses("alice", 9)).unwrap();
        assert_eq!(outcome, TrainingOutcome::Skipped { expense_count: 9 });
        assert!(trainer.store().get("alice").unwrap().is_none());

        let outcome = trainer.train_user_model("alice", &expenses("alice", 10)).unwrap();
        assert_eq!(outcome, TrainingOutcome::Trained { expense_count: 10 });
        assert_eq!(trainer.store().get("alice").unwrap().unwrap().expense_count, 10);
    }

    #[test]
    fn test_rejects_foreign_and_negative_expenses() {
        let trainer = trainer();

        let mut mixed = expenses("alice", 10);
        mixed[3].user_id = "mallory".to_string();
        assert!(trainer.train_user_model("alice", &mixed).is_err());

        let mut negative = expenses("alice", 10);
        negative[0].amount = Decimal::from(-5);
        let err = trainer.train_user_model("alice", &negative).unwrap_err();
        assert!(err.to_string().contains("negative amount"));

        let err = trainer.build_baseline(" ", &[]).unwrap_err();
        assert!(matches!(err, AnomalyDetectionError::InvalidInput(_)));
    }

    #[test]
    fn test_train_model_updates_metrics() {
        let trainer = trainer();
        let mut all = expenses("alice", 12);
        all.extend(expenses("bob", 4));

        let report = trainer.train_model(&all);
        assert_eq!(report.trained_users(), vec!["alice"]);
        assert_eq!(report.skipped_users(), vec!["bob"]);
        assert!(report.is_clean());

        let metrics = trainer.performance_metrics();
        assert_eq!(metrics.total_training_expenses, 16);
        assert_eq!(metrics.unique_users, 2);
        assert_eq!(metrics.user_baselines_count, 1);
        assert!((metrics.average_expenses_per_user - 8.0).abs() < 1e-12);
        assert!(metrics.last_training_time.is_some());
    }

    #[test]
    fn test_metrics_map_keys() {
        let map = PerformanceMetrics::default().to_map();
        assert_eq!(map.len(), 5);
        assert_eq!(map["last_training_time"], serde_json::Value::Null);
        assert_eq!(map["unique_users"], serde_json::json!(0));
    }
}
