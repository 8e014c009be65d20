//! Baseline storage abstraction
//!
//! Baselines are immutable once built. A store only ever swaps the whole
//! `Arc<UserBaselineModel>` for a user, so a reader holding the old `Arc` keeps a
//! consistent profile while a retrain publishes the new one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::anomaly_detection::errors::{AnomalyDetectionError, Result};
use crate::anomaly_detection::model::UserBaselineModel;

/// Storage backend trait for per-user baselines
pub trait BaselineStore: Send + Sync {
    /// Current baseline for a user
    fn get(&self, user_id: &str) -> Result<Option<Arc<UserBaselineModel>>>;

    /// Replace the user's baseline wholesale, returning the previous one
    fn replace(&self, model: UserBaselineModel) -> Result<Option<Arc<UserBaselineModel>>>;

    /// Users that currently have a baseline
    fn user_ids(&self) -> Result<Vec<String>>;

    fn count(&self) -> Result<usize>;

    /// Drop every baseline
    fn clear(&self) -> Result<()>;
}

/// In-memory baseline store
#[derive(Default)]
pub struct MemoryBaselineStore {
    baselines: RwLock<HashMap<String, Arc<UserBaselineModel>>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn get(&self, user_id: &str) -> Result<Option<Arc<UserBaselineModel>>> {
        let baselines = self
            .baselines
            .read()
            .map_err(|_| AnomalyDetectionError::LockPoisoned)?;
        Ok(baselines.get(user_id).cloned())
    }

    fn replace(&self, model: UserBaselineModel) -> Result<Option<Arc<UserBaselineModel>>> {
        let model = Arc::new(model);
        let mut baselines = self
            .baselines
            .write()
            .map_err(|_| AnomalyDetectionError::LockPoisoned)?;
        Ok(baselines.insert(model.user_id.clone(), model))
    }

    fn user_ids(&self) -> Result<Vec<String>> {
        let baselines = self
            .baselines
            .read()
            .map_err(|_| AnomalyDetectionError::LockPoisoned)?;
        let mut ids: Vec<String> = baselines.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn count(&self) -> Result<usize> {
        let baselines = self
            .baselines
            .read()
            .map_err(|_| AnomalyDetectionError::LockPoisoned)?;
        Ok(baselines.len())
    }

    fn clear(&self) -> Result<()> {
        let mut baselines = self
            .baselines
            .write()
            .map_err(|_| AnomalyDetectionError::LockPoisoned)?;
        baselines.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn baseline(user_id: &str, expense_count: usize) -> UserBaselineModel {
        UserBaselineModel {
            user_id: user_id.to_string(),
            expense_count,
            average_amount: 20.0,
            amount_std_dev: 5.0,
            category_frequency: BTreeMap::new(),
            known_merchants: BTreeSet::new(),
            hour_frequency: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_memory_store_replace() {
        let store = MemoryBaselineStore::new();

        assert!(store.replace(baseline("alice", 10)).unwrap().is_none());
        let held = store.get("alice").unwrap().unwrap();

        let previous = store.replace(baseline("alice", 12)).unwrap().unwrap();
        assert_eq!(previous.expense_count, 10);

        // readers keep the snapshot they already hold
        assert_eq!(held.expense_count, 10);
        assert_eq!(store.get("alice").unwrap().unwrap().expense_count, 12);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_user_ids_and_clear() {
        let store = MemoryBaselineStore::new();
        store.replace(baseline("bob", 10)).unwrap();
        store.replace(baseline("alice", 10)).unwrap();

        assert_eq!(store.user_ids().unwrap(), vec!["alice", "bob"]);

        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.get("alice").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_replace_is_whole_value() {
        let store = Arc::new(MemoryBaselineStore::new());

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut model = baseline("carol", 10 + i);
                    model.average_amount = (10 + i) as f64;
                    store.replace(model).unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let current = store.get("carol").unwrap().unwrap();
        assert_eq!(current.average_amount, current.expense_count as f64);
    }
}
