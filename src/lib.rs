#![allow(clippy::len_zero)]
#![allow(clippy::needless_range_loop)]
// src/lib.rs

//! Expense anomaly detection engine.
//!
//! Scores a newly submitted expense against the submitting user's history and
//! maintains per-user spending baselines.

pub mod core;

// Anomaly detection module
pub mod anomaly_detection;

// Monitoring module
pub mod monitoring;

pub mod logging;

pub use crate::anomaly_detection::{
    AnomalyDetectionConfig, AnomalyDetectionError, AnomalyDetector, AnomalyResult, AnomalyType,
    UserAnomalyStatistics,
};
pub use crate::core::Expense;
