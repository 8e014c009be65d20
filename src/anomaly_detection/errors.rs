//! Anomaly detection error types
//!
//! Detection paths never surface these to the caller; they are downgraded at the
//! scorer boundary. Training and configuration paths return them directly.

use thiserror::Error;

/// Anomaly detection error type
#[derive(Debug, Error)]
pub enum AnomalyDetectionError {
    /// A single scorer could not compute its feature
    #[error("Scorer {scorer} failed: {message}")]
    ScorerComputation {
        scorer: &'static str,
        message: String,
    },

    /// Malformed expense data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Baseline training failed for one user
    #[error("Training failed for user {user_id}: {message}")]
    Training { user_id: String, message: String },

    /// Lock poisoned by a panicking writer
    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anomaly detection result type
pub type Result<T> = std::result::Result<T, AnomalyDetectionError>;

impl AnomalyDetectionError {
    pub(crate) fn scorer(scorer: &'static str, message: impl Into<String>) -> Self {
        Self::ScorerComputation {
            scorer,
            message: message.into(),
        }
    }

    /// Whether retrying with corrected input can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ScorerComputation { .. } | Self::InvalidInput(_) | Self::Training { .. }
        )
    }

    /// Whether the error points at broken shared state
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::LockPoisoned | Self::Io(_))
    }

    /// Extra context for log lines
    pub fn context(&self) -> String {
        match self {
            Self::ScorerComputation { scorer, .. } => format!("Scorer: {}", scorer),
            Self::Training { user_id, .. } => format!("User: {}", user_id),
            _ => "No additional context".to_string(),
        }
    }
}

impl From<serde_json::Error> for AnomalyDetectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for AnomalyDetectionError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for AnomalyDetectionError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
