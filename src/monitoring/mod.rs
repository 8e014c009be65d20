pub mod metrics;

pub use metrics::DetectionMetrics;
