//! Tracing subscriber bootstrap for hosts embedding the engine

use anyhow::Result;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_directive` (e.g. `"info,expense_anomaly=debug"`).
/// Fails if a global subscriber is already installed.
pub fn init_logging(default_directive: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directive))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice_fails() {
        // the first call may lose to another test's subscriber; the second never wins
        let _ = init_logging("info");
        assert!(init_logging("info").is_err());
    }
}
