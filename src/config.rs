//! Engine configuration

use crate::{ProcessError, Result};
use std::time::Duration;

/// Parameters for one package-processing run
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Number of neighbors to keep per query point
    pub max_k: usize,

    /// Use one worker per available core instead of a single worker
    pub multithreading: bool,

    /// Safety-net timeout for the shutdown phase; the process is force-
    /// exited if shutdown has not completed when it elapses. `None`
    /// disables the watchdog. Healthy runs disarm it before it fires.
    pub shutdown_watchdog: Option<Duration>,
}

impl ProcessorConfig {
    pub fn new(max_k: usize) -> Self {
        Self {
            max_k,
            multithreading: false,
            shutdown_watchdog: Some(Duration::from_secs(10)),
        }
    }

    /// Enable one worker per available core
    pub fn multithreaded(mut self) -> Self {
        self.multithreading = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_k < 1 {
            return Err(ProcessError::InvalidParameter(format!(
                "max_k must be at least 1, got {}",
                self.max_k
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_k() {
        assert!(ProcessorConfig::new(0).validate().is_err());
        assert!(ProcessorConfig::new(1).validate().is_ok());
    }

    #[test]
    fn test_multithreaded_preset() {
        let config = ProcessorConfig::new(5).multithreaded();
        assert!(config.multithreading);
        assert_eq!(config.max_k, 5);
    }
}
