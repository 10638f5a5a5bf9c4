//! Exchange parameters.

use std::time::Duration;

/// Parameters of the numbered exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Last counter of the exchange (inclusive)
    pub max_count: u64,
    /// Pause between discovering the peer and sending message #0
    pub settle_delay: Duration,
    /// How long shutdown waits for in-flight forwards
    pub shutdown_grace: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_count: 1000,
            settle_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl ExchangeConfig {
    /// Config with the given bound and default timings
    #[must_use]
    pub fn with_max_count(max_count: u64) -> Self {
        Self {
            max_count,
            ..Self::default()
        }
    }
}
