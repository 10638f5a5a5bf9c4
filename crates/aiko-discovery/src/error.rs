//! Discovery error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the advertiser and the locator
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The multicast responder could not be created or bound
    #[error("mDNS daemon unavailable: {0}")]
    Daemon(String),

    /// The endpoint identity could not be published
    #[error("Advertisement failed for '{instance}': {reason}")]
    Advertise {
        /// Instance label that was being published
        instance: String,
        /// Underlying failure
        reason: String,
    },

    /// A passive listener for announcements could not be opened
    #[error("Failed to open announcement listener: {0}")]
    Listen(String),

    /// No matching peer was announced within the full retry budget
    #[error("Peer '{target}' not found after {attempts} attempts ({per_attempt:?} each)")]
    Timeout {
        /// Target name that was searched for
        target: String,
        /// Number of attempts made
        attempts: u32,
        /// Timeout applied to each attempt
        per_attempt: Duration,
    },

    /// Identity or locator parameters are unusable
    #[error("Invalid discovery configuration: {0}")]
    InvalidConfig(String),
}

impl DiscoveryError {
    /// Returns true if the peer simply has not shown up yet
    ///
    /// A timeout may succeed on a later startup; every other variant needs
    /// a configuration or network change first.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, DiscoveryError::Timeout { .. })
    }
}

impl From<mdns_sd::Error> for DiscoveryError {
    fn from(err: mdns_sd::Error) -> Self {
        DiscoveryError::Daemon(err.to_string())
    }
}
