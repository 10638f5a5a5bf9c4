//! Error types for the relay engine.

use aiko_discovery::DiscoveryError;
use aiko_transport::Rejection;
use std::net::SocketAddr;
use thiserror::Error;

/// Relay engine errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// No matching peer was found within the full discovery budget
    #[error("peer '{target}' not discovered after {attempts} attempts")]
    DiscoveryTimeout {
        /// Name that was searched for
        target: String,
        /// Attempts made
        attempts: u32,
    },

    /// Discovery failed for a reason other than a timeout
    #[error("discovery error: {0}")]
    Discovery(DiscoveryError),

    /// Inbound message text does not carry a valid counter
    #[error("malformed message '{message}': {reason}")]
    MalformedMessage {
        /// Text as received
        message: String,
        /// What is wrong with it
        reason: String,
    },

    /// A forwarded hop could not reach the peer
    #[error("send to {peer} failed: {reason}")]
    SendFailure {
        /// Peer that was called
        peer: SocketAddr,
        /// Underlying transport failure
        reason: String,
    },

    /// The endpoint identity could not be published
    #[error("advertisement failed: {0}")]
    AdvertisementFailure(String),

    /// No peer address is known yet
    #[error("no peer address known")]
    NoPeer,

    /// The engine has been shut down and accepts no new hops
    #[error("relay engine is shutting down")]
    ShuttingDown,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayError {
    /// Returns true if this error must abort startup
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::AdvertisementFailure(_) | RelayError::InvalidConfig(_)
        )
    }

    /// Machine-readable kind used in rejection bodies
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::DiscoveryTimeout { .. } => "discovery_timeout",
            RelayError::Discovery(_) => "discovery",
            RelayError::MalformedMessage { .. } => "malformed_message",
            RelayError::SendFailure { .. } => "send_failure",
            RelayError::AdvertisementFailure(_) => "advertisement_failure",
            RelayError::NoPeer => "no_peer",
            RelayError::ShuttingDown => "shutting_down",
            RelayError::InvalidConfig(_) => "invalid_config",
        }
    }
}

impl From<DiscoveryError> for RelayError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::Timeout {
                target, attempts, ..
            } => RelayError::DiscoveryTimeout { target, attempts },
            DiscoveryError::Advertise { instance, reason } => {
                RelayError::AdvertisementFailure(format!("{instance}: {reason}"))
            }
            DiscoveryError::InvalidConfig(msg) => RelayError::InvalidConfig(msg),
            other => RelayError::Discovery(other),
        }
    }
}

impl From<RelayError> for Rejection {
    fn from(err: RelayError) -> Self {
        let kind = err.kind();
        let message = match err {
            RelayError::MalformedMessage { reason, .. } => reason,
            other => other.to_string(),
        };
        Rejection::new(kind, message)
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
