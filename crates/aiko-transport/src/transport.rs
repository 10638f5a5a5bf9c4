//! Transport trait abstraction.
//!
//! The relay engine only sees two seams:
//! - [`Transport`]: send one relay call to a peer and get its acknowledgment
//! - [`InboundHandler`]: turn one arriving call into an acknowledgment
//!
//! The HTTP mechanics live behind these traits, so the engine can be driven
//! by the HTTP implementation in production and by in-process doubles in
//! tests.

use crate::protocol::{RelayReply, RelayRequest};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// The peer could not be reached or did not answer in time
    #[error("Peer {peer} unreachable: {reason}")]
    Unreachable {
        /// Peer that was called
        peer: SocketAddr,
        /// Underlying failure
        reason: String,
    },

    /// The peer refused the call as malformed
    #[error("Peer {peer} rejected the call: {reason}")]
    Rejected {
        /// Peer that was called
        peer: SocketAddr,
        /// Rejection message from the peer
        reason: String,
    },

    /// The peer answered with an unexpected status
    #[error("Peer {peer} answered with status {status}")]
    Status {
        /// Peer that was called
        peer: SocketAddr,
        /// HTTP status code
        status: u16,
    },

    /// The reply body could not be decoded
    #[error("Invalid reply from {peer}: {reason}")]
    InvalidReply {
        /// Peer that was called
        peer: SocketAddr,
        /// Decode failure
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// Returns true if the same call could succeed later
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable { .. } | TransportError::Status { .. }
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Outbound relay calls
///
/// # Examples
///
/// ```no_run
/// use aiko_transport::{HttpTransport, RelayRequest, Transport};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = HttpTransport::new(Duration::from_secs(5))?;
/// let reply = transport
///     .send("192.168.1.20:8001".parse()?, &RelayRequest::new("message #0"))
///     .await?;
/// println!("peer replied: {}", reply.reply);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one relay call to `peer` and wait for its acknowledgment
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the peer is unreachable, rejects the
    /// call, or answers with something that is not a relay reply.
    async fn send(&self, peer: SocketAddr, request: &RelayRequest) -> TransportResult<RelayReply>;

    /// Transport statistics
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Per-request rejection produced by an inbound handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Rejection {
    /// Machine-readable kind, e.g. `malformed_message`
    pub kind: &'static str,
    /// Human-readable explanation
    pub message: String,
}

impl Rejection {
    /// Create a rejection
    #[must_use]
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Inbound relay calls
///
/// The server invokes the handler once per arriving call. Implementations
/// must return without waiting for any follow-up send they start.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    /// Produce the acknowledgment for one call
    ///
    /// # Errors
    ///
    /// Returns a `Rejection` when the call is malformed; the caller sees a
    /// 400 response and no handler state changes.
    async fn on_receive(&self, request: RelayRequest) -> Result<RelayReply, Rejection>;
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Calls sent
    pub requests_sent: u64,
    /// Acknowledgments received
    pub replies_received: u64,
    /// Calls that failed
    pub send_errors: u64,
}
