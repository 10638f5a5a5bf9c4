//! Relay wire contract.
//!
//! ```text
//! POST /handle   {"message": "message #<n>", "reply_to": "ip:port"?}
//!            ->  {"reply": "done" | "forwarded: message #<n+1>" | "peer not available"}
//! ```
//!
//! `reply_to` is the caller's own listening address. A responder that never
//! discovered its peer uses it as the reply channel for the next hop.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Path of the single relay endpoint
pub const HANDLE_PATH: &str = "/handle";

/// Reply body marking the end of the exchange
pub const TERMINAL_REPLY: &str = "done";

/// Reply body when the next hop has nowhere to go
pub const UNAVAILABLE_REPLY: &str = "peer not available";

/// Inbound/outbound relay call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Message text, `message #<n>`
    pub message: String,
    /// Address the sender listens on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<SocketAddr>,
}

impl RelayRequest {
    /// Request without a reply address
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reply_to: None,
        }
    }

    /// Attach the sender's listening address
    #[must_use]
    pub fn with_reply_to(mut self, addr: SocketAddr) -> Self {
        self.reply_to = Some(addr);
        self
    }
}

/// Acknowledgment returned for a relay call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReply {
    /// Outcome text
    pub reply: String,
}

impl RelayReply {
    /// The exchange has reached its bound
    #[must_use]
    pub fn done() -> Self {
        Self {
            reply: TERMINAL_REPLY.to_string(),
        }
    }

    /// The successor has been handed off
    #[must_use]
    pub fn forwarded(next: impl std::fmt::Display) -> Self {
        Self {
            reply: format!("forwarded: {next}"),
        }
    }

    /// No peer is known to forward to
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            reply: UNAVAILABLE_REPLY.to_string(),
        }
    }

    /// Whether this reply carries the terminal marker
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.reply == TERMINAL_REPLY
    }
}

/// Error body for a rejected call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error details
    pub error: ErrorDetail,
}

/// Error details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message
    pub message: String,
}
