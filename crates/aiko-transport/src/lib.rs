//! # AIKO Transport
//!
//! Request/response relay transport for AIKO agents.
//!
//! The relay engine talks to its peer through the [`Transport`] trait and is
//! called through the [`InboundHandler`] trait. This crate provides the HTTP
//! implementation of both sides:
//! - [`HttpTransport`]: JSON `POST /handle` client
//! - [`RelayServer`]: axum server dispatching `POST /handle` to a handler

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod http;
pub mod protocol;
pub mod server;
pub mod transport;

pub use http::HttpTransport;
pub use protocol::{
    ErrorBody, ErrorDetail, HANDLE_PATH, RelayReply, RelayRequest, TERMINAL_REPLY,
    UNAVAILABLE_REPLY,
};
pub use server::{RelayServer, SharedHandler, reply_address, router};
pub use transport::{
    InboundHandler, Rejection, Transport, TransportError, TransportResult, TransportStats,
};
