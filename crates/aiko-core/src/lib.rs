//! # AIKO Core
//!
//! Relay engine for the bounded ping-pong exchange.
//!
//! Two endpoints pass `message #n` back and forth, each answering a call
//! immediately and forwarding `message #n+1` in the background, until the
//! configured bound is reached. The bound is inclusive: with a bound of 3
//! the messages `#0`, `#1`, `#2` and `#3` cross the wire and the endpoint
//! receiving `#3` replies `done`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use aiko_core::{ExchangeConfig, ExchangeLog, RelayEngine};
//! use aiko_discovery::{EndpointIdentity, Role};
//! use aiko_transport::HttpTransport;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = EndpointIdentity::new("PING", "192.168.1.10:8000".parse()?, Role::Initiator)?;
//! let transport = Arc::new(HttpTransport::new(Duration::from_secs(5))?);
//! let engine = RelayEngine::new(
//!     identity,
//!     ExchangeConfig::with_max_count(3),
//!     transport,
//!     ExchangeLog::disabled("PING"),
//! );
//!
//! engine.set_peer("192.168.1.20:8001".parse()?).await;
//! engine.originate().await?;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod exchange_log;
pub mod message;
pub mod session;
pub mod tasks;

pub use config::ExchangeConfig;
pub use engine::RelayEngine;
pub use error::{RelayError, Result};
pub use exchange_log::{ExchangeEvent, ExchangeLog};
pub use message::ExchangeMessage;
pub use session::{ExchangePhase, ExchangeSession, SessionSnapshot, Step};
pub use tasks::{DrainReport, ForwardTracker};
