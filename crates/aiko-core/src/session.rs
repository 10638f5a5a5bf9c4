//! Exchange session state.
//!
//! One session per endpoint, owned by the relay engine and shared with every
//! inbound call. The peer address is resolved at most once; progress is
//! behind a lock so concurrent inbound calls never race on it.
//!
//! ```text
//! AwaitingPeer (initiator) ──peer──> Idle ──hop──> Exchanging ──bound──> Done
//! ```
//!
//! `Done` is sticky. The session does not deduplicate: a re-delivered
//! counter below the bound is forwarded again.

use crate::message::ExchangeMessage;
use aiko_discovery::Role;
use std::fmt;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::sync::RwLock;

/// Exchange phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    /// Initiator waiting for discovery to produce a peer
    AwaitingPeer,
    /// Ready, no hop seen yet
    Idle,
    /// Hops are flowing
    Exchanging,
    /// The bound has been observed or produced
    Done,
}

impl fmt::Display for ExchangePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExchangePhase::AwaitingPeer => "awaiting-peer",
            ExchangePhase::Idle => "idle",
            ExchangePhase::Exchanging => "exchanging",
            ExchangePhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// What to do with an inbound hop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Send this successor to the peer
    Forward(ExchangeMessage),
    /// The bound is reached, answer with the terminal marker
    Terminate,
}

#[derive(Debug)]
struct Progress {
    phase: ExchangePhase,
    highest: Option<u64>,
    received: u64,
    forwarded: u64,
    failed: u64,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current phase
    pub phase: ExchangePhase,
    /// Resolved peer, if any
    pub peer: Option<SocketAddr>,
    /// Configured bound
    pub max_count: u64,
    /// Highest counter received or produced
    pub highest: Option<u64>,
    /// Inbound hops accepted
    pub received: u64,
    /// Outbound hops handed to the transport
    pub forwarded: u64,
    /// Outbound hops that failed to reach the peer
    pub failed: u64,
}

/// Per-endpoint exchange state
#[derive(Debug)]
pub struct ExchangeSession {
    max_count: u64,
    peer: OnceLock<SocketAddr>,
    progress: RwLock<Progress>,
}

impl ExchangeSession {
    /// Create a session starting in the phase appropriate for `role`
    #[must_use]
    pub fn new(role: Role, max_count: u64) -> Self {
        let phase = match role {
            Role::Initiator => ExchangePhase::AwaitingPeer,
            Role::Responder => ExchangePhase::Idle,
        };
        Self {
            max_count,
            peer: OnceLock::new(),
            progress: RwLock::new(Progress {
                phase,
                highest: None,
                received: 0,
                forwarded: 0,
                failed: 0,
            }),
        }
    }

    /// Resolved peer address
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.get().copied()
    }

    /// Record the peer address
    ///
    /// Returns `true` if this call resolved the peer. A second, different
    /// address is ignored.
    pub async fn resolve_peer(&self, addr: SocketAddr) -> bool {
        if self.peer.set(addr).is_err() {
            if self.peer() != Some(addr) {
                tracing::debug!(
                    "Peer already resolved to {:?}, ignoring {}",
                    self.peer(),
                    addr
                );
            }
            return false;
        }

        let mut progress = self.progress.write().await;
        if progress.phase == ExchangePhase::AwaitingPeer {
            progress.phase = ExchangePhase::Idle;
        }
        true
    }

    /// Account for an accepted inbound hop and decide the next step
    ///
    /// The decision depends on the counter alone: below the bound the
    /// successor is forwarded, at or above it the exchange terminates.
    pub async fn record_inbound(&self, msg: ExchangeMessage) -> Step {
        let mut progress = self.progress.write().await;
        progress.received += 1;
        progress.highest = progress.highest.max(Some(msg.counter()));

        match msg.successor() {
            Some(next) if msg.counter() < self.max_count => {
                if progress.phase != ExchangePhase::Done {
                    progress.phase = ExchangePhase::Exchanging;
                }
                Step::Forward(next)
            }
            _ => {
                progress.phase = ExchangePhase::Done;
                Step::Terminate
            }
        }
    }

    /// Account for a hop this endpoint is about to send
    pub async fn record_outbound(&self, msg: ExchangeMessage) {
        let mut progress = self.progress.write().await;
        progress.forwarded += 1;
        progress.highest = progress.highest.max(Some(msg.counter()));
        if msg.counter() >= self.max_count {
            progress.phase = ExchangePhase::Done;
        } else if progress.phase != ExchangePhase::Done {
            progress.phase = ExchangePhase::Exchanging;
        }
    }

    /// Account for a hop that did not reach the peer
    pub async fn record_failure(&self) {
        self.progress.write().await.failed += 1;
    }

    #[cfg(test)]
    async fn phase(&self) -> ExchangePhase {
        self.progress.read().await.phase
    }

    /// Snapshot of the session
    pub async fn snapshot(&self) -> SessionSnapshot {
        let progress = self.progress.read().await;
        SessionSnapshot {
            phase: progress.phase,
            peer: self.peer(),
            max_count: self.max_count,
            highest: progress.highest,
            received: progress.received,
            forwarded: progress.forwarded,
            failed: progress.failed,
        }
    }
}
