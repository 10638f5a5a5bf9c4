//! Announcement sources.
//!
//! The locator does not care where announcements come from. A [`Browse`]
//! backend opens an [`AnnouncementListener`], a scoped handle that delivers
//! announcements until it is dropped. Dropping the listener releases the
//! underlying browse so no listener outlives its discovery attempt.

use crate::announcement::{Announcement, SERVICE_TYPE};
use crate::error::DiscoveryError;
use crate::identity::Role;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tokio::sync::mpsc;

/// A source of service announcements
pub trait Browse: Send + Sync {
    /// Open a fresh passive listener on the shared service type
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Listen` if the backend cannot listen.
    fn open(&self) -> Result<AnnouncementListener, DiscoveryError>;
}

impl<B: Browse + ?Sized> Browse for &B {
    fn open(&self) -> Result<AnnouncementListener, DiscoveryError> {
        (**self).open()
    }
}

impl<B: Browse + ?Sized> Browse for std::sync::Arc<B> {
    fn open(&self) -> Result<AnnouncementListener, DiscoveryError> {
        (**self).open()
    }
}

/// Scoped handle delivering announcements
pub struct AnnouncementListener {
    rx: mpsc::UnboundedReceiver<Announcement>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl AnnouncementListener {
    /// Wrap a channel of announcements
    #[must_use]
    pub fn new(rx: mpsc::UnboundedReceiver<Announcement>) -> Self {
        Self { rx, on_close: None }
    }

    /// Run `close` when the listener is dropped
    #[must_use]
    pub fn with_close(mut self, close: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(close));
        self
    }

    /// Wait for the next announcement
    ///
    /// Returns `None` once the source is exhausted.
    pub async fn next(&mut self) -> Option<Announcement> {
        self.rx.recv().await
    }
}

impl Drop for AnnouncementListener {
    fn drop(&mut self) {
        if let Some(close) = self.on_close.take() {
            close();
        }
    }
}

impl std::fmt::Debug for AnnouncementListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnouncementListener")
            .field("scoped", &self.on_close.is_some())
            .finish()
    }
}

/// A peer configured by hand, `NAME=ip:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticPeer {
    /// Instance label the peer is known under
    pub name: String,
    /// Address to call
    pub addr: SocketAddr,
}

impl FromStr for StaticPeer {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, addr) = s.split_once('=').ok_or_else(|| {
            DiscoveryError::InvalidConfig(format!(
                "static peer '{s}' missing '=' (expected NAME=ip:port)"
            ))
        })?;
        let name = name.trim();
        if name.is_empty() || name.contains('.') {
            return Err(DiscoveryError::InvalidConfig(format!(
                "static peer '{s}' has an invalid name"
            )));
        }
        let addr: SocketAddr = addr.trim().parse().map_err(|_| {
            DiscoveryError::InvalidConfig(format!("static peer '{s}' has an invalid address"))
        })?;
        Ok(Self {
            name: name.to_string(),
            addr,
        })
    }
}

/// Browse backend that replays a fixed peer list
///
/// Used on networks where multicast is filtered. Every listener receives all
/// configured peers immediately, then stays open until its attempt times out.
#[derive(Debug, Clone, Default)]
pub struct StaticBrowser {
    peers: Vec<StaticPeer>,
}

impl StaticBrowser {
    /// Create a backend from configured peers
    #[must_use]
    pub fn new(peers: Vec<StaticPeer>) -> Self {
        Self { peers }
    }
}

impl Browse for StaticBrowser {
    fn open(&self) -> Result<AnnouncementListener, DiscoveryError> {
        let (tx, rx) = mpsc::unbounded_channel();
        for peer in &self.peers {
            let addresses = match peer.addr.ip() {
                IpAddr::V4(ip) => vec![ip],
                IpAddr::V6(_) => continue,
            };
            let announcement = Announcement {
                fullname: format!("{}.{}", peer.name, SERVICE_TYPE),
                addresses,
                port: peer.addr.port(),
                role: None::<Role>,
            };
            // Receiver is alive, send cannot fail
            let _ = tx.send(announcement);
        }
        // Keep the channel open so an unmatched attempt runs to its timeout
        Ok(AnnouncementListener::new(rx).with_close(move || drop(tx)))
    }
}
