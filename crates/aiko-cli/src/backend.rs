//! Discovery backend selection.

use aiko_discovery::{
    AnnouncementListener, Browse, DiscoveryError, MdnsBrowser, MdnsDaemon, StaticBrowser,
    StaticPeer,
};

/// Where announcements come from
#[derive(Debug)]
pub enum DiscoveryBackend {
    /// Live multicast announcements
    Mdns(MdnsBrowser),
    /// Configured `NAME=ip:port` peers
    Static(StaticBrowser),
}

impl DiscoveryBackend {
    /// Static peers win over multicast; without either there is no backend
    pub fn select(static_peers: Vec<StaticPeer>, daemon: Option<&MdnsDaemon>) -> Option<Self> {
        if !static_peers.is_empty() {
            return Some(Self::Static(StaticBrowser::new(static_peers)));
        }
        daemon.map(|d| Self::Mdns(d.browser()))
    }

    /// Short label for log lines
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mdns(_) => "mdns",
            Self::Static(_) => "static",
        }
    }
}

impl Browse for DiscoveryBackend {
    fn open(&self) -> Result<AnnouncementListener, DiscoveryError> {
        match self {
            Self::Mdns(browser) => browser.open(),
            Self::Static(browser) => browser.open(),
        }
    }
}
