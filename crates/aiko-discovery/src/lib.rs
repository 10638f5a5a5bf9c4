//! # AIKO Discovery
//!
//! LAN peer discovery for AIKO agents.
//!
//! This crate provides:
//! - Endpoint identity and role
//! - mDNS advertisement under `_aikoagent._tcp.local.`
//! - Bounded-retry peer location with loose name matching
//! - Static peer lists for networks that filter multicast
//!
//! ## Example
//!
//! ```rust,no_run
//! use aiko_discovery::{Advertiser, EndpointIdentity, Locator, LocatorConfig, MdnsDaemon, Role};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let daemon = MdnsDaemon::new()?;
//! let identity = EndpointIdentity::new("PING", "192.168.1.10:8000".parse()?, Role::Initiator)?;
//!
//! let advertiser = Advertiser::new(daemon.clone(), aiko_discovery::host_label());
//! let registration = advertiser.advertise(&identity)?;
//!
//! let locator = Locator::new(daemon.browser(), LocatorConfig::default())
//!     .excluding(registration.fullname());
//! let peer = locator.locate("PONG").await?;
//! println!("PONG is at {}", peer.addr);
//!
//! registration.withdraw()?;
//! daemon.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod advertiser;
pub mod announcement;
pub mod browse;
pub mod error;
pub mod identity;
pub mod locator;
pub mod mdns;

pub use advertiser::{Advertiser, Registration};
pub use announcement::{
    Announcement, AnnouncementRecord, PROP_ROLE, SERVICE_TYPE, instance_label, matches_target,
};
pub use browse::{AnnouncementListener, Browse, StaticBrowser, StaticPeer};
pub use error::DiscoveryError;
pub use identity::{EndpointIdentity, Role, host_label, local_ipv4};
pub use locator::{DiscoveredPeer, Locator, LocatorConfig};
pub use mdns::{MdnsBrowser, MdnsDaemon};
