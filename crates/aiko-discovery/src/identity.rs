//! Endpoint identity
//!
//! The identity is built once at startup from configuration and never mutated
//! afterwards. It is what the advertiser publishes and what the relay engine
//! hands to its peer as the reply address.

use crate::error::DiscoveryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;

/// Which side of the exchange an endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Locates its peer and originates message #0
    Initiator,
    /// Waits to be called and answers each message with its successor
    Responder,
}

impl Role {
    /// Label published in the `role` TXT property
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }

    /// Whether startup must abort when the identity cannot be published
    ///
    /// The responder is only reachable through its advertisement. An
    /// initiator that stays invisible can still discover and call others.
    #[must_use]
    pub const fn must_be_discoverable(self) -> bool {
        matches!(self, Role::Responder)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initiator" | "ping" => Ok(Role::Initiator),
            "responder" | "pong" => Ok(Role::Responder),
            other => Err(DiscoveryError::InvalidConfig(format!(
                "unknown role '{other}' (expected 'initiator' or 'responder')"
            ))),
        }
    }
}

/// Name, reachable address and role of this endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointIdentity {
    name: String,
    addr: SocketAddr,
    role: Role,
}

impl EndpointIdentity {
    /// Create a new identity
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::InvalidConfig` if the name is empty or
    /// contains a `.`, which would split the mDNS instance label.
    pub fn new(name: impl Into<String>, addr: SocketAddr, role: Role) -> Result<Self, DiscoveryError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "endpoint name must not be empty".to_string(),
            ));
        }
        if name.contains('.') {
            return Err(DiscoveryError::InvalidConfig(format!(
                "endpoint name '{name}' must not contain '.'"
            )));
        }
        Ok(Self { name, addr, role })
    }

    /// Endpoint name, e.g. `PING`
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address peers should call
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Role in the exchange
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }
}

impl fmt::Display for EndpointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.name, self.role, self.addr)
    }
}

/// Short host name used as the instance-name suffix
///
/// Only the first DNS label is kept and anything that is not alphanumeric
/// or `-` is dropped, so the result is always a valid label fragment.
#[must_use]
pub fn host_label() -> Option<String> {
    let host = hostname::get().ok()?.into_string().ok()?;
    let first = host.split('.').next().unwrap_or_default();
    let label: String = first
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if label.is_empty() { None } else { Some(label) }
}

/// Best-effort routable IPv4 address of this host
///
/// Resolves the host name the same way peers on the LAN would. Many hosts
/// map their own name to `127.0.0.1` or `127.0.1.1`, so a loopback answer is
/// replaced by the source address of the default route. Loopback is only
/// returned when neither yields a routable address.
#[must_use]
pub fn local_ipv4() -> IpAddr {
    let resolved = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .and_then(|host| (host.as_str(), 0u16).to_socket_addrs().ok())
        .and_then(|mut addrs| addrs.find(SocketAddr::is_ipv4))
        .map(|addr| addr.ip());

    let ip = pick_routable(resolved, route_source_ipv4);
    if ip.is_loopback() {
        tracing::warn!("No routable IPv4 address found, advertising loopback");
    }
    ip
}

/// First routable candidate: the resolved address, then the route source
fn pick_routable(resolved: Option<IpAddr>, route: impl FnOnce() -> Option<IpAddr>) -> IpAddr {
    let routable = |ip: &IpAddr| !ip.is_loopback() && !ip.is_unspecified();
    match resolved.filter(routable) {
        Some(ip) => ip,
        None => route()
            .filter(routable)
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    }
}

/// Local address the kernel would use to reach a non-local IPv4 destination
///
/// Connecting a UDP socket only selects a route; no packet is sent.
fn route_source_ipv4() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(ROUTE_LOOKUP_ADDR).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// TEST-NET-1 destination used only for route selection
const ROUTE_LOOKUP_ADDR: (Ipv4Addr, u16) = (Ipv4Addr::new(192, 0, 2, 1), 9);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("initiator".parse::<Role>().unwrap(), Role::Initiator);
        assert_eq!(" Responder ".parse::<Role>().unwrap(), Role::Responder);
        assert_eq!("PONG".parse::<Role>().unwrap(), Role::Responder);
        assert!("observer".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_discoverability() {
        assert!(Role::Responder.must_be_discoverable());
        assert!(!Role::Initiator.must_be_discoverable());
    }

    #[test]
    fn test_identity_validation() {
        let addr = "127.0.0.1:8000".parse().unwrap();

        let identity = EndpointIdentity::new("  PING ", addr, Role::Initiator).unwrap();
        assert_eq!(identity.name(), "PING");
        assert_eq!(identity.addr(), addr);
        assert_eq!(identity.role(), Role::Initiator);

        assert!(EndpointIdentity::new("", addr, Role::Initiator).is_err());
        assert!(EndpointIdentity::new("PING.local", addr, Role::Initiator).is_err());
    }

    #[test]
    fn test_identity_display() {
        let addr = "10.0.0.2:8001".parse().unwrap();
        let identity = EndpointIdentity::new("PONG", addr, Role::Responder).unwrap();
        assert_eq!(identity.to_string(), "PONG (responder) at 10.0.0.2:8001");
    }

    #[test]
    fn test_host_label_is_single_label() {
        if let Some(label) = host_label() {
            assert!(!label.contains('.'));
            assert!(label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
        }
    }

    #[test]
    fn test_loopback_resolution_falls_back_to_route() {
        let lan: IpAddr = "192.168.1.20".parse().unwrap();

        // Debian-style /etc/hosts entries
        for looped in ["127.0.0.1", "127.0.1.1"] {
            let resolved = Some(looped.parse().unwrap());
            assert_eq!(pick_routable(resolved, || Some(lan)), lan);
        }
        assert_eq!(pick_routable(None, || Some(lan)), lan);

        let resolved: IpAddr = "10.0.0.7".parse().unwrap();
        assert_eq!(pick_routable(Some(resolved), || Some(lan)), resolved);
    }

    #[test]
    fn test_loopback_only_without_routable_candidate() {
        let looped: IpAddr = "127.0.1.1".parse().unwrap();
        assert!(pick_routable(Some(looped), || None).is_loopback());
        assert!(pick_routable(None, || Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED))).is_loopback());
    }

    #[test]
    fn test_local_ipv4_prefers_routable() {
        // Whenever this host has a default route, the result must not be loopback
        if let Some(route) = route_source_ipv4().filter(|ip| !ip.is_loopback()) {
            let ip = local_ipv4();
            assert!(!ip.is_loopback(), "picked {ip} although {route} is routable");
        }
    }
}
