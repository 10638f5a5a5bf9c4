//! Announcement records and instance-name matching.
//!
//! Wire format:
//!
//! ```text
//! service type   _aikoagent._tcp.local.
//! instance name  <NAME>[_<host>]._aikoagent._tcp.local.
//! server         <host>.local.
//! TXT            role=<initiator|responder>
//! ```

use crate::identity::{EndpointIdentity, Role};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Application service tag shared by every agent
pub const SERVICE_TYPE: &str = "_aikoagent._tcp.local.";

/// TXT property carrying the endpoint role
pub const PROP_ROLE: &str = "role";

/// Record published by the advertiser for this endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementRecord {
    /// Service type the record lives under
    pub service_type: &'static str,
    /// Instance label without the service suffix (`PING_host123`)
    pub instance: String,
    /// Host name published in the SRV record (`host123.local.`)
    pub server: String,
    /// Advertised address
    pub ip: IpAddr,
    /// Advertised port
    pub port: u16,
    /// Advertised role (reserved, not consumed by matching)
    pub role: Role,
}

impl AnnouncementRecord {
    /// Build the record for an identity
    ///
    /// The host suffix keeps instance names distinct when several agents run
    /// with the same name on different machines.
    #[must_use]
    pub fn for_identity(identity: &EndpointIdentity, host_suffix: Option<&str>) -> Self {
        let instance = match host_suffix {
            Some(host) if !host.is_empty() => format!("{}_{}", identity.name(), host),
            _ => identity.name().to_string(),
        };
        let server = format!("{}.local.", host_suffix.unwrap_or(identity.name()));

        Self {
            service_type: SERVICE_TYPE,
            instance,
            server,
            ip: identity.addr().ip(),
            port: identity.addr().port(),
            role: identity.role(),
        }
    }

    /// Fully qualified instance name (`PING_host123._aikoagent._tcp.local.`)
    #[must_use]
    pub fn fullname(&self) -> String {
        format!("{}.{}", self.instance, self.service_type)
    }
}

/// An announcement observed on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Fully qualified instance name as announced
    pub fullname: String,
    /// IPv4 addresses carried by the record
    pub addresses: Vec<Ipv4Addr>,
    /// Service port
    pub port: u16,
    /// Advertised role, if present and recognised
    pub role: Option<Role>,
}

impl Announcement {
    /// First callable address of the announcement
    #[must_use]
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.addresses
            .first()
            .map(|ip| SocketAddr::new(IpAddr::V4(*ip), self.port))
    }
}

/// Strip the service-type suffix from a fully qualified instance name
#[must_use]
pub fn instance_label(fullname: &str) -> &str {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .map(|label| label.trim_end_matches('.'))
        .unwrap_or(fullname)
}

/// Case-insensitive substring match of a target name against an instance
///
/// Only the instance label is compared, so a target can never match the
/// shared service tag. Empty targets match nothing.
#[must_use]
pub fn matches_target(fullname: &str, target: &str) -> bool {
    let target = target.trim();
    if target.is_empty() {
        return false;
    }
    instance_label(fullname)
        .to_lowercase()
        .contains(&target.to_lowercase())
}
