//! mDNS backend built on `mdns-sd`.
//!
//! The daemon is an explicitly constructed resource: create it at startup,
//! hand clones to the advertiser and the browser, and call
//! [`MdnsDaemon::shutdown`] when the process stops. Nothing here is a
//! process-wide singleton, so repeated test runs never share listeners.

use crate::announcement::{Announcement, PROP_ROLE, SERVICE_TYPE};
use crate::browse::{AnnouncementListener, Browse};
use crate::error::DiscoveryError;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::net::Ipv4Addr;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Owned handle to the multicast responder
#[derive(Clone)]
pub struct MdnsDaemon {
    daemon: ServiceDaemon,
}

impl MdnsDaemon {
    /// Bind the multicast responder on all usable interfaces
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Daemon` if no multicast socket can be bound.
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;
        debug!("mDNS daemon started");
        Ok(Self { daemon })
    }

    /// Browse backend sharing this daemon
    #[must_use]
    pub fn browser(&self) -> MdnsBrowser {
        MdnsBrowser {
            daemon: self.daemon.clone(),
        }
    }

    pub(crate) fn raw(&self) -> &ServiceDaemon {
        &self.daemon
    }

    /// Stop the responder, withdrawing anything still registered
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Daemon` if the daemon already stopped.
    pub fn shutdown(self) -> Result<(), DiscoveryError> {
        self.daemon.shutdown()?;
        debug!("mDNS daemon stopped");
        Ok(())
    }
}

impl std::fmt::Debug for MdnsDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsDaemon").finish_non_exhaustive()
    }
}

/// Browse backend listening for `_aikoagent._tcp.local.` announcements
#[derive(Clone)]
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
}

impl Browse for MdnsBrowser {
    fn open(&self) -> Result<AnnouncementListener, DiscoveryError> {
        let events = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Listen(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        // mdns-sd delivers events on a blocking channel; bridge it onto tokio.
        // The thread exits when the browse is stopped or the listener is gone.
        std::thread::Builder::new()
            .name("aiko-mdns-browse".to_string())
            .spawn(move || {
                while let Ok(event) = events.recv() {
                    match event {
                        ServiceEvent::ServiceResolved(info) => {
                            if tx.send(to_announcement(&info)).is_err() {
                                break;
                            }
                        }
                        ServiceEvent::SearchStopped(_) => break,
                        other => trace!("mDNS browse event: {other:?}"),
                    }
                }
            })
            .map_err(|e| DiscoveryError::Listen(e.to_string()))?;

        let daemon = self.daemon.clone();
        Ok(AnnouncementListener::new(rx).with_close(move || {
            if let Err(e) = daemon.stop_browse(SERVICE_TYPE) {
                debug!("mDNS: stop_browse failed: {e}");
            }
        }))
    }
}

impl std::fmt::Debug for MdnsBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsBrowser").finish_non_exhaustive()
    }
}

fn to_announcement(info: &ServiceInfo) -> Announcement {
    let mut addresses: Vec<Ipv4Addr> = info.get_addresses_v4().into_iter().copied().collect();
    addresses.sort();

    Announcement {
        fullname: info.get_fullname().to_string(),
        addresses,
        port: info.get_port(),
        role: info
            .get_property_val_str(PROP_ROLE)
            .and_then(|role| role.parse().ok()),
    }
}
