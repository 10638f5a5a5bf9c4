//! Advertiser: publishes this endpoint on the LAN.
//!
//! `advertise` returns a [`Registration`] guard. Withdrawing it (explicitly
//! or by dropping it) removes the record, so a stopped endpoint leaves no
//! stale announcement behind for the next discovery attempt.

use crate::announcement::{AnnouncementRecord, PROP_ROLE, SERVICE_TYPE};
use crate::error::DiscoveryError;
use crate::identity::EndpointIdentity;
use crate::mdns::MdnsDaemon;
use mdns_sd::{DaemonEvent, ServiceDaemon, ServiceInfo};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Record currently published by an advertiser
#[derive(Debug)]
struct ActiveRecord {
    fullname: String,
    generation: u64,
}

/// Publishes endpoint identities under the shared service type
pub struct Advertiser {
    daemon: MdnsDaemon,
    host_suffix: Option<String>,
    active: Arc<Mutex<Option<ActiveRecord>>>,
    generation: Mutex<u64>,
}

impl Advertiser {
    /// Create an advertiser on an existing daemon
    ///
    /// Renames applied by the daemon when another host already owns the
    /// instance name are accepted and logged.
    #[must_use]
    pub fn new(daemon: MdnsDaemon, host_suffix: Option<String>) -> Self {
        watch_name_changes(daemon.raw());
        Self {
            daemon,
            host_suffix,
            active: Arc::new(Mutex::new(None)),
            generation: Mutex::new(0),
        }
    }

    /// Record that `advertise` would publish for an identity
    #[must_use]
    pub fn record_for(&self, identity: &EndpointIdentity) -> AnnouncementRecord {
        AnnouncementRecord::for_identity(identity, self.host_suffix.as_deref())
    }

    /// Publish an identity
    ///
    /// Advertising again replaces the previous record; the older
    /// [`Registration`] becomes inert.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Advertise` if the record is rejected or the
    /// daemon cannot take it.
    pub fn advertise(&self, identity: &EndpointIdentity) -> Result<Registration, DiscoveryError> {
        let record = self.record_for(identity);
        let fullname = record.fullname();
        let info = service_info(&record)?;

        let mut active = self
            .active
            .lock()
            .map_err(|_| DiscoveryError::Daemon("advertiser state poisoned".to_string()))?;

        if let Some(previous) = active.as_ref() {
            if previous.fullname != fullname {
                if let Err(e) = self.daemon.raw().unregister(&previous.fullname) {
                    warn!("mDNS: failed to withdraw {}: {e}", previous.fullname);
                }
            } else {
                debug!("mDNS: replacing existing record {fullname}");
            }
        }

        self.daemon
            .raw()
            .register(info)
            .map_err(|e| DiscoveryError::Advertise {
                instance: record.instance.clone(),
                reason: e.to_string(),
            })?;

        let generation = {
            let mut counter = self
                .generation
                .lock()
                .map_err(|_| DiscoveryError::Daemon("advertiser state poisoned".to_string()))?;
            *counter += 1;
            *counter
        };
        *active = Some(ActiveRecord {
            fullname: fullname.clone(),
            generation,
        });

        info!(
            "mDNS: registered {} at {}:{} (role={})",
            fullname, record.ip, record.port, record.role
        );

        Ok(Registration {
            daemon: self.daemon.raw().clone(),
            active: Arc::clone(&self.active),
            fullname,
            generation,
            withdrawn: false,
        })
    }
}

impl std::fmt::Debug for Advertiser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Advertiser")
            .field("host_suffix", &self.host_suffix)
            .finish_non_exhaustive()
    }
}

/// Guard for a published record
pub struct Registration {
    daemon: ServiceDaemon,
    active: Arc<Mutex<Option<ActiveRecord>>>,
    fullname: String,
    generation: u64,
    withdrawn: bool,
}

impl Registration {
    /// Fully qualified instance name as requested
    #[must_use]
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Withdraw the record now
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Daemon` if the daemon rejects the request.
    pub fn withdraw(mut self) -> Result<(), DiscoveryError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), DiscoveryError> {
        if self.withdrawn {
            return Ok(());
        }
        self.withdrawn = true;

        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A newer advertise call owns the record now
        let current = active
            .as_ref()
            .is_some_and(|record| record.generation == self.generation);
        if !current {
            return Ok(());
        }
        *active = None;

        self.daemon.unregister(&self.fullname)?;
        info!("mDNS: withdrew {}", self.fullname);
        Ok(())
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("mDNS: failed to withdraw {}: {e}", self.fullname);
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("fullname", &self.fullname)
            .field("withdrawn", &self.withdrawn)
            .finish()
    }
}

/// Translate a record into the daemon's service description
fn service_info(record: &AnnouncementRecord) -> Result<ServiceInfo, DiscoveryError> {
    let properties = [(PROP_ROLE, record.role.as_str())];
    let to_error = |e: mdns_sd::Error| DiscoveryError::Advertise {
        instance: record.instance.clone(),
        reason: e.to_string(),
    };

    // Loopback and wildcard binds are not reachable from the LAN; let the
    // daemon publish every interface address instead.
    if record.ip.is_loopback() || record.ip.is_unspecified() {
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &record.instance,
            &record.server,
            "",
            record.port,
            &properties[..],
        )
        .map_err(to_error)?;
        Ok(info.enable_addr_auto())
    } else {
        let ip = record.ip.to_string();
        ServiceInfo::new(
            SERVICE_TYPE,
            &record.instance,
            &record.server,
            ip.as_str(),
            record.port,
            &properties[..],
        )
        .map_err(to_error)
    }
}

/// Log renames the daemon applies after a name conflict
fn watch_name_changes(daemon: &ServiceDaemon) {
    let events = match daemon.monitor() {
        Ok(events) => events,
        Err(e) => {
            warn!("mDNS: cannot monitor name conflicts: {e}");
            return;
        }
    };

    let spawned = std::thread::Builder::new()
        .name("aiko-mdns-monitor".to_string())
        .spawn(move || {
            while let Ok(event) = events.recv() {
                match event {
                    DaemonEvent::NameChange(change) => {
                        info!("mDNS: instance renamed after conflict: {change:?}");
                    }
                    DaemonEvent::Error(e) => warn!("mDNS daemon error: {e}"),
                    _ => {}
                }
            }
        });
    if let Err(e) = spawned {
        warn!("mDNS: cannot spawn conflict monitor: {e}");
    }
}
