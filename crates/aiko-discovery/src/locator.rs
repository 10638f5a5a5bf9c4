//! Locator: finds a named peer with bounded retries.
//!
//! Multicast announcements are lossy and the peer may start after us, so a
//! single fixed wait produces spurious failures. Each attempt opens a fresh
//! listener and waits up to `attempt_timeout` for the first announcement
//! whose instance label contains the target name. Between failed attempts
//! the locator sleeps `retry_delay`. After `max_retries` attempts it gives up
//! with [`DiscoveryError::Timeout`].

use crate::announcement::{Announcement, matches_target};
use crate::browse::{AnnouncementListener, Browse};
use crate::error::DiscoveryError;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Retry policy for peer location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorConfig {
    /// How long a single attempt waits for a matching announcement
    pub attempt_timeout: Duration,
    /// Total number of attempts before reporting not-found
    pub max_retries: u32,
    /// Pause between two failed attempts
    pub retry_delay: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(3),
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl LocatorConfig {
    /// Worst-case time spent before giving up
    #[must_use]
    pub fn total_budget(&self) -> Duration {
        let waits = self.attempt_timeout * self.max_retries;
        let pauses = self.retry_delay * self.max_retries.saturating_sub(1);
        waits + pauses
    }

    /// Validate the policy
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::InvalidConfig` for a zero retry count or a
    /// zero attempt timeout.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.max_retries == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "attempt timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A resolved peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Name that was searched for
    pub target: String,
    /// Fully qualified instance name that matched
    pub instance: String,
    /// Address to call
    pub addr: SocketAddr,
    /// Attempt (1-based) on which the peer was found
    pub attempt: u32,
}

/// Finds peers by name on a browse backend
#[derive(Debug)]
pub struct Locator<B> {
    browser: B,
    config: LocatorConfig,
    own_instance: Option<String>,
}

impl<B: Browse> Locator<B> {
    /// Create a locator
    #[must_use]
    pub fn new(browser: B, config: LocatorConfig) -> Self {
        Self {
            browser,
            config,
            own_instance: None,
        }
    }

    /// Never resolve to this instance (our own advertisement)
    #[must_use]
    pub fn excluding(mut self, own_fullname: impl Into<String>) -> Self {
        self.own_instance = Some(own_fullname.into());
        self
    }

    /// Retry policy in use
    #[must_use]
    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Locate `target`, retrying until the budget is spent
    ///
    /// First match wins; there is no preference among several matching
    /// peers.
    ///
    /// # Errors
    ///
    /// - `DiscoveryError::InvalidConfig` for an empty target or bad policy
    /// - `DiscoveryError::Listen` if a listener cannot be opened
    /// - `DiscoveryError::Timeout` once every attempt has failed
    pub async fn locate(&self, target: &str) -> Result<DiscoveredPeer, DiscoveryError> {
        self.config.validate()?;
        let target = target.trim();
        if target.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "target name must not be empty".to_string(),
            ));
        }

        for attempt in 1..=self.config.max_retries {
            debug!(
                "Locating '{}' (attempt {}/{})",
                target, attempt, self.config.max_retries
            );

            let mut listener = self.browser.open()?;
            let outcome = tokio::time::timeout(
                self.config.attempt_timeout,
                self.first_match(&mut listener, target),
            )
            .await;
            drop(listener);

            match outcome {
                Ok(Some((announcement, addr))) => {
                    info!(
                        "Discovered '{}' as {} at {} (attempt {})",
                        target, announcement.fullname, addr, attempt
                    );
                    return Ok(DiscoveredPeer {
                        target: target.to_string(),
                        instance: announcement.fullname,
                        addr,
                        attempt,
                    });
                }
                Ok(None) => debug!("Announcement source closed before '{}' appeared", target),
                Err(_) => debug!(
                    "No announcement for '{}' within {:?}",
                    target, self.config.attempt_timeout
                ),
            }

            if attempt < self.config.max_retries {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        warn!(
            "Could not discover '{}' after {} attempts",
            target, self.config.max_retries
        );
        Err(DiscoveryError::Timeout {
            target: target.to_string(),
            attempts: self.config.max_retries,
            per_attempt: self.config.attempt_timeout,
        })
    }

    async fn first_match(
        &self,
        listener: &mut AnnouncementListener,
        target: &str,
    ) -> Option<(Announcement, SocketAddr)> {
        while let Some(announcement) = listener.next().await {
            if self.is_own(&announcement.fullname) {
                trace!("Skipping own announcement {}", announcement.fullname);
                continue;
            }
            if !matches_target(&announcement.fullname, target) {
                trace!("Ignoring {}", announcement.fullname);
                continue;
            }
            match announcement.socket_addr() {
                Some(addr) => return Some((announcement, addr)),
                None => debug!(
                    "{} matched but carries no IPv4 address",
                    announcement.fullname
                ),
            }
        }
        None
    }

    fn is_own(&self, fullname: &str) -> bool {
        self.own_instance
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(fullname))
    }
}
