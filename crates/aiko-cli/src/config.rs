//! Configuration system for the AIKO CLI.

use aiko_core::ExchangeConfig;
use aiko_discovery::{LocatorConfig, Role, StaticPeer};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// AIKO configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Endpoint configuration
    #[serde(default)]
    pub node: NodeConfig,
    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Exchange configuration
    #[serde(default)]
    pub exchange: ExchangeSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Endpoint name, published as the instance label
    #[serde(default = "default_name")]
    pub name: String,
    /// Side of the exchange
    #[serde(default = "default_role")]
    pub role: Role,
    /// Relay server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// IPv4 address to advertise instead of the detected one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,
    /// Append the host name to the instance label
    #[serde(default = "default_true")]
    pub host_suffix: bool,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Name of the peer to locate (initiator only)
    #[serde(default = "default_target_name")]
    pub target_name: String,
    /// Per-attempt discovery timeout in milliseconds
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Number of discovery attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// `NAME=ip:port` peers used instead of multicast discovery
    #[serde(default)]
    pub static_peers: Vec<String>,
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    /// Last counter of the exchange (inclusive)
    #[serde(default = "default_max_count")]
    pub max_count: u64,
    /// Pause between discovery and message #0 in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Per-call transport timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Time allowed for in-flight forwards at shutdown in milliseconds
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Exchange log file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// Default values

fn default_name() -> String {
    "PING".to_string()
}

fn default_role() -> Role {
    Role::Initiator
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_true() -> bool {
    true
}

fn default_target_name() -> String {
    "PONG".to_string()
}

fn default_attempt_timeout_ms() -> u64 {
    3000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_count() -> u64 {
    1000
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            role: default_role(),
            listen_addr: default_listen_addr(),
            advertise_addr: None,
            host_suffix: true,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            target_name: default_target_name(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            static_peers: Vec::new(),
        }
    }
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            settle_delay_ms: default_settle_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("aiko/config.toml")
    }

    /// Load config from the default path, or fall back to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the default file exists but cannot be parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply command-line overrides
    pub fn apply_overrides(
        &mut self,
        name: Option<String>,
        role: Option<Role>,
        listen: Option<String>,
        target: Option<String>,
    ) {
        if let Some(name) = name {
            self.node.name = name;
        }
        if let Some(role) = role {
            self.node.role = role;
        }
        if let Some(listen) = listen {
            self.node.listen_addr = listen;
        }
        if let Some(target) = target {
            self.discovery.target_name = target;
        }
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.node
            .listen_addr
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid listen address: {}", self.node.listen_addr))
    }

    /// Parse the advertised address override
    ///
    /// # Errors
    ///
    /// Returns an error if the override is not an IP address.
    pub fn advertise_ip(&self) -> anyhow::Result<Option<IpAddr>> {
        self.node
            .advertise_addr
            .as_deref()
            .map(|addr| {
                addr.parse()
                    .map_err(|_| anyhow::anyhow!("Invalid advertise address: {addr}"))
            })
            .transpose()
    }

    /// Parse configured static peers
    ///
    /// # Errors
    ///
    /// Returns an error for the first entry that is not `NAME=ip:port`.
    pub fn static_peers(&self) -> anyhow::Result<Vec<StaticPeer>> {
        self.discovery
            .static_peers
            .iter()
            .map(|peer| peer.parse::<StaticPeer>().map_err(anyhow::Error::from))
            .collect()
    }

    /// Discovery retry policy
    #[must_use]
    pub fn locator_config(&self) -> LocatorConfig {
        LocatorConfig {
            attempt_timeout: Duration::from_millis(self.discovery.attempt_timeout_ms),
            max_retries: self.discovery.max_retries,
            retry_delay: Duration::from_millis(self.discovery.retry_delay_ms),
        }
    }

    /// Exchange parameters
    #[must_use]
    pub fn exchange_config(&self) -> ExchangeConfig {
        ExchangeConfig {
            max_count: self.exchange.max_count,
            settle_delay: Duration::from_millis(self.exchange.settle_delay_ms),
            shutdown_grace: Duration::from_millis(self.exchange.shutdown_grace_ms),
        }
    }

    /// Per-call transport timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange.request_timeout_ms)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        let name = self.node.name.trim();
        if name.is_empty() || name.contains('.') {
            anyhow::bail!(
                "Invalid endpoint name '{}': must be non-empty and contain no '.'",
                self.node.name
            );
        }

        self.listen_addr()?;
        if let Some(IpAddr::V6(ip)) = self.advertise_ip()? {
            anyhow::bail!("Advertise address {ip} is not IPv4");
        }

        if self.node.role == Role::Initiator {
            let target = self.discovery.target_name.trim();
            if target.is_empty() {
                anyhow::bail!("An initiator needs a non-empty discovery.target_name");
            }
            // Loose matching would resolve to ourselves
            if name.to_lowercase().contains(&target.to_lowercase()) {
                anyhow::bail!(
                    "Target name '{}' matches this endpoint's own name '{}'",
                    target,
                    name
                );
            }
        }

        self.locator_config().validate()?;
        self.static_peers()?;

        if self.exchange.request_timeout_ms == 0 {
            anyhow::bail!("Request timeout must be non-zero");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
