//! AIKO CLI
//!
//! LAN discovery and bounded ping-pong relay between two agents

mod backend;
mod config;

use aiko_core::{ExchangeLog, RelayEngine, RelayError};
use aiko_discovery::{
    Advertiser, DiscoveryError, EndpointIdentity, Locator, MdnsDaemon, Registration, Role,
    host_label, local_ipv4,
};
use aiko_transport::{HttpTransport, RelayRequest, RelayServer, Transport};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use backend::DiscoveryBackend;
use config::Config;

/// AIKO - find a peer on the LAN and play a bounded game of ping-pong
#[derive(Parser)]
#[command(name = "aiko")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an endpoint until Ctrl+C
    Run {
        /// Endpoint name
        #[arg(long)]
        name: Option<String>,

        /// Role: initiator (ping) or responder (pong)
        #[arg(long)]
        role: Option<Role>,

        /// Listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// Peer name to locate
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Locate a peer once and print its address
    Locate {
        /// Peer name
        #[arg(required = true)]
        target: String,
    },

    /// Send a single relay message
    Send {
        /// Peer address (ip:port)
        #[arg(required = true)]
        addr: SocketAddr,

        /// Message counter
        #[arg(required = true)]
        counter: u64,
    },

    /// Write the default configuration
    InitConfig {
        /// Output file (defaults to the standard config path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Run {
            name,
            role,
            listen,
            target,
        } => {
            config.apply_overrides(name, role, listen, target);
            config.validate()?;
            run_endpoint(&config).await?;
        }
        Commands::Locate { target } => {
            config.validate()?;
            locate_peer(&target, &config).await?;
        }
        Commands::Send { addr, counter } => {
            config.validate()?;
            send_message(addr, counter, &config).await?;
        }
        Commands::InitConfig { output } => {
            init_config(output)?;
        }
    }

    Ok(())
}

/// Run one endpoint: bind, advertise, (initiator) locate and originate, serve
async fn run_endpoint(config: &Config) -> anyhow::Result<()> {
    let role = config.node.role;
    let listen = config.listen_addr()?;

    // Bind first so the advertised port is the served one
    let server = RelayServer::bind(listen).await?;
    let bound = server.local_addr();

    let ip = advertised_ip(config.advertise_ip()?, bound, local_ipv4);
    let identity = EndpointIdentity::new(&config.node.name, SocketAddr::new(ip, bound.port()), role)?;
    tracing::info!("Starting {}", identity);

    let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
    let log = match &config.logging.file {
        Some(path) => ExchangeLog::open(identity.name(), path)
            .with_context(|| format!("Failed to open exchange log {}", path.display()))?,
        None => ExchangeLog::disabled(identity.name()),
    };
    let engine = RelayEngine::new(identity.clone(), config.exchange_config(), transport, log);

    let daemon = advertisement_outcome(role, MdnsDaemon::new())?;
    let registration = match &daemon {
        Some(daemon) => advertisement_outcome(role, advertise(config, &identity, daemon))?,
        None => None,
    };

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve(Arc::new(engine.clone()), async move {
        let _ = stop_rx.await;
    }));

    if role == Role::Initiator {
        start_exchange(config, &engine, daemon.as_ref(), registration.as_ref()).await?;
    }

    println!("{} ready on {}", identity.name(), bound);
    println!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    let _ = stop_tx.send(());
    match serving.await {
        Ok(Err(e)) => tracing::warn!("Relay server error: {}", e),
        Err(e) => tracing::warn!("Relay server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    engine.shutdown().await;
    let snapshot = engine.snapshot().await;
    println!(
        "Exchange {}: received {}, forwarded {}, failed {}",
        snapshot.phase, snapshot.received, snapshot.forwarded, snapshot.failed
    );

    if let Some(registration) = registration {
        registration.withdraw()?;
    }
    if let Some(daemon) = daemon {
        daemon.shutdown()?;
    }

    Ok(())
}

/// Address other hosts should call
///
/// An explicit override wins. A wildcard bind is replaced by the detected
/// host address; a concrete bind address is used as is.
fn advertised_ip(
    override_ip: Option<IpAddr>,
    bound: SocketAddr,
    detect: impl FnOnce() -> IpAddr,
) -> IpAddr {
    match override_ip {
        Some(ip) => ip,
        None if bound.ip().is_unspecified() => detect(),
        None => bound.ip(),
    }
}

/// Publish the identity under the configured instance label
fn advertise(
    config: &Config,
    identity: &EndpointIdentity,
    daemon: &MdnsDaemon,
) -> Result<Registration, DiscoveryError> {
    let suffix = if config.node.host_suffix {
        host_label()
    } else {
        None
    };
    Advertiser::new(daemon.clone(), suffix).advertise(identity)
}

/// Startup policy for a step of publishing the identity
///
/// A responder is only reachable through its advertisement, so a failure
/// aborts startup. An initiator logs it and continues invisible.
fn advertisement_outcome<T>(
    role: Role,
    step: Result<T, DiscoveryError>,
) -> Result<Option<T>, RelayError> {
    match step {
        Ok(value) => Ok(Some(value)),
        Err(e) if role.must_be_discoverable() => {
            Err(RelayError::AdvertisementFailure(e.to_string()))
        }
        Err(e) => {
            tracing::warn!("Advertisement failed, continuing invisible: {}", e);
            Ok(None)
        }
    }
}

/// Initiator startup; a discovery timeout leaves the endpoint inert
async fn start_exchange(
    config: &Config,
    engine: &RelayEngine,
    daemon: Option<&MdnsDaemon>,
    registration: Option<&Registration>,
) -> anyhow::Result<()> {
    let target = config.discovery.target_name.trim();
    let Some(backend) = DiscoveryBackend::select(config.static_peers()?, daemon) else {
        tracing::warn!("No discovery backend available; not locating '{}'", target);
        return Ok(());
    };
    tracing::debug!("Locating '{}' via {}", target, backend.label());

    let mut locator = Locator::new(backend, config.locator_config());
    if let Some(registration) = registration {
        locator = locator.excluding(registration.fullname());
    }

    match engine.start_initiator(&locator, target).await {
        Ok(peer) => {
            println!("Found {} at {} (attempt {})", peer.instance, peer.addr, peer.attempt);
            Ok(())
        }
        Err(RelayError::DiscoveryTimeout { target, attempts }) => {
            tracing::warn!(
                "Peer '{}' not found after {} attempts; staying idle",
                target,
                attempts
            );
            Ok(())
        }
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => {
            tracing::warn!("Exchange not started: {}", e);
            Ok(())
        }
    }
}

/// One-shot discovery
async fn locate_peer(target: &str, config: &Config) -> anyhow::Result<()> {
    let static_peers = config.static_peers()?;
    let daemon = if static_peers.is_empty() {
        Some(MdnsDaemon::new()?)
    } else {
        None
    };
    let backend = DiscoveryBackend::select(static_peers, daemon.as_ref())
        .context("No discovery backend available")?;

    let locator = Locator::new(backend, config.locator_config());
    let result = locator.locate(target).await;

    if let Some(daemon) = daemon {
        daemon.shutdown()?;
    }

    let peer = result?;
    println!("{} -> {}", peer.instance, peer.addr);
    Ok(())
}

/// Send one relay message and print the reply
async fn send_message(addr: SocketAddr, counter: u64, config: &Config) -> anyhow::Result<()> {
    let transport = HttpTransport::new(config.request_timeout())?;
    let request = RelayRequest::new(aiko_core::ExchangeMessage::new(counter).to_string());

    let reply = transport
        .send(addr, &request)
        .await
        .with_context(|| format!("Failed to send '{}' to {}", request.message, addr))?;

    println!("{}", reply.reply);
    Ok(())
}

/// Write the default configuration
fn init_config(output: Option<PathBuf>) -> anyhow::Result<()> {
    let path = output.unwrap_or_else(Config::default_path);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }

    Config::default().save(&path)?;
    println!("Configuration written to {}", path.display());
    Ok(())
}
