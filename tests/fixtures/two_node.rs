//! Two-node test fixture for integration testing
//!
//! Runs an initiator (`PING`) and a responder (`PONG`) on loopback, each with
//! its own relay server, HTTP transport and exchange log. Every outgoing
//! message from either side is appended to one shared wire log, so tests can
//! assert exactly what crossed the wire and in which order.
//!
//! # Example
//!
//! ```no_run
//! use aiko_integration_tests::fixtures::TwoNodeFixture;
//!
//! #[tokio::test]
//! async fn test_basic_exchange() {
//!     let fixture = TwoNodeFixture::new(3).await.unwrap();
//!     fixture.start_exchange().await.unwrap();
//!     assert!(fixture.wait_for_done().await);
//!     fixture.shutdown().await;
//! }
//! ```

use crate::test_helpers::{WireTap, wait_until};
use aiko_core::{ExchangeConfig, ExchangeLog, ExchangePhase, RelayEngine};
use aiko_discovery::{
    DiscoveredPeer, EndpointIdentity, Locator, LocatorConfig, Role, StaticBrowser, StaticPeer,
};
use aiko_transport::{HttpTransport, RelayServer, TransportResult};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One running endpoint
pub struct TestNode {
    pub engine: RelayEngine,
    pub addr: SocketAddr,
    pub log_path: PathBuf,
    stop: oneshot::Sender<()>,
    serving: JoinHandle<TransportResult<()>>,
}

impl TestNode {
    async fn start(
        name: &str,
        role: Role,
        config: ExchangeConfig,
        log_dir: &TempDir,
        wire: Arc<Mutex<Vec<String>>>,
    ) -> anyhow::Result<Self> {
        let server = RelayServer::bind("127.0.0.1:0".parse()?).await?;
        let addr = server.local_addr();

        let identity = EndpointIdentity::new(name, addr, role)?;
        let transport = WireTap::new(HttpTransport::new(Duration::from_secs(5))?, wire);
        let log_path = log_dir.path().join(format!("{}.log", name.to_lowercase()));
        let log = ExchangeLog::open(name, &log_path)?;
        let engine = RelayEngine::new(identity, config, Arc::new(transport), log);

        let (stop, stop_rx) = oneshot::channel();
        let serving = tokio::spawn(server.serve(Arc::new(engine.clone()), async move {
            let _ = stop_rx.await;
        }));

        Ok(Self {
            engine,
            addr,
            log_path,
            stop,
            serving,
        })
    }

    /// Lines written to this node's exchange log, without timestamps
    pub fn log_events(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log_path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.split_once(' ').map(|(_, event)| event.to_string()))
            .collect()
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.serving.await;
        self.engine.shutdown().await;
    }
}

/// Initiator and responder talking over loopback HTTP
pub struct TwoNodeFixture {
    pub initiator: TestNode,
    pub responder: TestNode,
    wire: Arc<Mutex<Vec<String>>>,
    _log_dir: TempDir,
}

impl TwoNodeFixture {
    /// Start both nodes with the given bound and no settle delay
    ///
    /// # Errors
    ///
    /// Returns an error if a server cannot bind or a log cannot be opened.
    pub async fn new(max_count: u64) -> anyhow::Result<Self> {
        let config = ExchangeConfig {
            max_count,
            settle_delay: Duration::ZERO,
            shutdown_grace: Duration::from_secs(2),
        };
        Self::new_with_config(config).await
    }

    /// Start both nodes with a custom exchange config
    ///
    /// # Errors
    ///
    /// Returns an error if a server cannot bind or a log cannot be opened.
    pub async fn new_with_config(config: ExchangeConfig) -> anyhow::Result<Self> {
        let log_dir = tempfile::tempdir()?;
        let wire = Arc::new(Mutex::new(Vec::new()));

        let responder =
            TestNode::start("PONG", Role::Responder, config, &log_dir, Arc::clone(&wire)).await?;
        let initiator =
            TestNode::start("PING", Role::Initiator, config, &log_dir, Arc::clone(&wire)).await?;

        Ok(Self {
            initiator,
            responder,
            wire,
            _log_dir: log_dir,
        })
    }

    /// Locate the responder through a static backend and originate message #0
    ///
    /// # Errors
    ///
    /// Returns the relay error if location or origination fails.
    pub async fn start_exchange(&self) -> anyhow::Result<DiscoveredPeer> {
        let peer = StaticPeer {
            name: "PONG".to_string(),
            addr: self.responder.addr,
        };
        let locator = Locator::new(
            StaticBrowser::new(vec![peer]),
            LocatorConfig {
                attempt_timeout: Duration::from_millis(500),
                max_retries: 2,
                retry_delay: Duration::from_millis(50),
            },
        );
        Ok(self.initiator.engine.start_initiator(&locator, "PONG").await?)
    }

    /// Wait until both engines have reached `Done`
    pub async fn wait_for_done(&self) -> bool {
        wait_until(Duration::from_secs(5), || async {
            self.initiator.engine.snapshot().await.phase == ExchangePhase::Done
                && self.responder.engine.snapshot().await.phase == ExchangePhase::Done
        })
        .await
    }

    /// Every message sent by either node, in send order
    pub fn wire_messages(&self) -> Vec<String> {
        self.wire.lock().unwrap().clone()
    }

    /// Stop both servers and drain in-flight forwards
    pub async fn shutdown(self) {
        self.initiator.stop().await;
        self.responder.stop().await;
    }
}
