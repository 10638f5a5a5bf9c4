//! Relay engine: drives the numbered exchange.
//!
//! The initiator locates its peer, waits a settle delay and originates
//! `message #0`. Every endpoint answers an inbound `message #n` immediately
//! and hands `message #n+1` to a background forward, until a counter at or
//! above the bound is seen, which is answered with `done` and not forwarded.
//!
//! A responder that never discovered its peer uses the `reply_to` address
//! carried by the first call it receives.

use crate::config::ExchangeConfig;
use crate::error::{RelayError, Result};
use crate::exchange_log::{ExchangeEvent, ExchangeLog};
use crate::message::ExchangeMessage;
use crate::session::{ExchangeSession, SessionSnapshot, Step};
use crate::tasks::{DrainReport, ForwardTracker};
use aiko_discovery::{Browse, DiscoveredPeer, EndpointIdentity, Locator};
use aiko_transport::{InboundHandler, Rejection, RelayReply, RelayRequest, Transport};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

struct EngineInner {
    identity: EndpointIdentity,
    config: ExchangeConfig,
    session: ExchangeSession,
    transport: Arc<dyn Transport>,
    tracker: ForwardTracker,
    log: ExchangeLog,
}

/// Relay engine for one endpoint
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct RelayEngine {
    inner: Arc<EngineInner>,
}

impl RelayEngine {
    /// Create an engine for `identity`
    #[must_use]
    pub fn new(
        identity: EndpointIdentity,
        config: ExchangeConfig,
        transport: Arc<dyn Transport>,
        log: ExchangeLog,
    ) -> Self {
        let session = ExchangeSession::new(identity.role(), config.max_count);
        Self {
            inner: Arc::new(EngineInner {
                identity,
                config,
                session,
                transport,
                tracker: ForwardTracker::new(),
                log,
            }),
        }
    }

    /// Endpoint this engine runs for
    #[must_use]
    pub fn identity(&self) -> &EndpointIdentity {
        &self.inner.identity
    }

    /// Exchange parameters
    #[must_use]
    pub fn config(&self) -> &ExchangeConfig {
        &self.inner.config
    }

    /// Record the peer address; see [`ExchangeSession::resolve_peer`]
    pub async fn set_peer(&self, addr: SocketAddr) -> bool {
        self.inner.session.resolve_peer(addr).await
    }

    /// Process one inbound call
    ///
    /// Returns the acknowledgment without waiting for the forwarded hop.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedMessage` if the counter cannot be
    /// parsed; the session is left untouched in that case.
    pub async fn handle_inbound(&self, request: RelayRequest) -> Result<RelayReply> {
        let msg = ExchangeMessage::parse(&request.message)?;
        let inner = &self.inner;

        if let Some(reply_to) = request.reply_to {
            if inner.session.resolve_peer(reply_to).await {
                info!("Learned peer {} from inbound call", reply_to);
            }
        }

        inner.log.record(ExchangeEvent::Received, msg.counter());

        match inner.session.record_inbound(msg).await {
            Step::Terminate => {
                inner.log.record(ExchangeEvent::Done, msg.counter());
                Ok(RelayReply::done())
            }
            Step::Forward(next) => {
                let Some(peer) = inner.session.peer() else {
                    warn!("No peer to forward {} to", next);
                    return Ok(RelayReply::unavailable());
                };
                match self.forward(peer, next).await {
                    Ok(()) => Ok(RelayReply::forwarded(next)),
                    Err(RelayError::ShuttingDown) => {
                        debug!("Dropping {} during shutdown", next);
                        Ok(RelayReply::unavailable())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Send `message #0` to the resolved peer
    ///
    /// # Errors
    ///
    /// - `RelayError::NoPeer` if no peer has been resolved
    /// - `RelayError::ShuttingDown` after [`shutdown`](Self::shutdown)
    pub async fn originate(&self) -> Result<()> {
        let peer = self.inner.session.peer().ok_or(RelayError::NoPeer)?;
        info!("Originating exchange with {}", peer);
        self.forward(peer, ExchangeMessage::first()).await
    }

    /// Initiator startup: locate `target`, settle, originate
    ///
    /// The returned peer carries the address message #0 went to. If a caller
    /// already resolved the peer while discovery ran, that address is kept.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::DiscoveryTimeout` if the peer never shows up.
    /// The engine stays inert in that case and keeps answering inbound
    /// calls.
    pub async fn start_initiator<B: Browse>(
        &self,
        locator: &Locator<B>,
        target: &str,
    ) -> Result<DiscoveredPeer> {
        let mut peer = locator.locate(target).await?;
        if !self.set_peer(peer.addr).await {
            if let Some(known) = self.inner.session.peer() {
                if known != peer.addr {
                    warn!(
                        "Discovered {} at {}, but peer {} is already in use",
                        peer.instance, peer.addr, known
                    );
                    peer.addr = known;
                }
            }
        }

        let settle = self.inner.config.settle_delay;
        if !settle.is_zero() {
            debug!("Waiting {:?} for {} to settle", settle, peer.addr);
            tokio::time::sleep(settle).await;
        }

        self.originate().await?;
        Ok(peer)
    }

    /// Snapshot of the exchange state
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.session.snapshot().await
    }

    /// Stop accepting new hops and wait for in-flight forwards
    pub async fn shutdown(&self) -> DrainReport {
        let grace = self.inner.config.shutdown_grace;
        let report = self.inner.tracker.drain(grace).await;
        info!(
            "Relay engine stopped ({} forward(s) completed, {} aborted)",
            report.completed, report.aborted
        );
        report
    }

    async fn forward(&self, peer: SocketAddr, msg: ExchangeMessage) -> Result<()> {
        let inner = &self.inner;

        // The task holds back until the hop is accounted for, and nothing is
        // accounted for unless the tracker took the task
        let (release, released) = oneshot::channel::<()>();
        let engine = self.clone();
        let spawned = inner.tracker.spawn(async move {
            if released.await.is_ok() {
                engine.deliver(peer, msg).await;
            }
        });
        if !spawned {
            return Err(RelayError::ShuttingDown);
        }

        inner.session.record_outbound(msg).await;
        inner.log.record(ExchangeEvent::Sent, msg.counter());
        let _ = release.send(());
        Ok(())
    }

    async fn deliver(&self, peer: SocketAddr, msg: ExchangeMessage) {
        let inner = &self.inner;
        let request = RelayRequest::new(msg.to_string()).with_reply_to(inner.identity.addr());

        match inner.transport.send(peer, &request).await {
            Ok(reply) => debug!("{} acknowledged {}: {}", peer, msg, reply.reply),
            Err(e) => {
                let err = RelayError::SendFailure {
                    peer,
                    reason: e.to_string(),
                };
                warn!("{}; exchange stalls at {}", err, msg);
                inner.session.record_failure().await;
                inner.log.record(ExchangeEvent::SendFailed, msg.counter());
            }
        }
    }
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("identity", &self.inner.identity)
            .field("config", &self.inner.config)
            .field("peer", &self.inner.session.peer())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl InboundHandler for RelayEngine {
    async fn on_receive(&self, request: RelayRequest) -> std::result::Result<RelayReply, Rejection> {
        self.handle_inbound(request).await.map_err(|e| {
            warn!("Rejecting inbound call: {}", e);
            Rejection::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ExchangePhase;
    use aiko_discovery::{LocatorConfig, Role, StaticBrowser};
    use aiko_transport::{TransportError, TransportResult};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every call; optionally fails them
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(SocketAddr, RelayRequest)>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<(SocketAddr, RelayRequest)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            peer: SocketAddr,
            request: &RelayRequest,
        ) -> TransportResult<RelayReply> {
            self.sent.lock().unwrap().push((peer, request.clone()));
            if self.fail {
                return Err(TransportError::Unreachable {
                    peer,
                    reason: "connection refused".to_string(),
                });
            }
            Ok(RelayReply::forwarded("ok"))
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn engine(role: Role, max_count: u64, transport: Arc<RecordingTransport>) -> RelayEngine {
        let name = match role {
            Role::Initiator => "PING",
            Role::Responder => "PONG",
        };
        let port = match role {
            Role::Initiator => 8000,
            Role::Responder => 8001,
        };
        let identity = EndpointIdentity::new(name, addr(port), role).unwrap();
        let config = ExchangeConfig {
            max_count,
            settle_delay: Duration::ZERO,
            shutdown_grace: Duration::from_secs(5),
        };
        RelayEngine::new(identity, config, transport, ExchangeLog::disabled(name))
    }

    fn call(counter: u64, reply_to: Option<SocketAddr>) -> RelayRequest {
        RelayRequest {
            message: ExchangeMessage::new(counter).to_string(),
            reply_to,
        }
    }

    #[tokio::test]
    async fn test_inbound_forwards_successor() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Responder, 3, Arc::clone(&transport));

        let reply = engine
            .handle_inbound(call(0, Some(addr(8000))))
            .await
            .unwrap();
        assert_eq!(reply.reply, "forwarded: message #1");

        engine.shutdown().await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, addr(8000));
        assert_eq!(sent[0].1.message, "message #1");
        assert_eq!(sent[0].1.reply_to, Some(addr(8001)));
    }

    #[tokio::test]
    async fn test_inbound_at_bound_replies_done() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Initiator, 3, Arc::clone(&transport));
        engine.set_peer(addr(8001)).await;

        let reply = engine.handle_inbound(call(3, None)).await.unwrap();
        assert!(reply.is_terminal());

        engine.shutdown().await;
        assert!(transport.sent().is_empty());
        assert_eq!(engine.snapshot().await.phase, ExchangePhase::Done);
    }

    #[tokio::test]
    async fn test_malformed_leaves_state_untouched() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Responder, 3, Arc::clone(&transport));
        let before = engine.snapshot().await;

        let err = engine
            .handle_inbound(RelayRequest::new("message #abc").with_reply_to(addr(8000)))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage { .. }));

        let rejection = engine
            .on_receive(RelayRequest::new("hello"))
            .await
            .unwrap_err();
        assert_eq!(rejection.kind, "malformed_message");

        assert_eq!(engine.snapshot().await, before);
        assert!(engine.snapshot().await.peer.is_none());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_no_peer_replies_unavailable() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Responder, 3, Arc::clone(&transport));

        let reply = engine.handle_inbound(call(0, None)).await.unwrap();
        assert_eq!(reply, RelayReply::unavailable());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_double_forwards() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Responder, 10, Arc::clone(&transport));

        engine.handle_inbound(call(4, Some(addr(8000)))).await.unwrap();
        engine.handle_inbound(call(4, Some(addr(8000)))).await.unwrap();

        engine.shutdown().await;
        let messages: Vec<String> = transport.sent().into_iter().map(|(_, r)| r.message).collect();
        assert_eq!(messages, vec!["message #5", "message #5"]);
        assert_eq!(engine.snapshot().await.forwarded, 2);
    }

    #[tokio::test]
    async fn test_producing_bound_enters_done() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Responder, 3, Arc::clone(&transport));

        let reply = engine
            .handle_inbound(call(2, Some(addr(8000))))
            .await
            .unwrap();
        assert_eq!(reply.reply, "forwarded: message #3");

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.phase, ExchangePhase::Done);
        assert_eq!(snapshot.highest, Some(3));
    }

    #[tokio::test]
    async fn test_send_failure_stalls() {
        let transport = Arc::new(RecordingTransport::failing());
        let engine = engine(Role::Responder, 3, Arc::clone(&transport));

        let reply = engine
            .handle_inbound(call(0, Some(addr(8000))))
            .await
            .unwrap();
        assert_eq!(reply.reply, "forwarded: message #1");

        engine.shutdown().await;
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.forwarded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.phase, ExchangePhase::Exchanging);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_originate_requires_peer() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Initiator, 3, Arc::clone(&transport));

        assert!(matches!(engine.originate().await, Err(RelayError::NoPeer)));
        assert_eq!(engine.snapshot().await.phase, ExchangePhase::AwaitingPeer);
    }

    #[tokio::test]
    async fn test_start_initiator_sends_first_message() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Initiator, 3, Arc::clone(&transport));
        let browser = StaticBrowser::new(vec!["PONG=127.0.0.1:8001".parse().unwrap()]);
        let locator = Locator::new(browser, LocatorConfig::default());

        let peer = engine.start_initiator(&locator, "pong").await.unwrap();
        assert_eq!(peer.addr, addr(8001));
        assert_eq!(peer.attempt, 1);

        engine.shutdown().await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, addr(8001));
        assert_eq!(sent[0].1.message, "message #0");
        assert_eq!(engine.snapshot().await.phase, ExchangePhase::Exchanging);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_initiator_discovery_timeout() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Initiator, 3, Arc::clone(&transport));
        let locator = Locator::new(
            StaticBrowser::new(Vec::new()),
            LocatorConfig {
                attempt_timeout: Duration::from_secs(3),
                max_retries: 2,
                retry_delay: Duration::from_secs(1),
            },
        );

        let err = engine.start_initiator(&locator, "PONG").await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::DiscoveryTimeout { attempts: 2, .. }
        ));

        // Inert but still answering
        assert!(transport.sent().is_empty());
        assert_eq!(engine.snapshot().await.phase, ExchangePhase::AwaitingPeer);
        let reply = engine.handle_inbound(call(5, None)).await.unwrap();
        assert!(reply.is_terminal());
    }

    #[tokio::test]
    async fn test_no_forwards_after_shutdown() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Responder, 3, Arc::clone(&transport));
        engine.shutdown().await;

        let reply = engine
            .handle_inbound(call(0, Some(addr(8000))))
            .await
            .unwrap();
        assert_eq!(reply, RelayReply::unavailable());
        assert!(matches!(
            engine.originate().await,
            Err(RelayError::ShuttingDown)
        ));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_refused_forward_is_not_accounted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pong.log");
        let identity = EndpointIdentity::new("PONG", addr(8001), Role::Responder).unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let engine = RelayEngine::new(
            identity,
            ExchangeConfig::with_max_count(3),
            Arc::clone(&transport) as Arc<dyn Transport>,
            ExchangeLog::open("PONG", &path).unwrap(),
        );
        engine.shutdown().await;

        let reply = engine
            .handle_inbound(call(0, Some(addr(8000))))
            .await
            .unwrap();
        assert_eq!(reply, RelayReply::unavailable());

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.received, 1);
        assert_eq!(snapshot.forwarded, 0);
        assert_eq!(snapshot.highest, Some(0));

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("Received message #0"));
        assert!(!log.contains("Sent"), "unsent hop was logged: {log}");
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_start_initiator_reports_peer_in_use() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Role::Initiator, 3, Arc::clone(&transport));

        // A caller resolved the peer before discovery finished
        engine.handle_inbound(call(5, Some(addr(9000)))).await.unwrap();

        let browser = StaticBrowser::new(vec!["PONG=127.0.0.1:8001".parse().unwrap()]);
        let locator = Locator::new(browser, LocatorConfig::default());
        let peer = engine.start_initiator(&locator, "PONG").await.unwrap();

        engine.shutdown().await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.message, "message #0");
        assert_eq!(sent[0].0, addr(9000));
        assert_eq!(peer.addr, addr(9000));
    }
}
