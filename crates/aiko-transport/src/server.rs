//! HTTP server dispatching relay calls to an [`InboundHandler`].
//!
//! # Routes
//!
//! - `POST /handle` - relay call, answered by the handler
//! - `GET /health` - liveness probe

use crate::protocol::{ErrorBody, ErrorDetail, HANDLE_PATH, RelayReply, RelayRequest};
use crate::transport::{InboundHandler, Rejection, TransportError, TransportResult};
use axum::extract::{ConnectInfo, FromRequest, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared handler behind every route
pub type SharedHandler = Arc<dyn InboundHandler>;

/// Build the relay router
pub fn router(handler: SharedHandler) -> Router {
    Router::new()
        .route(HANDLE_PATH, post(handle))
        .route("/health", get(health))
        .with_state(handler)
}

async fn handle(
    State(handler): State<SharedHandler>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    RelayBody(mut request): RelayBody,
) -> Result<Json<RelayReply>, Rejection> {
    request.reply_to = request.reply_to.map(|addr| reply_address(addr, remote));
    let reply = handler.on_receive(request).await?;
    Ok(Json(reply))
}

/// Address to answer a caller on
///
/// A caller that listens on all interfaces may only know a loopback name
/// for itself. When the call did not come over loopback, the connection's
/// source IP is the one that reaches it; the advertised port is kept.
#[must_use]
pub fn reply_address(reply_to: SocketAddr, remote: SocketAddr) -> SocketAddr {
    let claimed = reply_to.ip();
    if (claimed.is_loopback() || claimed.is_unspecified()) && !remote.ip().is_loopback() {
        SocketAddr::new(remote.ip(), reply_to.port())
    } else {
        reply_to
    }
}

/// JSON relay body whose decode errors are answered like malformed counters
struct RelayBody(RelayRequest);

impl<S: Send + Sync> FromRequest<S> for RelayBody {
    type Rejection = Rejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<RelayRequest>::from_request(req, state).await {
            Ok(Json(request)) => Ok(Self(request)),
            Err(rejection) => Err(Rejection::new("malformed_message", rejection.body_text())),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind.to_string(),
                message: self.message,
            },
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// Bound relay listener
#[derive(Debug)]
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl RelayServer {
    /// Bind the listening socket
    ///
    /// Binding happens before the endpoint is advertised so the advertised
    /// port is the one actually served. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::BindFailed` if the address is in use or not
    /// local.
    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;
        let local_addr = listener.local_addr()?;
        tracing::debug!("Relay server bound on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address the server is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve relay calls until `shutdown` resolves
    ///
    /// In-flight requests are allowed to finish before this returns.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if accepting connections fails.
    pub async fn serve<F>(self, handler: SharedHandler, shutdown: F) -> TransportResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Relay server listening on {}", self.local_addr);
        let app = router(handler).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("Relay server on {} stopped", self.local_addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpTransport;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use proptest::prelude::*;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Echoes the message back, rejects anything without a `#`
    struct EchoHandler;

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn on_receive(&self, request: RelayRequest) -> Result<RelayReply, Rejection> {
            if !request.message.contains('#') {
                return Err(Rejection::new("malformed_message", "missing counter"));
            }
            Ok(RelayReply {
                reply: request.message,
            })
        }
    }

    /// Reports the reply address the handler was given
    struct ReplyToHandler;

    #[async_trait]
    impl InboundHandler for ReplyToHandler {
        async fn on_receive(&self, request: RelayRequest) -> Result<RelayReply, Rejection> {
            Ok(RelayReply {
                reply: request
                    .reply_to
                    .map_or_else(|| "none".to_string(), |addr| addr.to_string()),
            })
        }
    }

    fn test_app(handler: SharedHandler, remote: &str) -> Router {
        router(handler).layer(MockConnectInfo(remote.parse::<SocketAddr>().unwrap()))
    }

    async fn error_body(resp: Response) -> ErrorBody {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::post(HANDLE_PATH)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_handle_dispatches_to_handler() {
        let app = test_app(Arc::new(EchoHandler), "127.0.0.1:40000");

        let resp = app
            .oneshot(post_json(r#"{"message": "message #3"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let reply: RelayReply = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply.reply, "message #3");
    }

    #[tokio::test]
    async fn test_rejection_maps_to_bad_request() {
        let app = test_app(Arc::new(EchoHandler), "127.0.0.1:40000");

        let resp = app
            .oneshot(post_json(r#"{"message": "hello"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let error = error_body(resp).await;
        assert_eq!(error.error.kind, "malformed_message");
        assert_eq!(error.error.message, "missing counter");
    }

    #[tokio::test]
    async fn test_undecodable_body_is_malformed_message() {
        for body in [r#"{"msg": "x"}"#, r#"{"message": 5}"#, "not json"] {
            let resp = test_app(Arc::new(EchoHandler), "127.0.0.1:40000")
                .oneshot(post_json(body))
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {body:?}");
            assert_eq!(error_body(resp).await.error.kind, "malformed_message");
        }
    }

    #[tokio::test]
    async fn test_loopback_reply_to_uses_caller_ip() {
        let body = r#"{"message": "message #1", "reply_to": "127.0.1.1:8000"}"#;

        let resp = test_app(Arc::new(ReplyToHandler), "192.168.1.20:51234")
            .oneshot(post_json(body))
            .await
            .unwrap();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let reply: RelayReply = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply.reply, "192.168.1.20:8000");
    }

    #[test]
    fn test_reply_address() {
        let remote: SocketAddr = "192.168.1.20:51234".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:51234".parse().unwrap();

        // Routable claims are trusted as given
        let routable: SocketAddr = "192.168.1.30:8000".parse().unwrap();
        assert_eq!(reply_address(routable, remote), routable);

        // Loopback and unspecified claims are never kept for a remote caller
        for claim in ["127.0.0.1:8000", "127.0.1.1:8000", "0.0.0.0:8000"] {
            let fixed = reply_address(claim.parse().unwrap(), remote);
            assert!(!fixed.ip().is_loopback());
            assert_eq!(fixed, "192.168.1.20:8000".parse().unwrap());
        }

        // Same-host calls keep the loopback address
        let looped: SocketAddr = "127.0.0.1:8000".parse().unwrap();
        assert_eq!(reply_address(looped, local), looped);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = test_app(Arc::new(EchoHandler), "127.0.0.1:40000");

        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_http_transport_against_server() {
        let server = RelayServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr();
        assert_ne!(addr.port(), 0);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve(Arc::new(EchoHandler), async {
            let _ = stop_rx.await;
        }));

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let reply = transport
            .send(addr, &RelayRequest::new("message #9"))
            .await
            .unwrap();
        assert_eq!(reply.reply, "message #9");

        let err = transport
            .send(addr, &RelayRequest::new("no counter"))
            .await
            .unwrap_err();
        match err {
            TransportError::Rejected { peer, reason } => {
                assert_eq!(peer, addr);
                assert_eq!(reason, "missing counter");
            }
            other => panic!("unexpected error: {other}"),
        }

        stop_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = RelayServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let err = RelayServer::bind(first.local_addr()).await.unwrap_err();
        assert!(matches!(err, TransportError::BindFailed(_)));
    }

    proptest! {
        /// A call from another host is never answered on a loopback address
        #[test]
        fn prop_remote_caller_never_gets_loopback(
            claimed in prop_oneof![
                Just(std::net::Ipv4Addr::UNSPECIFIED),
                any::<[u8; 3]>().prop_map(|[a, b, c]| std::net::Ipv4Addr::new(127, a, b, c)),
                any::<[u8; 4]>().prop_map(std::net::Ipv4Addr::from),
            ],
            remote in any::<[u8; 4]>()
                .prop_map(std::net::Ipv4Addr::from)
                .prop_filter("remote caller", |ip| !ip.is_loopback() && !ip.is_unspecified()),
            port in 1u16..=u16::MAX,
            remote_port in 1u16..=u16::MAX,
        ) {
            let reply_to = SocketAddr::from((claimed, port));
            let fixed = reply_address(reply_to, SocketAddr::from((remote, remote_port)));
            prop_assert!(!fixed.ip().is_loopback());
            prop_assert!(!fixed.ip().is_unspecified());
            prop_assert_eq!(fixed.port(), port);
        }
    }
}
