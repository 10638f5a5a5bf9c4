//! HTTP client transport.

use crate::protocol::{ErrorBody, HANDLE_PATH, RelayReply, RelayRequest};
use crate::transport::{Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Sends relay calls as JSON `POST /handle` requests
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    requests_sent: AtomicU64,
    replies_received: AtomicU64,
    send_errors: AtomicU64,
}

impl HttpTransport {
    /// Create a transport whose calls give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidConfig` if the HTTP client cannot be
    /// built.
    pub fn new(timeout: Duration) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            requests_sent: AtomicU64::new(0),
            replies_received: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        })
    }

    /// URL of a peer's relay endpoint
    #[must_use]
    pub fn endpoint_url(peer: SocketAddr) -> String {
        format!("http://{peer}{HANDLE_PATH}")
    }

    async fn post(&self, peer: SocketAddr, request: &RelayRequest) -> TransportResult<RelayReply> {
        let response = self
            .client
            .post(Self::endpoint_url(peer))
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable {
                peer,
                reason: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => {
                response
                    .json::<RelayReply>()
                    .await
                    .map_err(|e| TransportError::InvalidReply {
                        peer,
                        reason: e.to_string(),
                    })
            }
            StatusCode::BAD_REQUEST => {
                let reason = match response.json::<ErrorBody>().await {
                    Ok(body) => body.error.message,
                    Err(_) => "bad request".to_string(),
                };
                Err(TransportError::Rejected { peer, reason })
            }
            status => Err(TransportError::Status {
                peer,
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, peer: SocketAddr, request: &RelayRequest) -> TransportResult<RelayReply> {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        let result = self.post(peer, request).await;
        match &result {
            Ok(_) => self.replies_received.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.send_errors.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            replies_received: self.replies_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}
