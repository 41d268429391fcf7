//! # Reqbus Testing
//!
//! Testing utilities for the reqbus correlation engine.
//!
//! The centerpiece is [`InMemoryTransport`], a loopback implementation of
//! the core [`Transport`] trait: sends are recorded for inspection and
//! optionally forwarded straight into an inbound byte handler, so a client
//! and a server can be wired together in-process with no bus at all.
//!
//! ## Example
//!
//! ```ignore
//! use reqbus_testing::InMemoryTransport;
//! use std::sync::Arc;
//!
//! let client_transport = Arc::new(InMemoryTransport::new());
//! let server_transport = Arc::new(InMemoryTransport::new());
//!
//! let client = Arc::new(Client::builder(client_transport.clone()).build()?);
//! let server = Arc::new(Server::builder(server_transport.clone()).build()?);
//!
//! // What the client sends arrives at the server, and vice versa.
//! let server_for_delivery = Arc::clone(&server);
//! client_transport.deliver_to(Arc::new(move |bytes| {
//!     let server = Arc::clone(&server_for_delivery);
//!     Box::pin(async move { server.request_handler(&bytes).await })
//! }));
//! let client_for_delivery = Arc::clone(&client);
//! server_transport.deliver_to(Arc::new(move |bytes| {
//!     let client = Arc::clone(&client_for_delivery);
//!     Box::pin(async move { client.response_handler(&bytes).await })
//! }));
//! ```

use reqbus_core::error::CallError;
use reqbus_core::transport::{SendFuture, Transport, TransportError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Inbound delivery function: receives a copy of every payload accepted by
/// the transport, typically one of the engine's byte-consuming entry points.
pub type DeliveryFn = Arc<
    dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), CallError>> + Send>> + Send + Sync,
>;

/// Loopback transport for tests.
///
/// Records every accepted `(key, payload)` pair and, when a delivery
/// function is wired, forwards the payload to it inline. Delivery errors do
/// not fail the send: the bus accepted the message, what the consumer made
/// of it is a separate concern. [`CallError::NoRequestInPool`] from the
/// delivery side is logged at debug (a late or duplicate reply is business
/// as usual on a real bus); other errors are logged at warn.
#[derive(Default)]
pub struct InMemoryTransport {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    delivery: Mutex<Option<DeliveryFn>>,
    fail_next: AtomicBool,
}

impl InMemoryTransport {
    /// Create an unwired transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every accepted payload to `delivery`.
    pub fn deliver_to(&self, delivery: DeliveryFn) {
        *self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delivery);
    }

    /// Make the next send fail with [`TransportError::SendFailed`].
    pub fn fail_next_send(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Snapshot of every accepted `(key, payload)` pair, in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of accepted sends.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, key: &str, payload: Vec<u8>) -> SendFuture<'_> {
        let key = key.to_string();
        Box::pin(async move {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(TransportError::SendFailed {
                    key,
                    reason: "injected send failure".to_string(),
                });
            }

            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((key, payload.clone()));

            let delivery = self
                .delivery
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(delivery) = delivery {
                match delivery(payload).await {
                    Ok(()) => {}
                    Err(error) if error.is_no_request_in_pool() => {
                        tracing::debug!(error = %error, "delivery found no pending request");
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "inbound delivery failed");
                    }
                }
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("sent", &self.sent_count())
            .finish()
    }
}

/// Install a compact tracing subscriber for test binaries. Safe to call
/// from every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn records_sends_in_order() {
        let transport = InMemoryTransport::new();
        transport.send("k1", vec![1]).await.unwrap();
        transport.send("k2", vec![2]).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], ("k1".to_string(), vec![1]));
        assert_eq!(sent[1], ("k2".to_string(), vec![2]));
    }

    #[tokio::test]
    async fn forwards_payloads_to_the_delivery_fn() {
        let transport = InMemoryTransport::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = Arc::clone(&delivered);
        transport.deliver_to(Arc::new(move |payload| {
            let delivered = Arc::clone(&delivered_clone);
            Box::pin(async move {
                assert_eq!(payload, vec![9]);
                delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));

        transport.send("k1", vec![9]).await.unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivery_errors_do_not_fail_the_send() {
        let transport = InMemoryTransport::new();
        transport.deliver_to(Arc::new(|_| {
            Box::pin(async {
                Err(CallError::NoRequestInPool {
                    request_id: "r1".to_string(),
                    key: "k1".to_string(),
                })
            })
        }));

        transport.send("k1", vec![1]).await.unwrap();
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn fail_next_send_fails_exactly_once() {
        let transport = InMemoryTransport::new();
        transport.fail_next_send();

        let err = transport.send("k1", vec![1]).await.unwrap_err();
        assert!(matches!(err, TransportError::SendFailed { .. }));
        assert_eq!(transport.sent_count(), 0);

        transport.send("k1", vec![1]).await.unwrap();
        assert_eq!(transport.sent_count(), 1);
    }
}
