//! Transport boundary for the correlation engine.
//!
//! The engine rides on an external asynchronous message bus that offers no
//! correlation, timeout or reply routing of its own. Only the minimum
//! required shape is specified here:
//!
//! - Outbound: [`Transport::send`] hands an encoded envelope to the bus,
//!   keyed by the message's business key (the key doubles as the partition
//!   routing key on partitioned buses).
//! - Inbound: the engine exposes two plain byte-consuming entry points,
//!   [`Server::request_handler`](crate::server::Server::request_handler) and
//!   [`Client::response_handler`](crate::client::Client::response_handler),
//!   that a transport binding registers as its consumption callback.
//!
//! Concrete bindings live outside this crate (`reqbus-redpanda` for
//! Kafka-compatible buses, `reqbus-testing` for in-process loopback).
//!
//! # Dyn Compatibility
//!
//! [`Transport`] uses an explicit `Pin<Box<dyn Future>>` return instead of
//! `async fn` so it can be used as a trait object (`Arc<dyn Transport>`)
//! shared between a client, a server and the transport binding itself.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by a transport binding.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The binding could not reach the bus at all.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The bus rejected or dropped an outbound message.
    #[error("send failed for key '{key}': {reason}")]
    SendFailed {
        /// Routing key of the rejected message.
        key: String,
        /// Binding-specific failure description.
        reason: String,
    },

    /// The binding has been shut down and accepts no further sends.
    #[error("transport is closed")]
    Closed,
}

/// Boxed future returned by [`Transport::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Outbound half of the transport contract.
///
/// Implementations must be `Send + Sync`; a single transport instance is
/// shared by every concurrent caller. Sends are fire-and-forget from the
/// engine's point of view: a successful return means the bus accepted the
/// message, not that any peer consumed it.
pub trait Transport: Send + Sync {
    /// Submit an encoded envelope to the bus under the given routing key.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendFailed`] when the bus rejects the
    /// message, [`TransportError::Closed`] after shutdown.
    fn send(&self, key: &str, payload: Vec<u8>) -> SendFuture<'_>;
}
