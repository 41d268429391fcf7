//! # Reqbus Core
//!
//! Request/response correlation over an asynchronous, fire-and-forget
//! message bus.
//!
//! The bus underneath (Kafka-compatible in production, in-memory in tests)
//! offers publish/consume and nothing else: no request/reply pairing, no
//! timeouts, no reply routing, no ordering across partitions. This crate
//! layers synchronous-call semantics on top by running a miniature protocol
//! state machine per call:
//!
//! ```text
//!            ┌──────────┐
//!   queue    │ PENDING  │
//!  ─────────►│          │
//!            └────┬─────┘
//!       matching  │   TTL sweep
//!       response  │
//!        ┌────────┴────────┐
//!        ▼                 ▼
//!  ┌──────────┐      ┌──────────┐
//!  │ RESOLVED │      │ EXPIRED  │
//!  └──────────┘      └──────────┘
//! ```
//!
//! Exactly one of the two transitions happens per call: the resolution
//! dequeue and the expiry sweep contend on the same exclusive lock, so a
//! late response racing a timeout can never double-fire.
//!
//! ## Components
//!
//! - [`message`]: the wire envelope ([`Message`], [`RawMessage`]) and its
//!   JSON codec.
//! - [`registry`]: message-type tag to typed body decoder; unregistered
//!   tags pass through untyped.
//! - [`keyset`]: per-replica ownership filter for multi-replica
//!   deployments consuming the same partitions.
//! - [`pool`]: TTL-bounded in-flight request tracking with a periodic
//!   expiration sweep.
//! - [`client`]: issues calls and resolves them on response arrival.
//! - [`server`]: dispatches inbound requests to registered handlers and
//!   tracks response-requiring ones until explicitly answered.
//! - [`transport`]: the minimum contract a bus binding implements.
//!
//! ## Example
//!
//! ```ignore
//! use reqbus_core::{Client, Message, ResponseCallback};
//! use std::sync::Arc;
//!
//! let client = Client::builder(transport)
//!     .call_timeout(std::time::Duration::from_secs(5))
//!     .build()?;
//! client.start();
//!
//! let msg = Message::new(ORDER_STATUS, "order-42", &query)?.require_response();
//! let on_reply: ResponseCallback = Arc::new(|request, response| {
//!     Box::pin(async move {
//!         // exactly once, with the original request and the reply
//!         Ok(())
//!     })
//! });
//! client.call(msg, Some(on_reply)).await?;
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Call-issuing client
pub mod client;

/// Client/server configuration surface
pub mod config;

/// Error kinds returned by the engine
pub mod error;

/// Per-replica business key ownership filter
pub mod keyset;

/// Envelope model and wire codec
pub mod message;

/// In-flight request tracking with TTL expiry
pub mod pool;

/// Message-type tag to typed body decoder mapping
pub mod registry;

/// Handler dispatch and explicit-reply tracking
pub mod server;

/// Transport boundary contract
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use config::{CallConfig, DEFAULT_CALL_TIMEOUT};
pub use error::CallError;
pub use keyset::DistributedKeySet;
pub use message::{Body, Message, MessageBody, MessageType, RawMessage};
pub use pool::{
    CallbackFuture, ExpirationCallback, PendingRequest, RequestPool, ResponseCallback,
    SWEEP_INTERVAL,
};
pub use registry::{BodyDecoder, BodyTypeRegistry, body_decoder};
pub use server::{RequestCallback, Server, ServerBuilder};
pub use transport::{SendFuture, Transport, TransportError};
