//! Error types for the correlation engine.
//!
//! Every error here is returned synchronously to the immediate caller of
//! [`Client::call`](crate::client::Client::call),
//! [`Client::response_handler`](crate::client::Client::response_handler),
//! [`Server::request_handler`](crate::server::Server::request_handler) or
//! [`Server::response`](crate::server::Server::response). Nothing is retried
//! internally. The two documented silent-skip cases (an unregistered message
//! type on the server, an unowned key under cluster support) return `Ok(())`
//! instead of an error.

use crate::transport::TransportError;
use thiserror::Error;

/// Errors produced by the call/response correlation engine.
#[derive(Error, Debug)]
pub enum CallError {
    /// A message entered the subsystem with an empty key.
    #[error("message key is empty")]
    MissingKey,

    /// A message entered the subsystem with an empty request id.
    #[error("message request id is empty")]
    MissingRequestId,

    /// A call with `response_required` was issued without a callback.
    #[error("message requires a response but no callback was provided")]
    MissingCallback,

    /// A response, late ack or duplicate reply referenced a request id that
    /// is unknown, already resolved or already expired.
    #[error("no pending request for id '{request_id}' (key '{key}')")]
    NoRequestInPool {
        /// The request id carried by the offending message.
        request_id: String,
        /// The business key carried by the offending message.
        key: String,
    },

    /// A registered body type provider rejected the untyped body.
    #[error("failed to decode body for message type {message_type}: {reason}")]
    InvalidBody {
        /// The message type tag whose provider failed.
        message_type: u32,
        /// The underlying decode failure.
        reason: String,
    },

    /// The wire envelope could not be encoded or decoded.
    #[error("envelope codec error: {0}")]
    Envelope(String),

    /// The transport rejected an outbound message.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A user-supplied handler or resolution callback failed.
    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    /// A builder was given an inconsistent configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CallError {
    /// Wrap a user-supplied handler error.
    pub fn handler(err: impl Into<anyhow::Error>) -> Self {
        Self::Handler(err.into())
    }

    /// True when the error is [`CallError::NoRequestInPool`].
    ///
    /// Transport bindings commonly treat this as a benign late/duplicate
    /// delivery and log it rather than surfacing it.
    #[must_use]
    pub const fn is_no_request_in_pool(&self) -> bool {
        matches!(self, Self::NoRequestInPool { .. })
    }
}
