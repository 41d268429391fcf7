//! Handler-dispatch side of the correlation engine.
//!
//! A [`Server`] consumes inbound request envelopes, dispatches them to
//! handlers registered per message type, and tracks response-requiring
//! requests in its own [`RequestPool`] until the handler explicitly answers
//! through [`response`](Server::response).
//!
//! # Pool asymmetry
//!
//! The server's pool entries deliberately carry **no** resolution callback;
//! the handler lives in the dispatch table instead. A server pool entry is
//! purely a liveness marker: its presence proves a later `response` call
//! still answers a live, unexpired request, and its absence turns a
//! double-reply or a reply-after-expiry into
//! [`CallError::NoRequestInPool`]. Do not unify this with the client's
//! callback-carrying pool use; the semantics differ on purpose.

use crate::config::CallConfig;
use crate::error::CallError;
use crate::keyset::DistributedKeySet;
use crate::message::{Body, Message, MessageType, RawMessage};
use crate::pool::{CallbackFuture, ExpirationCallback, PendingRequest, RequestPool};
use crate::registry::BodyDecoder;
use crate::transport::Transport;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Handler invoked with a decoded inbound request message.
pub type RequestCallback = Arc<dyn Fn(Message) -> CallbackFuture + Send + Sync>;

/// One dispatch-table entry: the handler plus an optional body provider.
#[derive(Clone)]
struct Registration {
    handler: RequestCallback,
    decoder: Option<BodyDecoder>,
}

/// Dispatches inbound requests and tracks those awaiting an explicit reply.
pub struct Server {
    transport: Arc<dyn Transport>,
    pool: RequestPool,
    handlers: RwLock<HashMap<MessageType, Registration>>,
    key_set: Option<Arc<DistributedKeySet>>,
}

impl Server {
    /// Start building a server on top of `transport`.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> ServerBuilder {
        ServerBuilder {
            transport,
            config: CallConfig::default(),
            key_set: None,
            expiration: None,
        }
    }

    /// Register the handler for a message type; the last registration for a
    /// given type wins. `decoder` optionally turns the untyped body into a
    /// concrete shape before the handler sees it (see
    /// [`body_decoder`](crate::registry::body_decoder)).
    pub fn register_type(
        &self,
        message_type: MessageType,
        handler: RequestCallback,
        decoder: Option<BodyDecoder>,
    ) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message_type, Registration { handler, decoder });
    }

    /// Consume an inbound request envelope from the transport binding.
    ///
    /// Unregistered message types are silently skipped: they are not
    /// malformed, merely uninteresting to this server instance. Under
    /// cluster support, requests for unowned keys are likewise silently
    /// ignored. When the request requires a response, a pending entry (with
    /// no callback) is queued before the handler runs; the handler must
    /// eventually call [`response`](Server::response) to release it, or the
    /// TTL sweep will.
    ///
    /// # Errors
    ///
    /// - [`CallError::Envelope`] on undecodable bytes.
    /// - [`CallError::MissingRequestId`] / [`CallError::MissingKey`].
    /// - [`CallError::InvalidBody`] when the registration's provider rejects
    ///   the body.
    /// - [`CallError::Handler`] when the handler itself fails.
    pub async fn request_handler(&self, raw: &[u8]) -> Result<(), CallError> {
        let envelope = RawMessage::decode(raw)?;
        envelope.validate()?;

        if let Some(key_set) = &self.key_set {
            if !key_set.check(&envelope.key) {
                tracing::debug!(
                    request_id = %envelope.request_id,
                    key = %envelope.key,
                    "request for unowned key ignored"
                );
                return Ok(());
            }
        }

        let registration = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&envelope.message_type)
            .cloned();
        let Some(registration) = registration else {
            tracing::debug!(
                message_type = envelope.message_type,
                request_id = %envelope.request_id,
                "no handler registered; skipping"
            );
            return Ok(());
        };

        let message = match &registration.decoder {
            Some(decode) => {
                let typed = decode(&envelope.body)?;
                let mut message = envelope.into_message();
                message.body = Body::Typed(typed);
                message
            }
            None => envelope.into_message(),
        };

        if message.response_required {
            self.pool.queue(PendingRequest::new(message.clone(), None));
        }

        metrics::counter!("reqbus_requests_dispatched_total").increment(1);
        tracing::debug!(
            request_id = %message.request_id,
            key = %message.key,
            message_type = message.message_type,
            response_required = message.response_required,
            "dispatching request"
        );

        (registration.handler)(message).await.map_err(CallError::Handler)
    }

    /// Send an explicit reply for a tracked request.
    ///
    /// The matching pending entry must still be present; this guards
    /// against double-replies and against replying after the request
    /// expired.
    ///
    /// # Errors
    ///
    /// - [`CallError::MissingRequestId`] / [`CallError::MissingKey`].
    /// - [`CallError::NoRequestInPool`] when the request is unknown,
    ///   already answered or already expired.
    /// - [`CallError::Transport`] when the send fails.
    pub async fn response(&self, msg: Message) -> Result<(), CallError> {
        msg.validate()?;

        if self.pool.try_dequeue(&msg.request_id).is_none() {
            metrics::counter!("reqbus_no_request_in_pool_total").increment(1);
            return Err(CallError::NoRequestInPool {
                request_id: msg.request_id,
                key: msg.key,
            });
        }

        let payload = msg.encode()?;
        self.transport.send(&msg.key, payload).await.map_err(|e| {
            metrics::counter!("reqbus_transport_send_errors_total").increment(1);
            CallError::from(e)
        })?;

        metrics::counter!("reqbus_responses_sent_total").increment(1);
        tracing::debug!(request_id = %msg.request_id, key = %msg.key, "response sent");
        Ok(())
    }

    /// Install or replace the expiration callback on the server's pool.
    pub fn set_expiration_callback(&self, callback: ExpirationCallback) {
        self.pool.set_expiration_callback(callback);
    }

    /// Start the pool's expiration sweep.
    pub fn start(&self) {
        self.pool.start();
    }

    /// Stop the sweep and silently discard all tracked requests.
    pub fn close(&self) {
        self.pool.stop();
    }

    /// Number of requests currently awaiting an explicit reply.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pool.len()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("pending", &self.pool.len())
            .field(
                "registered_types",
                &self
                    .handlers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len(),
            )
            .field("cluster", &self.key_set.is_some())
            .finish()
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    transport: Arc<dyn Transport>,
    config: CallConfig,
    key_set: Option<Arc<DistributedKeySet>>,
    expiration: Option<ExpirationCallback>,
}

impl ServerBuilder {
    /// Apply a whole configuration at once.
    #[must_use]
    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the TTL for tracked (unanswered) requests.
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Enable cluster support, filtering inbound requests by the keys this
    /// replica owns.
    #[must_use]
    pub fn cluster(mut self, key_set: Arc<DistributedKeySet>) -> Self {
        self.config.cluster_support = true;
        self.key_set = Some(key_set);
        self
    }

    /// Install the expiration callback at build time.
    #[must_use]
    pub fn expiration_callback(mut self, callback: ExpirationCallback) -> Self {
        self.expiration = Some(callback);
        self
    }

    /// Build the server. The sweep is not started implicitly; call
    /// [`Server::start`].
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Config`] when `cluster_support` is set without a
    /// key set.
    pub fn build(self) -> Result<Server, CallError> {
        if self.config.cluster_support && self.key_set.is_none() {
            return Err(CallError::Config(
                "cluster support enabled but no key set provided".to_string(),
            ));
        }

        let pool = RequestPool::new("server", self.config.call_timeout);
        if let Some(callback) = self.expiration {
            pool.set_expiration_callback(callback);
        }

        Ok(Server {
            transport: self.transport,
            pool,
            handlers: RwLock::new(HashMap::new()),
            key_set: if self.config.cluster_support {
                self.key_set
            } else {
                None
            },
        })
    }
}
