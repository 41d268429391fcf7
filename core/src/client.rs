//! Call-issuing side of the correlation engine.
//!
//! A [`Client`] turns the bus's fire-and-forget sends into synchronous-call
//! semantics: [`call`](Client::call) registers a pending entry in the
//! client's own [`RequestPool`] and hands the encoded envelope to the
//! transport; [`response_handler`](Client::response_handler), registered
//! with the transport binding as its consumption callback, dequeues the
//! matching entry when the reply arrives and invokes the caller-supplied
//! resolution callback. If no reply arrives within the configured call
//! timeout, the pool's sweep fires the expiration callback instead.
//!
//! # Ordering
//!
//! `call` queues the pending entry **before** submitting to the transport.
//! This ordering is load-bearing: a reply that arrives arbitrarily fast must
//! always find its pending entry. The symmetric consequence is that a failed
//! send leaves its entry behind; the TTL sweep reclaims it and fires the
//! expiration callback as if the peer never replied.

use crate::config::CallConfig;
use crate::error::CallError;
use crate::keyset::DistributedKeySet;
use crate::message::{Body, Message, MessageType, RawMessage};
use crate::pool::{ExpirationCallback, PendingRequest, RequestPool, ResponseCallback};
use crate::registry::BodyTypeRegistry;
use crate::transport::Transport;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Issues calls over the transport and resolves them on response arrival.
pub struct Client {
    transport: Arc<dyn Transport>,
    pool: RequestPool,
    registry: BodyTypeRegistry,
    key_set: Option<Arc<DistributedKeySet>>,
}

impl Client {
    /// Start building a client on top of `transport`.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder {
            transport,
            config: CallConfig::default(),
            key_set: None,
            expiration: None,
        }
    }

    /// Issue a call.
    ///
    /// When `msg.response_required` is set, `callback` must be provided; it
    /// fires exactly once with (original request, resolved response) when
    /// the matching reply arrives. When it is not set, the message is pure
    /// fire-and-forget and `callback` is ignored.
    ///
    /// # Errors
    ///
    /// - [`CallError::MissingRequestId`] / [`CallError::MissingKey`] on an
    ///   invalid envelope.
    /// - [`CallError::MissingCallback`] when a response is required but no
    ///   callback was given.
    /// - [`CallError::Transport`] when the send fails. The pending entry is
    ///   deliberately **not** rolled back in this case; the TTL sweep
    ///   reclaims it and fires the expiration callback.
    pub async fn call(
        &self,
        msg: Message,
        callback: Option<ResponseCallback>,
    ) -> Result<(), CallError> {
        msg.validate()?;

        if msg.response_required {
            let Some(callback) = callback else {
                return Err(CallError::MissingCallback);
            };
            self.pool
                .queue(PendingRequest::new(msg.clone(), Some(callback)));
        }

        metrics::counter!("reqbus_calls_total").increment(1);
        tracing::debug!(
            request_id = %msg.request_id,
            key = %msg.key,
            message_type = msg.message_type,
            response_required = msg.response_required,
            "issuing call"
        );

        let payload = msg.encode()?;
        self.transport.send(&msg.key, payload).await.map_err(|e| {
            metrics::counter!("reqbus_transport_send_errors_total").increment(1);
            tracing::warn!(
                request_id = %msg.request_id,
                key = %msg.key,
                error = %e,
                "call send failed; pending entry left for the sweep"
            );
            CallError::from(e)
        })
    }

    /// Consume an inbound response envelope from the transport binding.
    ///
    /// Decodes the wire envelope, validates it, applies the cluster filter
    /// when enabled (an unowned key is silently ignored), dequeues the
    /// matching pending entry and invokes its resolution callback with the
    /// original request and the (typed, when a provider is registered)
    /// response.
    ///
    /// # Errors
    ///
    /// - [`CallError::Envelope`] on undecodable bytes.
    /// - [`CallError::MissingRequestId`] / [`CallError::MissingKey`].
    /// - [`CallError::NoRequestInPool`] when no pending entry matches
    ///   (late, duplicate or unsolicited response).
    /// - [`CallError::InvalidBody`] when a registered provider rejects the
    ///   body. The pending entry is already consumed at that point.
    /// - [`CallError::Handler`] when the resolution callback fails.
    pub async fn response_handler(&self, raw: &[u8]) -> Result<(), CallError> {
        let envelope = RawMessage::decode(raw)?;
        envelope.validate()?;

        if let Some(key_set) = &self.key_set {
            if !key_set.check(&envelope.key) {
                tracing::debug!(
                    request_id = %envelope.request_id,
                    key = %envelope.key,
                    "response for unowned key ignored"
                );
                return Ok(());
            }
        }

        let Some(pending) = self.pool.try_dequeue(&envelope.request_id) else {
            metrics::counter!("reqbus_no_request_in_pool_total").increment(1);
            return Err(CallError::NoRequestInPool {
                request_id: envelope.request_id,
                key: envelope.key,
            });
        };

        metrics::counter!("reqbus_calls_resolved_total").increment(1);
        metrics::histogram!("reqbus_call_resolution_duration_seconds")
            .record(pending.age().as_secs_f64());

        let response = self.decode_body(envelope)?;
        tracing::debug!(
            request_id = %response.request_id,
            key = %response.key,
            typed = response.body.is_typed(),
            "call resolved"
        );

        let (request, callback) = pending.into_parts();
        if let Some(callback) = callback {
            callback(request, response).await.map_err(CallError::Handler)?;
        }
        Ok(())
    }

    /// Register a body type provider: responses tagged `message_type` are
    /// decoded into `T` before the resolution callback sees them.
    pub fn register_body_type<T>(&self, message_type: MessageType)
    where
        T: DeserializeOwned + Send + Sync + fmt::Debug + 'static,
    {
        self.registry.register::<T>(message_type);
    }

    /// Install or replace the expiration callback on the client's pool.
    pub fn set_expiration_callback(&self, callback: ExpirationCallback) {
        self.pool.set_expiration_callback(callback);
    }

    /// Start the pool's expiration sweep.
    pub fn start(&self) {
        self.pool.start();
    }

    /// Stop the sweep and silently discard all pending calls.
    pub fn close(&self) {
        self.pool.stop();
    }

    /// Number of calls currently awaiting a response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pool.len()
    }

    fn decode_body(&self, envelope: RawMessage) -> Result<Message, CallError> {
        match self.registry.decode(envelope.message_type, &envelope.body)? {
            Some(typed) => {
                let mut message = envelope.into_message();
                message.body = Body::Typed(typed);
                Ok(message)
            }
            None => Ok(envelope.into_message()),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pending", &self.pool.len())
            .field("cluster", &self.key_set.is_some())
            .finish()
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    config: CallConfig,
    key_set: Option<Arc<DistributedKeySet>>,
    expiration: Option<ExpirationCallback>,
}

impl ClientBuilder {
    /// Apply a whole configuration at once.
    #[must_use]
    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the TTL for pending calls.
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Enable cluster support, filtering inbound responses by the keys this
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

    /// Build the client. The sweep is not started implicitly; call
    /// [`Client::start`].
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Config`] when `cluster_support` is set without a
    /// key set.
    pub fn build(self) -> Result<Client, CallError> {
        if self.config.cluster_support && self.key_set.is_none() {
            return Err(CallError::Config(
                "cluster support enabled but no key set provided".to_string(),
            ));
        }

        let pool = RequestPool::new("client", self.config.call_timeout);
        if let Some(callback) = self.expiration {
            pool.set_expiration_callback(callback);
        }

        Ok(Client {
            transport: self.transport,
            pool,
            registry: BodyTypeRegistry::new(),
            key_set: if self.config.cluster_support {
                self.key_set
            } else {
                None
            },
        })
    }
}
