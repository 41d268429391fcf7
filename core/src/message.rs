//! Request/response envelope and its wire codec.
//!
//! A [`Message`] is the unit the whole engine moves around: a numeric type
//! tag identifying the payload schema, a globally unique request id used for
//! correlation, a business key used for routing and replica-ownership
//! filtering, a response-required flag, and the payload body.
//!
//! # Body forms
//!
//! The body exists in two forms, captured by [`Body`]:
//!
//! - [`Body::Untyped`] holds a generic [`serde_json::Value`]. Outbound
//!   messages are constructed in this form (any `Serialize` payload is
//!   converted at construction time), and inbound messages start in this
//!   form straight off the wire.
//! - [`Body::Typed`] holds a concrete shape produced by a registered body
//!   type provider (see [`crate::registry`]). Absence of a registration for
//!   a message type is not an error; the body simply stays untyped.
//!
//! # Wire format
//!
//! The envelope is self-describing JSON, because the untyped decode branch
//! must be able to represent an arbitrary structured body:
//!
//! ```json
//! { "type": 7, "rqId": "…", "key": "…", "respReq": true, "body": { … } }
//! ```
//!
//! Time-valued body fields use RFC 3339 strings on the wire; registering a
//! body type with `chrono::DateTime<Utc>` fields gives the typed decode that
//! parsing for free via chrono's serde support.

use crate::error::CallError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Numeric tag identifying a payload schema.
pub type MessageType = u32;

/// Object-safe bound for concrete (typed) message bodies.
///
/// Blanket-implemented for every `Any + Send + Sync + Debug` type, so any
/// deserializable struct qualifies without ceremony.
pub trait MessageBody: Any + Send + Sync + fmt::Debug {
    /// Upcast for downcasting back to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl<T> MessageBody for T
where
    T: Any + Send + Sync + fmt::Debug,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Payload of a [`Message`]: either the generic decoded form or a concrete
/// shape produced by a registered body type provider.
#[derive(Debug, Clone)]
pub enum Body {
    /// Generic structured value, as decoded from (or encoded to) the wire.
    Untyped(serde_json::Value),
    /// Concrete shape produced by a registered provider on arrival.
    Typed(Arc<dyn MessageBody>),
}

impl Body {
    /// Borrow the typed body as `T`, when this body was decoded into `T` by
    /// a registered provider.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            Self::Typed(body) => body.as_any().downcast_ref::<T>(),
            Self::Untyped(_) => None,
        }
    }

    /// Borrow the untyped JSON value, when no provider has run.
    #[must_use]
    pub const fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Untyped(value) => Some(value),
            Self::Typed(_) => None,
        }
    }

    /// True when a registered provider produced a concrete shape.
    #[must_use]
    pub const fn is_typed(&self) -> bool {
        matches!(self, Self::Typed(_))
    }
}

/// The request/response envelope moved by clients, servers and pools.
#[derive(Debug, Clone)]
pub struct Message {
    /// Payload schema tag; drives handler dispatch and body type lookup.
    pub message_type: MessageType,
    /// Globally unique id correlating a response with its originating call.
    pub request_id: String,
    /// Business/routing key; also the replica-ownership filter key.
    pub key: String,
    /// Whether the caller expects exactly one matching reply.
    pub response_required: bool,
    /// The payload.
    pub body: Body,
}

impl Message {
    /// Build an outbound message with a freshly generated v4 uuid request
    /// id. The body is converted to its untyped wire form immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Envelope`] if the body cannot be represented as
    /// a JSON value.
    pub fn new<T: Serialize>(
        message_type: MessageType,
        key: impl Into<String>,
        body: &T,
    ) -> Result<Self, CallError> {
        Self::with_request_id(message_type, Uuid::new_v4().to_string(), key, body)
    }

    /// Build an outbound message with an explicit request id.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Envelope`] if the body cannot be represented as
    /// a JSON value.
    pub fn with_request_id<T: Serialize>(
        message_type: MessageType,
        request_id: impl Into<String>,
        key: impl Into<String>,
        body: &T,
    ) -> Result<Self, CallError> {
        let body = serde_json::to_value(body).map_err(|e| CallError::Envelope(e.to_string()))?;
        Ok(Self {
            message_type,
            request_id: request_id.into(),
            key: key.into(),
            response_required: false,
            body: Body::Untyped(body),
        })
    }

    /// Build a reply to `request`: same request id and key, response not
    /// required. The reply carries its own payload schema tag.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Envelope`] if the body cannot be represented as
    /// a JSON value.
    pub fn reply<T: Serialize>(
        request: &Self,
        message_type: MessageType,
        body: &T,
    ) -> Result<Self, CallError> {
        Self::with_request_id(
            message_type,
            request.request_id.clone(),
            request.key.clone(),
            body,
        )
    }

    /// Mark this message as expecting exactly one matching reply.
    #[must_use]
    pub const fn require_response(mut self) -> Self {
        self.response_required = true;
        self
    }

    /// Check the envelope invariant: request id and key are never empty for
    /// any message entering the subsystem.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::MissingRequestId`] or [`CallError::MissingKey`].
    pub fn validate(&self) -> Result<(), CallError> {
        if self.request_id.is_empty() {
            return Err(CallError::MissingRequestId);
        }
        if self.key.is_empty() {
            return Err(CallError::MissingKey);
        }
        Ok(())
    }

    /// Encode this message into its wire envelope.
    ///
    /// Only untyped bodies are encodable; a [`Body::Typed`] body only exists
    /// after inbound decode and is never sent back out as-is.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Envelope`] for a typed body or a JSON encoding
    /// failure.
    pub fn encode(&self) -> Result<Vec<u8>, CallError> {
        let Body::Untyped(body) = &self.body else {
            return Err(CallError::Envelope(
                "typed bodies cannot be re-encoded".to_string(),
            ));
        };
        let envelope = RawMessage {
            message_type: self.message_type,
            request_id: self.request_id.clone(),
            key: self.key.clone(),
            response_required: self.response_required,
            body: body.clone(),
        };
        serde_json::to_vec(&envelope).map_err(|e| CallError::Envelope(e.to_string()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ type: {}, rqId: {}, key: {}, respReq: {} }}",
            self.message_type, self.request_id, self.key, self.response_required
        )
    }
}

/// The envelope with the body still in its untyped decoded form.
///
/// This is what generic wire decode produces before any type-specific
/// provider is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Payload schema tag.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Correlation id.
    #[serde(rename = "rqId")]
    pub request_id: String,
    /// Business/routing key.
    pub key: String,
    /// Whether the sender expects exactly one matching reply.
    #[serde(rename = "respReq")]
    pub response_required: bool,
    /// Untyped structured payload.
    pub body: serde_json::Value,
}

impl RawMessage {
    /// Decode a wire envelope from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Envelope`] when the bytes are not a valid
    /// envelope.
    pub fn decode(raw: &[u8]) -> Result<Self, CallError> {
        serde_json::from_slice(raw).map_err(|e| CallError::Envelope(e.to_string()))
    }

    /// Check the envelope invariant, as [`Message::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`CallError::MissingRequestId`] or [`CallError::MissingKey`].
    pub fn validate(&self) -> Result<(), CallError> {
        if self.request_id.is_empty() {
            return Err(CallError::MissingRequestId);
        }
        if self.key.is_empty() {
            return Err(CallError::MissingKey);
        }
        Ok(())
    }

    /// Promote into a [`Message`], keeping the body untyped.
    #[must_use]
    pub fn into_message(self) -> Message {
        Message {
            message_type: self.message_type,
            request_id: self.request_id,
            key: self.key,
            response_required: self.response_required,
            body: Body::Untyped(self.body),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u64,
        note: String,
    }

    #[test]
    fn new_generates_nonempty_request_id() {
        let msg = Message::new(1, "k1", &Ping { seq: 1, note: "hi".into() }).unwrap();
        assert!(!msg.request_id.is_empty());
        assert!(msg.validate().is_ok());
        assert!(!msg.response_required);
    }

    #[test]
    fn encode_decode_preserves_envelope_fields() {
        let msg = Message::with_request_id(7, "r1", "k1", &Ping { seq: 9, note: "x".into() })
            .unwrap()
            .require_response();

        let bytes = msg.encode().unwrap();
        let raw = RawMessage::decode(&bytes).unwrap();

        assert_eq!(raw.message_type, 7);
        assert_eq!(raw.request_id, "r1");
        assert_eq!(raw.key, "k1");
        assert!(raw.response_required);
        assert_eq!(raw.body["seq"], 9);
        assert_eq!(raw.body["note"], "x");
    }

    #[test]
    fn wire_field_names_are_stable() {
        let msg = Message::with_request_id(1, "r1", "k1", &serde_json::json!({})).unwrap();
        let bytes = msg.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert!(value.get("type").is_some());
        assert!(value.get("rqId").is_some());
        assert!(value.get("key").is_some());
        assert!(value.get("respReq").is_some());
        assert!(value.get("body").is_some());
    }

    #[test]
    fn decode_garbage_is_an_envelope_error_not_a_panic() {
        let err = RawMessage::decode(b"not an envelope").unwrap_err();
        assert!(matches!(err, CallError::Envelope(_)));
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let mut msg = Message::with_request_id(1, "r1", "k1", &serde_json::json!({})).unwrap();
        msg.request_id.clear();
        assert!(matches!(msg.validate(), Err(CallError::MissingRequestId)));

        let mut msg = Message::with_request_id(1, "r1", "k1", &serde_json::json!({})).unwrap();
        msg.key.clear();
        assert!(matches!(msg.validate(), Err(CallError::MissingKey)));
    }

    #[test]
    fn reply_mirrors_id_and_key_and_drops_response_flag() {
        let request = Message::with_request_id(1, "r1", "k1", &serde_json::json!({}))
            .unwrap()
            .require_response();
        let reply = Message::reply(&request, 2, &Ping { seq: 1, note: "pong".into() }).unwrap();

        assert_eq!(reply.request_id, "r1");
        assert_eq!(reply.key, "k1");
        assert_eq!(reply.message_type, 2);
        assert!(!reply.response_required);
    }

    #[test]
    fn rfc3339_timestamps_round_trip_through_the_envelope() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Stamped {
            at: DateTime<Utc>,
        }

        let at = "2026-08-07T12:34:56Z".parse::<DateTime<Utc>>().unwrap();
        let msg = Message::with_request_id(3, "r1", "k1", &Stamped { at }).unwrap();
        let raw = RawMessage::decode(&msg.encode().unwrap()).unwrap();

        // The wire carries the fixed standard format.
        assert_eq!(raw.body["at"], "2026-08-07T12:34:56Z");

        let back: Stamped = serde_json::from_value(raw.body).unwrap();
        assert_eq!(back.at, at);
    }

    #[test]
    fn typed_body_downcasts() {
        let typed: Arc<dyn MessageBody> = Arc::new(Ping { seq: 4, note: "n".into() });
        let body = Body::Typed(typed);

        assert!(body.is_typed());
        assert_eq!(body.downcast_ref::<Ping>().map(|p| p.seq), Some(4));
        assert!(body.downcast_ref::<String>().is_none());
        assert!(body.as_value().is_none());
    }

    #[test]
    fn typed_body_cannot_be_encoded() {
        let mut msg = Message::with_request_id(1, "r1", "k1", &serde_json::json!({})).unwrap();
        msg.body = Body::Typed(Arc::new(Ping { seq: 0, note: String::new() }));
        assert!(matches!(msg.encode(), Err(CallError::Envelope(_))));
    }
}
