//! Body type registry: message type tag to typed decode function.
//!
//! Inbound bodies arrive as untyped [`serde_json::Value`]s. Registering a
//! provider for a message type makes the engine re-decode that type's bodies
//! into a concrete shape before handing them to callbacks. Absence of a
//! registration is the defined pass-through-untyped branch, not an error.
//!
//! Registration happens at application startup; lookups happen on every
//! inbound message, so the map sits behind a read/write lock.

use crate::error::CallError;
use crate::message::{MessageBody, MessageType};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Decode function turning an untyped body into a concrete shape.
pub type BodyDecoder =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn MessageBody>, CallError> + Send + Sync>;

/// Build a [`BodyDecoder`] for `T`, tagged with the message type it serves
/// so decode failures carry the tag.
pub fn body_decoder<T>(message_type: MessageType) -> BodyDecoder
where
    T: DeserializeOwned + Send + Sync + fmt::Debug + 'static,
{
    Arc::new(move |value| {
        let body: T =
            serde_json::from_value(value.clone()).map_err(|e| CallError::InvalidBody {
                message_type,
                reason: e.to_string(),
            })?;
        Ok(Arc::new(body) as Arc<dyn MessageBody>)
    })
}

/// Mapping from message type to typed decode function.
#[derive(Default)]
pub struct BodyTypeRegistry {
    decoders: RwLock<HashMap<MessageType, BodyDecoder>>,
}

impl BodyTypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider decoding bodies of `message_type` into `T`.
    ///
    /// A later registration for the same type replaces the earlier one.
    pub fn register<T>(&self, message_type: MessageType)
    where
        T: DeserializeOwned + Send + Sync + fmt::Debug + 'static,
    {
        self.decoders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message_type, body_decoder::<T>(message_type));
    }

    /// Run the registered provider for `message_type`, if any.
    ///
    /// Returns `Ok(None)` when no provider is registered (the caller keeps
    /// the untyped body).
    ///
    /// # Errors
    ///
    /// Returns [`CallError::InvalidBody`] when a registered provider rejects
    /// the body.
    pub fn decode(
        &self,
        message_type: MessageType,
        body: &serde_json::Value,
    ) -> Result<Option<Arc<dyn MessageBody>>, CallError> {
        let decoder = self
            .decoders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message_type)
            .cloned();
        match decoder {
            Some(decode) => decode(body).map(Some),
            None => Ok(None),
        }
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decoders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when no provider is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for BodyTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyTypeRegistry")
            .field("registered", &self.len())
            .finish()
    }
}
