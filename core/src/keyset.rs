//! Per-replica ownership filter for business keys.
//!
//! A single logical service deployed as multiple replicas consumes the same
//! bus partitions. The [`DistributedKeySet`] holds the business keys this
//! process replica currently owns; inbound messages whose key is not in the
//! set are silently ignored by the client and server.
//!
//! Pure set semantics, no persistence, no cross-process synchronization:
//! an external ownership/leadership protocol is responsible for keeping the
//! set consistent with actual ownership via [`set`](DistributedKeySet::set)
//! and [`remove`](DistributedKeySet::remove). The set is explicitly
//! constructed and passed as an `Arc` to the client and server builders;
//! there is no ambient global instance.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// Set of business keys owned by this process replica.
#[derive(Debug, Default)]
pub struct DistributedKeySet {
    keys: RwLock<HashSet<String>>,
}

impl DistributedKeySet {
    /// Create an empty key set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key as owned by this replica.
    pub fn set(&self, key: impl Into<String>) {
        let key = key.into();
        tracing::debug!(key = %key, "key ownership acquired");
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }

    /// Release ownership of a key.
    pub fn remove(&self, key: &str) {
        tracing::debug!(key = %key, "key ownership released");
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// True when this replica currently owns `key`.
    #[must_use]
    pub fn check(&self, key: &str) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Number of owned keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when this replica owns no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
