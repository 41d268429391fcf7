//! Configuration surface for clients and servers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default TTL for pending requests.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared configuration for a [`Client`](crate::client::Client) or
/// [`Server`](crate::server::Server).
///
/// `call_timeout` is the TTL applied to every pending request in the
/// instance's pool; `cluster_support` enables the
/// [`DistributedKeySet`](crate::keyset::DistributedKeySet) filter on inbound
/// messages. When `cluster_support` is set, the builder requires a key set
/// and fails to build without one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Maximum time a pending request is kept before being swept as expired.
    pub call_timeout: Duration,
    /// Filter inbound messages by locally owned business key.
    pub cluster_support: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            cluster_support: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CallConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert!(!config.cluster_support);
    }

    #[test]
    fn serde_round_trip() {
        let config = CallConfig {
            call_timeout: Duration::from_secs(5),
            cluster_support: true,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: CallConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.call_timeout, Duration::from_secs(5));
        assert!(back.cluster_support);
    }
}
