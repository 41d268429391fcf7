//! In-flight request tracking with TTL-based expiration.
//!
//! A [`RequestPool`] holds every pending request keyed by its request id.
//! Each entry leaves the pool exactly once, through one of two mutually
//! exclusive paths:
//!
//! - **resolved**: a matching response dequeues it via
//!   [`try_dequeue`](RequestPool::try_dequeue), or
//! - **expired**: the periodic sweep collects it once its TTL has elapsed
//!   and fires the expiration callback.
//!
//! Both paths contend on the same exclusive lock over the same entry map,
//! which is the core correctness property of the whole engine: for any
//! request id at most one of {resolved, expired} ever happens.
//!
//! Expiration callbacks run on detached tasks after the lock is released, so
//! a slow or failing callback can never stall the sweep or block new calls.
//! Callback errors are logged and discarded; there is no synchronous caller
//! left to propagate them to.
//!
//! [`stop`](RequestPool::stop) is a silent-abandonment path: it cancels the
//! sweep and discards all pending entries without firing expiration
//! callbacks. Shutdown does not guarantee notification; callers must treat
//! it as distinct from TTL expiry.

use crate::message::Message;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Interval between expiration sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Future returned by user-supplied callbacks.
pub type CallbackFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// Callback resolving a pending call with (original request, response).
pub type ResponseCallback = Arc<dyn Fn(Message, Message) -> CallbackFuture + Send + Sync>;

/// Callback fired once per expired entry with the original request message.
pub type ExpirationCallback = Arc<dyn Fn(Message) -> CallbackFuture + Send + Sync>;

/// A tracked in-flight request.
///
/// Client pools attach the resolution callback to the entry. Server pools
/// queue entries with no callback at all: there the entry is purely a
/// liveness marker proving that a later
/// [`Server::response`](crate::server::Server::response) still has a live,
/// unexpired request to answer.
pub struct PendingRequest {
    enqueued_at: Instant,
    message: Message,
    callback: Option<ResponseCallback>,
}

impl PendingRequest {
    /// Track `message`, optionally carrying the callback that resolves it.
    #[must_use]
    pub fn new(message: Message, callback: Option<ResponseCallback>) -> Self {
        Self {
            enqueued_at: Instant::now(),
            message,
            callback,
        }
    }

    /// The original request message.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Time since the entry was queued.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Split into the original message and its resolution callback.
    #[must_use]
    pub fn into_parts(self) -> (Message, Option<ResponseCallback>) {
        (self.message, self.callback)
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("request_id", &self.message.request_id)
            .field("key", &self.message.key)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Pool of pending requests with a shared TTL, swept once per second.
pub struct RequestPool {
    name: &'static str,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, PendingRequest>>>,
    expiration: Arc<RwLock<Option<ExpirationCallback>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RequestPool {
    /// Create a pool whose entries expire after `ttl`.
    ///
    /// `name` labels this pool's log lines and metrics (a client and a
    /// server each own a separate instance).
    #[must_use]
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
            expiration: Arc::new(RwLock::new(None)),
            sweeper: Mutex::new(None),
        }
    }

    /// Insert a request under its request id, stamping the enqueue time.
    ///
    /// No uniqueness check is performed: a duplicate request id silently
    /// replaces the prior entry, orphaning whoever queued it (no callback,
    /// no expiration will fire for the replaced entry). With generated v4
    /// uuid request ids this is not a practical concern; callers minting
    /// their own ids must keep them unique while in flight.
    pub fn queue(&self, mut request: PendingRequest) {
        request.enqueued_at = Instant::now();
        let len = {
            let mut entries = self.lock_entries();
            entries.insert(request.message.request_id.clone(), request);
            entries.len()
        };
        self.record_depth(len);
    }

    /// Atomically find and remove the entry for `request_id`.
    ///
    /// Returns `None` when the id is unknown, already resolved or already
    /// swept (a duplicate, late or unsolicited response).
    pub fn try_dequeue(&self, request_id: &str) -> Option<PendingRequest> {
        let (entry, len) = {
            let mut entries = self.lock_entries();
            let entry = entries.remove(request_id);
            (entry, entries.len())
        };
        self.record_depth(len);
        entry
    }

    /// Unconditionally drop the entry for `request_id`, without returning
    /// it. Used to force-drop a tracked request.
    pub fn remove(&self, request_id: &str) {
        let len = {
            let mut entries = self.lock_entries();
            entries.remove(request_id);
            entries.len()
        };
        self.record_depth(len);
    }

    /// Current number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// True when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Install or replace the expiration callback.
    ///
    /// A single slot: the callback is invoked once per expired entry, on a
    /// detached task, after the sweep has released the pool lock.
    pub fn set_expiration_callback(&self, callback: ExpirationCallback) {
        *self
            .expiration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Spawn the periodic sweep task. Idempotent while running.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_some() {
            return;
        }

        let name = self.name;
        let ttl = self.ttl;
        let entries = Arc::clone(&self.entries);
        let expiration = Arc::clone(&self.expiration);

        let handle = tokio::spawn(async move {
            let mut tick =
                tokio::time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                sweep_once(name, ttl, &entries, &expiration);
            }
        });
        *sweeper = Some(handle);
        tracing::debug!(pool = name, ttl_ms = self.ttl.as_millis(), "sweep started");
    }

    /// Cancel the sweep and discard all pending entries immediately.
    ///
    /// No expiration callbacks fire for the discarded entries: any caller
    /// still waiting on them is abandoned silently. This is deliberate;
    /// shutdown does not guarantee notification.
    pub fn stop(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        let dropped = {
            let mut entries = self.lock_entries();
            let dropped = entries.len();
            entries.clear();
            dropped
        };
        self.record_depth(0);
        if dropped > 0 {
            tracing::debug!(
                pool = self.name,
                dropped,
                "pool stopped; pending entries discarded without notification"
            );
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_depth(&self, len: usize) {
        metrics::gauge!("reqbus_pool_pending", "pool" => self.name).set(len as f64);
    }
}

impl fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPool")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("pending", &self.len())
            .finish()
    }
}

impl Drop for RequestPool {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// One sweep tick: collect and remove every expired entry while holding the
/// lock, then fire callbacks on detached tasks with the lock released.
#[allow(clippy::cast_precision_loss)]
fn sweep_once(
    name: &'static str,
    ttl: Duration,
    entries: &Arc<Mutex<HashMap<String, PendingRequest>>>,
    expiration: &Arc<RwLock<Option<ExpirationCallback>>>,
) {
    let (expired, len) = {
        let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let expired_ids: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now > entry.enqueued_at + ttl)
            .map(|(id, _)| id.clone())
            .collect();
        let expired: Vec<PendingRequest> = expired_ids
            .iter()
            .filter_map(|id| entries.remove(id))
            .collect();
        (expired, entries.len())
    };

    if expired.is_empty() {
        return;
    }

    metrics::gauge!("reqbus_pool_pending", "pool" => name).set(len as f64);
    metrics::counter!("reqbus_calls_expired_total", "pool" => name)
        .increment(expired.len() as u64);
    tracing::debug!(pool = name, expired = expired.len(), "sweep collected expired entries");

    let callback = expiration
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let Some(callback) = callback else {
        return;
    };

    for entry in expired {
        let callback = Arc::clone(&callback);
        let (message, _) = entry.into_parts();
        tokio::spawn(async move {
            let request_id = message.request_id.clone();
            let key = message.key.clone();
            if let Err(error) = callback(message).await {
                tracing::warn!(
                    pool = name,
                    request_id = %request_id,
                    key = %key,
                    error = %error,
                    "expiration callback failed"
                );
            }
        });
    }
}
