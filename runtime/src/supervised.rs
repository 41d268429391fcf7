//! Supervised background tasks with restart-on-failure.
//!
//! Long-lived background loops (a bus consumer feeding the engine's byte
//! handlers, an expiration sweep wrapped at the application layer) must
//! survive their own failures: a panic or an error exit is logged and the
//! loop is restarted after an exponential backoff, rather than silently
//! dying and taking the service's liveness with it.
//!
//! # Example
//!
//! ```rust,no_run
//! use reqbus_runtime::supervised::{BackoffPolicy, SupervisedTask};
//! use std::sync::Arc;
//!
//! # struct ConsumerLoop;
//! # impl ConsumerLoop { async fn run(&self) -> Result<(), anyhow::Error> { Ok(()) } }
//! # async fn example(consumer: Arc<ConsumerLoop>) {
//! let task = SupervisedTask::spawn("bus-consumer", BackoffPolicy::default(), move || {
//!     let consumer = Arc::clone(&consumer);
//!     async move { consumer.run().await }
//! });
//!
//! // ... later
//! task.shutdown().await;
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A failing run longer than this is considered healthy; the next failure
/// starts backing off from the initial delay again.
const HEALTHY_RUN: Duration = Duration::from_secs(60);

/// Exponential backoff between restarts of a supervised task.
///
/// # Default Values
///
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each restart)
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first restart
    pub initial_delay: Duration,
    /// Maximum delay between restarts (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder {
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Calculate delay for a given restart attempt number.
    ///
    /// Uses exponential backoff: delay = `initial_delay` * (multiplier ^ attempt),
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Builder for [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffPolicyBuilder {
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl BackoffPolicyBuilder {
    /// Set the delay before the first restart.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`BackoffPolicy`].
    #[must_use]
    pub fn build(self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(100)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(30)),
            multiplier: self.multiplier.unwrap_or(2.0),
        }
    }
}

/// Handle to a background task that is restarted on failure.
///
/// The factory is invoked once per run. A run ending in `Ok(())` is a clean
/// exit and stops the supervisor; a run ending in `Err` or a panic is
/// logged, counted and restarted after the policy's backoff.
pub struct SupervisedTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SupervisedTask {
    /// Spawn `factory` under supervision.
    pub fn spawn<F, Fut>(name: &'static str, policy: BackoffPolicy, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let (shutdown, mut watch_shutdown) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut attempt: usize = 0;
            loop {
                if *watch_shutdown.borrow() {
                    break;
                }

                let started = Instant::now();
                let mut run = tokio::spawn(factory());
                let outcome = tokio::select! {
                    joined = &mut run => Some(joined),
                    _ = watch_shutdown.changed() => {
                        run.abort();
                        None
                    }
                };

                let Some(joined) = outcome else {
                    tracing::info!(task = name, "supervised task shut down");
                    break;
                };

                match joined {
                    Ok(Ok(())) => {
                        tracing::info!(task = name, "supervised task exited cleanly");
                        break;
                    }
                    Ok(Err(error)) => {
                        tracing::warn!(task = name, error = %error, "supervised task failed");
                    }
                    Err(join_error) if join_error.is_panic() => {
                        tracing::error!(task = name, "supervised task panicked");
                    }
                    Err(_) => {
                        // Aborted from outside the supervisor; treat as shutdown.
                        tracing::info!(task = name, "supervised task aborted");
                        break;
                    }
                }

                if started.elapsed() >= HEALTHY_RUN {
                    attempt = 0;
                }
                crate::metrics::SupervisorMetrics::record_restart(name);
                let delay = policy.delay_for_attempt(attempt);
                attempt += 1;
                tracing::warn!(
                    task = name,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "restarting supervised task"
                );

                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = watch_shutdown.changed() => break,
                }
            }
        });

        Self {
            name,
            shutdown,
            handle,
        }
    }

    /// True when the supervisor loop has terminated (clean exit or
    /// shutdown).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the supervisor, aborting the current run, and wait for it to
    /// wind down.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if self.handle.await.is_err() {
            tracing::warn!(task = self.name, "supervisor task did not shut down cleanly");
        }
    }
}

impl std::fmt::Debug for SupervisedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedTask")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}
