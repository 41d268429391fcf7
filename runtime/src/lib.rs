//! # Reqbus Runtime
//!
//! Runtime utilities for hosting the reqbus correlation engine.
//!
//! The engine itself (`reqbus-core`) never spawns anything but its own
//! expiration sweeps; everything long-lived around it is the application's
//! responsibility. This crate provides the pieces a deployment needs:
//!
//! - **Supervised tasks**: restart-on-failure hosting for transport
//!   consumer loops and other background work, with exponential backoff
//!   ([`supervised`]).
//! - **Metrics**: a Prometheus exporter endpoint plus the metric
//!   descriptions for everything the engine records ([`metrics`]).
//!
//! ## Example
//!
//! ```ignore
//! use reqbus_runtime::supervised::{BackoffPolicy, SupervisedTask};
//! use reqbus_runtime::metrics::MetricsServer;
//!
//! let mut metrics = MetricsServer::new("0.0.0.0:9090".parse()?);
//! metrics.start()?;
//!
//! let consumer_task = SupervisedTask::spawn("responses", BackoffPolicy::default(), move || {
//!     let consumer = consumer.clone();
//!     async move { consumer.run().await }
//! });
//! ```

/// Supervised background tasks with restart-on-failure
pub mod supervised;

/// Prometheus metrics for observability
pub mod metrics;

pub use metrics::{MetricsError, MetricsServer};
pub use supervised::{BackoffPolicy, SupervisedTask};
