//! Metrics collection and export.
//!
//! Uses the `metrics` facade with a Prometheus exporter. Delivery counters
//! are emitted by the core dispatcher; this module describes them and owns
//! the connection-level metrics.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use taskcast_core::broadcast::names as dispatch_names;
use tracing::info;

/// Metric names owned by the server.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "taskcast_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "taskcast_connections_active";
    pub const HANDSHAKE_FAILURES_TOTAL: &str = "taskcast_handshake_failures_total";
    pub const TASK_CHANNELS_ACTIVE: &str = "taskcast_task_channels_active";
}

/// Register descriptions for every metric the hub emits.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of channel connections accepted"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Number of currently open channel connections"
    );
    metrics::describe_counter!(
        names::HANDSHAKE_FAILURES_TOTAL,
        "Handshakes rejected before a channel was joined, by close reason"
    );
    metrics::describe_gauge!(
        names::TASK_CHANNELS_ACTIVE,
        "Number of task channels with at least one subscriber"
    );
    metrics::describe_counter!(
        dispatch_names::EVENTS_TOTAL,
        "Events handed to the dispatch queue, by kind"
    );
    metrics::describe_counter!(
        dispatch_names::DELIVERIES_TOTAL,
        "Event deliveries pushed to connections, by channel kind"
    );
    metrics::describe_counter!(
        dispatch_names::DELIVERY_FAILURES_TOTAL,
        "Event deliveries that failed and pruned a connection, by channel kind"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus exporter on the given port.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or install.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an accepted channel connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a closed channel connection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a rejected handshake.
pub fn record_handshake_failure(reason: &str) {
    counter!(names::HANDSHAKE_FAILURES_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Update the task-channel gauge.
pub fn set_task_channels(count: usize) {
    gauge!(names::TASK_CHANNELS_ACTIVE).set(count as f64);
}

/// Guard that records a connection on creation and its disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
