// src/core/metrics.rs

//! Defines and registers Prometheus metrics for proxy monitoring.
//!
//! Metrics are registered exactly once, lazily, the first time each static
//! is dereferenced. `once_cell::sync::Lazy` is used instead of
//! `lazy_static!`, since `once_cell` is already a dependency.

use once_cell::sync::Lazy;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

/// The number of clients currently connected to the proxy.
pub static CONNECTED_CLIENTS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "spineldb_proxy_connected_clients",
        "Number of currently connected clients."
    )
    .unwrap()
});

/// The total number of client connections accepted since startup.
pub static CONNECTIONS_RECEIVED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "spineldb_proxy_connections_received_total",
        "Total number of connections received."
    )
    .unwrap()
});

/// The total number of commands forwarded to a backend instance.
pub static COMMANDS_FORWARDED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "spineldb_proxy_commands_forwarded_total",
        "Total number of commands forwarded to backend instances."
    )
    .unwrap()
});

/// The total number of commands refused by the command-surface classifier.
pub static COMMANDS_REFUSED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "spineldb_proxy_commands_refused_total",
        "Total number of commands refused as unsupported by the proxy."
    )
    .unwrap()
});

/// The total number of `MOVED`/`ASK` redirections followed, labeled by kind.
pub static REDIRECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "spineldb_proxy_redirections_total",
        "Total number of cluster redirections followed, labeled by kind (moved/ask).",
        &["kind"]
    )
    .unwrap()
});

/// The current state of each known backend link, labeled by address and
/// pool slot: 0 = connecting, 1 = connected, 2 = error.
pub static LINK_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "spineldb_proxy_link_state",
        "Current backend link state (0=connecting, 1=connected, 2=error).",
        &["addr", "slot"]
    )
    .unwrap()
});

/// The number of hash slots currently assigned to a known owner.
pub static SLOTS_ASSIGNED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "spineldb_proxy_slots_assigned",
        "Number of the 16384 hash slots currently assigned to a known owner."
    )
    .unwrap()
});

/// The number of distinct backend instances known to the registry.
pub static INSTANCES_KNOWN: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "spineldb_proxy_instances_known",
        "Number of distinct backend instances in the registry."
    )
    .unwrap()
});

/// A histogram of end-to-end command latency, from receipt on the client
/// link to reply delivery.
pub static COMMAND_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "spineldb_proxy_command_latency_seconds",
        "Latency of command routing and forwarding, in seconds."
    )
    .unwrap()
});

/// Gathers all registered metrics and encodes them in the Prometheus text
/// exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
