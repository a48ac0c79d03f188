//! Chat metrics
//!
//! Prometheus metrics for connection, presence, and message flow monitoring.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    /// Active websocket connections across both surfaces
    pub static ref CHAT_ACTIVE_CONNECTIONS: IntGauge = register_int_gauge!(
        "chat_active_connections",
        "Number of active chat websocket connections"
    )
    .unwrap();

    /// Total websocket connections accepted
    pub static ref CHAT_TOTAL_CONNECTIONS: IntCounter = register_int_counter!(
        "chat_total_connections",
        "Total number of chat websocket connections established"
    )
    .unwrap();

    /// Distinct users currently online
    pub static ref CHAT_ONLINE_USERS: IntGauge = register_int_gauge!(
        "chat_online_users",
        "Number of distinct users currently online"
    )
    .unwrap();

    /// Messages received from clients
    pub static ref CHAT_MESSAGES_RECEIVED: IntCounter = register_int_counter!(
        "chat_messages_received_total",
        "Total number of messages received from chat clients"
    )
    .unwrap();

    /// Messages sent to clients
    pub static ref CHAT_MESSAGES_SENT: IntCounter = register_int_counter!(
        "chat_messages_sent_total",
        "Total number of messages sent to chat clients"
    )
    .unwrap();

    /// Events fanned out to rooms
    pub static ref CHAT_EVENTS_BROADCAST: IntCounter = register_int_counter!(
        "chat_events_broadcast_total",
        "Total number of events broadcast to chat rooms"
    )
    .unwrap();

    /// Per-connection deliveries resulting from broadcasts
    pub static ref CHAT_EVENTS_DELIVERED: IntCounter = register_int_counter!(
        "chat_events_delivered_total",
        "Total number of broadcast events delivered to individual connections"
    )
    .unwrap();

    /// Failed sends to client outbound queues
    pub static ref CHAT_SEND_ERRORS: IntCounter = register_int_counter!(
        "chat_send_errors_total",
        "Total number of errors sending messages to chat clients"
    )
    .unwrap();

    /// Authentication failures by surface
    pub static ref AUTH_FAILURES: IntCounterVec = register_int_counter_vec!(
        "chat_auth_failures_total",
        "Total number of authentication failures",
        &["surface"]
    )
    .unwrap();

    /// Session duration histogram
    pub static ref CHAT_SESSION_DURATION: Histogram = register_histogram!(
        "chat_session_duration_seconds",
        "Duration of chat websocket sessions in seconds"
    )
    .unwrap();
}

/// Force registration of every metric so the first scrape sees them all,
/// even the ones nothing has incremented yet.
pub fn init_metrics() {
    lazy_static::initialize(&CHAT_ACTIVE_CONNECTIONS);
    lazy_static::initialize(&CHAT_TOTAL_CONNECTIONS);
    lazy_static::initialize(&CHAT_ONLINE_USERS);
    lazy_static::initialize(&CHAT_MESSAGES_RECEIVED);
    lazy_static::initialize(&CHAT_MESSAGES_SENT);
    lazy_static::initialize(&CHAT_EVENTS_BROADCAST);
    lazy_static::initialize(&CHAT_EVENTS_DELIVERED);
    lazy_static::initialize(&CHAT_SEND_ERRORS);
    lazy_static::initialize(&AUTH_FAILURES);
    lazy_static::initialize(&CHAT_SESSION_DURATION);
}

/// Record a new connection
pub fn record_connection() {
    CHAT_ACTIVE_CONNECTIONS.inc();
    CHAT_TOTAL_CONNECTIONS.inc();
}

/// Record a disconnection
pub fn record_disconnection(duration_secs: f64) {
    CHAT_ACTIVE_CONNECTIONS.dec();
    CHAT_SESSION_DURATION.observe(duration_secs);
}

/// Record a message received from a client
pub fn record_message_received() {
    CHAT_MESSAGES_RECEIVED.inc();
}

/// Record a message sent to a client
pub fn record_message_sent() {
    CHAT_MESSAGES_SENT.inc();
}

/// Record one broadcast and how many connections it reached
pub fn record_broadcast(delivered: usize) {
    CHAT_EVENTS_BROADCAST.inc();
    CHAT_EVENTS_DELIVERED.inc_by(delivered as u64);
}

/// Record a failed send to a client queue
pub fn record_send_error() {
    CHAT_SEND_ERRORS.inc();
}

/// Keep the online-users gauge in step with the presence tracker
pub fn set_online_users(count: usize) {
    CHAT_ONLINE_USERS.set(count as i64);
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
