//! Prometheus metrics tests
//!
//! Exercises the recording helpers and the text exposition surface.
//! The registry is process-global and the test harness runs threads in
//! parallel, so each test below owns a disjoint set of metrics and
//! asserts deltas rather than absolute values.

use reef_chat::metrics::{
    self, gather_metrics, init_metrics, AUTH_FAILURES, CHAT_ACTIVE_CONNECTIONS,
    CHAT_EVENTS_BROADCAST, CHAT_EVENTS_DELIVERED, CHAT_MESSAGES_RECEIVED, CHAT_MESSAGES_SENT,
    CHAT_ONLINE_USERS, CHAT_SEND_ERRORS, CHAT_SESSION_DURATION, CHAT_TOTAL_CONNECTIONS,
};

#[cfg(test)]
mod counter_behavior {
    use super::*;

    #[test]
    fn test_message_flow_counters() {
        init_metrics();

        let received = CHAT_MESSAGES_RECEIVED.get();
        let sent = CHAT_MESSAGES_SENT.get();
        let errors = CHAT_SEND_ERRORS.get();

        metrics::record_message_received();
        metrics::record_message_sent();
        metrics::record_message_sent();
        metrics::record_send_error();

        assert_eq!(CHAT_MESSAGES_RECEIVED.get(), received + 1);
        assert_eq!(CHAT_MESSAGES_SENT.get(), sent + 2);
        assert_eq!(CHAT_SEND_ERRORS.get(), errors + 1);
    }

    #[test]
    fn test_broadcast_counts_deliveries() {
        init_metrics();

        let broadcasts = CHAT_EVENTS_BROADCAST.get();
        let delivered = CHAT_EVENTS_DELIVERED.get();

        // One event fanned out to five connections, then one to an
        // empty room.
        metrics::record_broadcast(5);
        metrics::record_broadcast(0);

        assert_eq!(CHAT_EVENTS_BROADCAST.get(), broadcasts + 2);
        assert_eq!(CHAT_EVENTS_DELIVERED.get(), delivered + 5);
    }
}

#[cfg(test)]
mod connection_lifecycle {
    use super::*;

    #[test]
    fn test_gauges_and_session_histogram() {
        init_metrics();

        let active = CHAT_ACTIVE_CONNECTIONS.get();
        let total = CHAT_TOTAL_CONNECTIONS.get();
        let sessions = CHAT_SESSION_DURATION.get_sample_count();
        let observed = CHAT_SESSION_DURATION.get_sample_sum();

        metrics::record_connection();
        metrics::record_connection();
        assert_eq!(CHAT_ACTIVE_CONNECTIONS.get(), active + 2);
        assert_eq!(CHAT_TOTAL_CONNECTIONS.get(), total + 2);

        metrics::record_disconnection(1.5);
        metrics::record_disconnection(30.0);

        // Active returns to where it started; the total only grows.
        assert_eq!(CHAT_ACTIVE_CONNECTIONS.get(), active);
        assert_eq!(CHAT_TOTAL_CONNECTIONS.get(), total + 2);

        // Both session durations land in the histogram.
        assert_eq!(CHAT_SESSION_DURATION.get_sample_count(), sessions + 2);
        let sum_delta = CHAT_SESSION_DURATION.get_sample_sum() - observed;
        assert!((sum_delta - 31.5).abs() < 1e-9);
    }

    #[test]
    fn test_online_users_gauge_follows_presence() {
        init_metrics();

        metrics::set_online_users(3);
        assert_eq!(CHAT_ONLINE_USERS.get(), 3);

        metrics::set_online_users(7);
        assert_eq!(CHAT_ONLINE_USERS.get(), 7);

        metrics::set_online_users(0);
        assert_eq!(CHAT_ONLINE_USERS.get(), 0);
    }
}

#[cfg(test)]
mod label_behavior {
    use super::*;

    #[test]
    fn test_auth_failures_partitioned_by_surface() {
        init_metrics();

        let community = AUTH_FAILURES.with_label_values(&["community"]).get();
        let private = AUTH_FAILURES.with_label_values(&["private"]).get();

        AUTH_FAILURES.with_label_values(&["community"]).inc();
        AUTH_FAILURES.with_label_values(&["community"]).inc();
        AUTH_FAILURES.with_label_values(&["private"]).inc();

        assert_eq!(
            AUTH_FAILURES.with_label_values(&["community"]).get(),
            community + 2
        );
        assert_eq!(
            AUTH_FAILURES.with_label_values(&["private"]).get(),
            private + 1
        );

        // Labelled children show up as distinct series in the scrape.
        let text = gather_metrics();
        assert!(text.contains("chat_auth_failures_total{surface=\"community\"}"));
        assert!(text.contains("chat_auth_failures_total{surface=\"private\"}"));
    }
}

#[cfg(test)]
mod exposition {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_scrape_carries_help_and_type_lines() {
        init_metrics();

        let text = gather_metrics();

        assert!(text.contains("# HELP chat_active_connections"));
        assert!(text.contains("# TYPE chat_active_connections gauge"));
        assert!(text.contains("# TYPE chat_online_users gauge"));
        assert!(text.contains("# TYPE chat_total_connections counter"));
        assert!(text.contains("# TYPE chat_messages_received_total counter"));
        assert!(text.contains("# TYPE chat_messages_sent_total counter"));
        assert!(text.contains("# TYPE chat_events_broadcast_total counter"));
        assert!(text.contains("# TYPE chat_send_errors_total counter"));
        assert!(text.contains("# TYPE chat_session_duration_seconds histogram"));
    }

    #[test]
    fn test_histogram_exposes_buckets_and_summary_lines() {
        init_metrics();

        let text = gather_metrics();

        assert!(text.contains("chat_session_duration_seconds_bucket"));
        assert!(text.contains("le=\"+Inf\""));
        assert!(text.contains("chat_session_duration_seconds_sum"));
        assert!(text.contains("chat_session_duration_seconds_count"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_scrape() {
        init_metrics();

        let (status, body) = reef_chat::api::handlers::metrics().await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("# TYPE"));
        assert!(body.contains("chat_total_connections"));
        assert!(body.contains("chat_session_duration_seconds"));
    }
}
