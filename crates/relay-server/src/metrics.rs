//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Rejected malformed frames total (counter).
pub const PROTOCOL_ERRORS_TOTAL: &str = "protocol_errors_total";
/// Fanout copies queued on live connections (counter).
pub const FANOUT_DELIVERED_TOTAL: &str = "fanout_delivered_total";
/// Fanout copies dropped on full outbound queues (counter).
pub const FANOUT_DROPS_TOTAL: &str = "fanout_drops_total";
/// Fanout recipients skipped because they were offline (counter).
pub const FANOUT_OFFLINE_SKIPS_TOTAL: &str = "fanout_offline_skips_total";
/// Synthetic stop-typing events from timer expiry (counter).
pub const TYPING_EXPIRATIONS_TOTAL: &str = "typing_expirations_total";
/// Message status transitions (counter, labels: status).
pub const STATUS_TRANSITIONS_TOTAL: &str = "status_transitions_total";
/// Messages durably persisted (counter).
pub const MESSAGES_PERSISTED_TOTAL: &str = "messages_persisted_total";
/// Persistence failures reported to senders (counter).
pub const PERSIST_FAILURES_TOTAL: &str = "persist_failures_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_produces_prometheus_text() {
        // Build a recorder + handle without installing globally, so the test
        // cannot conflict with others.
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            PROTOCOL_ERRORS_TOTAL,
            FANOUT_DELIVERED_TOTAL,
            FANOUT_DROPS_TOTAL,
            FANOUT_OFFLINE_SKIPS_TOTAL,
            TYPING_EXPIRATIONS_TOTAL,
            STATUS_TRANSITIONS_TOTAL,
            MESSAGES_PERSISTED_TOTAL,
            PERSIST_FAILURES_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} is not snake_case"
            );
        }
    }
}
