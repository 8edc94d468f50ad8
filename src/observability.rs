use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests handled. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "carbook_http_requests_total";

/// Histogram: HTTP handler latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "carbook_http_request_duration_seconds";

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings accepted.
pub const BOOKINGS_CREATED_TOTAL: &str = "carbook_bookings_created_total";

/// Counter: booking attempts refused. Labels: reason.
pub const BOOKING_REJECTIONS_TOTAL: &str = "carbook_booking_rejections_total";

/// Counter: status changes applied (no-ops included). Labels: status.
pub const STATUS_TRANSITIONS_TOTAL: &str = "carbook_status_transitions_total";

/// Counter: status changes refused. Labels: reason.
pub const TRANSITION_REJECTIONS_TOTAL: &str = "carbook_transition_rejections_total";

/// Gauge: bookings held in memory (all statuses).
pub const BOOKINGS_TRACKED: &str = "carbook_bookings_tracked";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "carbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `None`.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
