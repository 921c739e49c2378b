use std::net::SocketAddr;

use axum::http::Method;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: API requests handled. Labels: operation, status.
pub const REQUESTS_TOTAL: &str = "gymbook_requests_total";

/// Histogram: API request latency in seconds. Labels: operation.
pub const REQUEST_DURATION_SECONDS: &str = "gymbook_request_duration_seconds";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: bookings moved to `completed` by the sweep.
pub const BOOKINGS_COMPLETED_TOTAL: &str = "gymbook_bookings_completed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "gymbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "gymbook_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "gymbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None; a
/// failed install is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// API operations, as reported in the `operation` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Health,
    ListTrainers,
    UpsertUser,
    MyAvailability,
    CreateAvailability,
    UpdateAvailability,
    DeleteAvailability,
    Browse,
    Book,
    MyBookings,
    CancelBooking,
    TrainerBookings,
}

impl Operation {
    /// Resolve a matched route template to its operation.
    pub fn from_route(method: &Method, path: &str) -> Option<Self> {
        let op = match (method.as_str(), path) {
            ("GET", "/health") => Operation::Health,
            ("GET", "/api/users/trainers") => Operation::ListTrainers,
            ("PUT", "/api/users/:id") => Operation::UpsertUser,
            ("GET", "/api/schedule/my-availability") => Operation::MyAvailability,
            ("POST", "/api/schedule/availability") => Operation::CreateAvailability,
            ("PATCH", "/api/schedule/availability/:id") => Operation::UpdateAvailability,
            ("DELETE", "/api/schedule/availability/:id") => Operation::DeleteAvailability,
            ("GET", "/api/schedule/trainers") => Operation::Browse,
            ("POST", "/api/schedule/book") => Operation::Book,
            ("GET", "/api/schedule/my-bookings") => Operation::MyBookings,
            ("PATCH", "/api/schedule/bookings/:id/cancel") => Operation::CancelBooking,
            ("GET", "/api/schedule/trainer-bookings") => Operation::TrainerBookings,
            _ => return None,
        };
        Some(op)
    }

    pub fn label(self) -> &'static str {
        match self {
            Operation::Health => "health",
            Operation::ListTrainers => "list_trainers",
            Operation::UpsertUser => "upsert_user",
            Operation::MyAvailability => "my_availability",
            Operation::CreateAvailability => "create_availability",
            Operation::UpdateAvailability => "update_availability",
            Operation::DeleteAvailability => "delete_availability",
            Operation::Browse => "browse",
            Operation::Book => "book",
            Operation::MyBookings => "my_bookings",
            Operation::CancelBooking => "cancel_booking",
            Operation::TrainerBookings => "trainer_bookings",
        }
    }
}

/// Record one handled request.
pub fn record_request(op: Operation, status: u16, elapsed: std::time::Duration) {
    metrics::counter!(REQUESTS_TOTAL, "operation" => op.label(), "status" => status.to_string())
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "operation" => op.label())
        .record(elapsed.as_secs_f64());
}
