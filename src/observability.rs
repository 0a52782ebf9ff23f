use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "parkd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "parkd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "parkd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "parkd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "parkd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkd_wal_flush_batch_size";

// ── Domain metrics ──────────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "parkd_bookings_created_total";

pub const BOOKINGS_CANCELLED_TOTAL: &str = "parkd_bookings_cancelled_total";

/// Counter: creates and amends refused for lack of a free space.
pub const ALLOCATION_FAILURES_TOTAL: &str = "parkd_allocation_failures_total";

/// Counter: availability queries that saw more occupied spaces than exist.
pub const AVAILABILITY_INCONSISTENCIES_TOTAL: &str = "parkd_availability_inconsistencies_total";

/// Counter: space flag refreshes that failed after the booking change was committed.
pub const FLAG_REFRESH_FAILURES_TOTAL: &str = "parkd_flag_refresh_failures_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Register { .. } => "register",
        Command::Login { .. } => "login",
        Command::Logout => "logout",
        Command::InsertSpace { .. } => "insert_space",
        Command::SetSpaceService { .. } => "set_space_service",
        Command::SelectSpaces => "select_spaces",
        Command::SelectCurrentUser => "select_current_user",
        Command::InsertBooking { .. } => "insert_booking",
        Command::AmendBooking { .. } => "amend_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectAvailabilityOnDay { .. } => "select_availability_on_day",
        Command::SelectFreeSpaces { .. } => "select_free_spaces",
        Command::SelectPrice { .. } => "select_price",
        Command::SelectTotalPrice { .. } => "select_total_price",
    }
}
