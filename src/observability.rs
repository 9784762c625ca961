use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "cowork_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "cowork_query_duration_seconds";

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "cowork_bookings_created_total";

/// Counter: booking requests rejected because the space was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "cowork_booking_conflicts_total";

/// Counter: booking status transitions. Labels: status.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "cowork_booking_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "cowork_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "cowork_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "cowork_connections_rejected_total";

/// Gauge: number of loaded organizations.
pub const ORGANIZATIONS_ACTIVE: &str = "cowork_organizations_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "cowork_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "cowork_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "cowork_wal_compactions_total";

/// Install Prometheus metrics exporter on the given address. No-op if port is None.
pub fn init(bind: &str, port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = match format!("{bind}:{port}").parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("bad metrics address {bind}:{port}: {e}");
            return;
        }
    };
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://{addr}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSpace(_) => "insert_space",
        Command::UpdateSpace { .. } => "update_space",
        Command::DeleteSpace { .. } => "delete_space",
        Command::SelectSpaces { .. } => "select_spaces",
        Command::InsertClient(_) => "insert_client",
        Command::UpdateClient { .. } => "update_client",
        Command::DeactivateClient { .. } => "deactivate_client",
        Command::SelectClients { .. } => "select_clients",
        Command::InsertBooking(_) => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectBookingTotals { .. } => "select_booking_totals",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::InsertInvoice(_) => "insert_invoice",
        Command::PayInvoice { .. } => "pay_invoice",
        Command::GenerateInvoices => "generate_invoices",
        Command::SelectInvoices { .. } => "select_invoices",
        Command::SelectReport { report, .. } => report.table(),
    }
}
