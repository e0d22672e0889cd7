use std::net::SocketAddr;

use crate::dispatch::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: inbound messages handled. Labels: command.
pub const COMMANDS_TOTAL: &str = "roombook_commands_total";

/// Histogram: inbound message handling latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "roombook_command_duration_seconds";

/// Counter: reservation attempts. Labels: outcome (confirmed, conflict, rejected, error).
pub const RESERVATIONS_TOTAL: &str = "roombook_reservations_total";

/// Counter: reservations cancelled by their owner.
pub const CANCELLATIONS_TOTAL: &str = "roombook_cancellations_total";

/// Histogram: timetable build time in seconds, store reads included.
pub const TIMETABLE_BUILD_DURATION_SECONDS: &str = "roombook_timetable_build_duration_seconds";

/// Counter: overlapping confirmed reservations found while building a timetable.
/// Anything above zero means the store let a double booking through.
pub const DOUBLE_BOOKINGS_DETECTED_TOTAL: &str = "roombook_double_bookings_detected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: dialogs currently in progress.
pub const SESSIONS_ACTIVE: &str = "roombook_sessions_active";

/// Counter: dialogs discarded after sitting idle.
pub const SESSIONS_EVICTED_TOTAL: &str = "roombook_sessions_evicted_total";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "roombook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
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
        Command::Start => "start",
        Command::Help => "help",
        Command::Book => "book",
        Command::MyBookings => "mybookings",
        Command::Cancel(_) => "cancel",
        Command::Abort => "abort",
        Command::Text(_) => "dialog",
        Command::Unknown(_) => "unknown",
    }
}
