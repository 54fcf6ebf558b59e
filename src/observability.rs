use std::net::SocketAddr;

use crate::wire::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "kenneld_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "kenneld_command_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "kenneld_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "kenneld_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "kenneld_connections_rejected_total";

/// Gauge: number of active facilities (loaded engines).
pub const FACILITIES_ACTIVE: &str = "kenneld_facilities_active";

/// Counter: kennel occupancy flag flips (either direction).
pub const OCCUPANCY_FLIPS_TOTAL: &str = "kenneld_occupancy_flips_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "kenneld_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "kenneld_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateKennel { .. } => "create_kennel",
        Command::UpdateKennel { .. } => "update_kennel",
        Command::DeleteKennel { .. } => "delete_kennel",
        Command::GetKennel { .. } => "get_kennel",
        Command::ListKennels => "list_kennels",
        Command::RegisterDog { .. } => "register_dog",
        Command::UpdateDog { .. } => "update_dog",
        Command::RemoveDog { .. } => "remove_dog",
        Command::GetDog { .. } => "get_dog",
        Command::ListDogs => "list_dogs",
        Command::CreateBooking { .. } => "create_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::GetBooking { .. } => "get_booking",
        Command::ListBookings => "list_bookings",
        Command::KennelBookings { .. } => "kennel_bookings",
        Command::CheckAvailability { .. } => "check_availability",
        Command::AvailableKennels { .. } => "available_kennels",
        Command::Subscribe { .. } => "subscribe",
        Command::Unsubscribe { .. } => "unsubscribe",
    }
}
