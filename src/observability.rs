use std::net::SocketAddr;

use crate::sql::Command;

// ── Admission ───────────────────────────────────────────────────

/// Counter: admission decisions. Labels: outcome (accepted, rejected, error).
pub const ADMISSIONS_TOTAL: &str = "labres_admissions_total";

/// Counter: individual rejection reasons. Labels: reason.
pub const REJECTIONS_TOTAL: &str = "labres_rejections_total";

/// Histogram: admission latency in seconds, store I/O included.
pub const ADMISSION_DURATION_SECONDS: &str = "labres_admission_duration_seconds";

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "labres_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "labres_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "labres_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "labres_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "labres_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "labres_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "labres_wal_flush_batch_size";

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
        Command::InsertReservation(_) => "insert_reservation",
        Command::SelectReservations(_) => "select_reservations",
    }
}
