use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::model::ReservationId;

// ── Request-driven ──────────────────────────────────────────────

/// Counter: admission attempts. Labels: outcome.
pub const ADMISSIONS_TOTAL: &str = "roomslot_admissions_total";

/// Histogram: admission latency in seconds, lock wait included.
pub const ADMISSION_DURATION_SECONDS: &str = "roomslot_admission_duration_seconds";

/// Counter: applied status transitions. Labels: status.
pub const STATUS_CHANGES_TOTAL: &str = "roomslot_status_changes_total";

// ── Durability ──────────────────────────────────────────────────

/// Histogram: log group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomslot_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomslot_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for an admission result.
pub fn admission_outcome(result: &Result<ReservationId, EngineError>) -> &'static str {
    match result {
        Ok(_) => "admitted",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::InvalidInterval(_)) | Err(EngineError::LimitExceeded(_)) => "invalid",
        Err(EngineError::NotFound(_)) => "unknown_room",
        Err(_) => "error",
    }
}
