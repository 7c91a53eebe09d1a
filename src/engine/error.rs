use ulid::Ulid;

use crate::model::{ReservationId, ReservationStatus};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// End not after start, or a timestamp that does not parse.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    #[error("invalid period: month {month} of {year}")]
    InvalidPeriod { month: u32, year: i32 },
    /// An active reservation already holds part of the requested slot.
    #[error("conflict with reservation: {0}")]
    Conflict(ReservationId),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("reservation {id} cannot go from {from} to {to}")]
    IllegalTransition {
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    /// The store refused the write. Retrying the same request will not help.
    #[error("store rejected request: {0}")]
    StoreRejected(StoreError),
    /// The store failed. Never retried here; the caller owns retry policy.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
            other => EngineError::StoreRejected(other),
        }
    }
}
