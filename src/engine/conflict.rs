use crate::model::*;
use crate::time::parse_timestamp;

use super::EngineError;

/// Whether a requested span collides with an existing one.
///
/// Half-open on both: `new.start < existing.end && new.end > existing.start`.
/// A booking that ends exactly when another starts does not conflict.
/// Callers guarantee both spans are well ordered.
pub fn conflicts(new: &Span, existing: &Span) -> bool {
    new.overlaps(existing)
}

/// Length of `[start, end)` in fractional hours. `end <= start` is invalid.
pub fn compute_duration(start: Timestamp, end: Timestamp) -> Result<f64, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidInterval(format!(
            "end {end} is not after start {start}"
        )));
    }
    Ok(Span::new(start, end).duration_hours())
}

/// Parse both endpoints and validate their order.
pub fn parse_span(start: &str, end: &str) -> Result<Span, EngineError> {
    let start = parse_timestamp(start).map_err(|e| EngineError::InvalidInterval(e.to_string()))?;
    let end = parse_timestamp(end).map_err(|e| EngineError::InvalidInterval(e.to_string()))?;
    validate_span(start, end)
}

/// [`compute_duration`] over textual timestamps.
pub fn compute_duration_text(start: &str, end: &str) -> Result<f64, EngineError> {
    parse_span(start, end).map(|span| span.duration_hours())
}

/// A span admissible for booking: strictly positive duration.
pub(crate) fn validate_span(start: Timestamp, end: Timestamp) -> Result<Span, EngineError> {
    let hours = compute_duration(start, end)?;
    if hours <= 0.0 {
        return Err(EngineError::InvalidInterval("duration must be positive".into()));
    }
    Ok(Span::new(start, end))
}

pub(crate) fn validate_period(month: u32, year: i32) -> Result<(), EngineError> {
    if !(1..=12).contains(&month) {
        return Err(EngineError::InvalidPeriod { month, year });
    }
    Ok(())
}
