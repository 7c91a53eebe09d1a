use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::model::Timestamp;

/// Plain "date space time" form, no zone.
pub const PLAIN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised timestamp: {0:?}")]
pub struct TimestampError(pub String);

/// Parse a timestamp in one of the accepted forms, tried in order:
/// RFC 3339 (normalised to UTC), then `YYYY-MM-DD HH:MM:SS`.
pub fn parse_timestamp(input: &str) -> Result<Timestamp, TimestampError> {
    let s = input.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc).naive_utc());
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, PLAIN_FORMAT) {
        return Ok(t);
    }
    Err(TimestampError(input.to_string()))
}

/// Reference clock for "today" in dashboard stats.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().naive_utc()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}
