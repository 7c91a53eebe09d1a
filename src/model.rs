use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar date-time, UTC wall clock. Offsets are normalised away at parse time.
pub type Timestamp = NaiveDateTime;

pub type ReservationId = Ulid;
pub type RoomId = Ulid;
pub type RequesterId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span without the ordering assertion. Used for data that has
    /// not been validated yet (replayed or externally supplied).
    pub fn unchecked(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn is_well_ordered(&self) -> bool {
        self.start < self.end
    }

    /// Fractional hours between start and end. Negative if reversed.
    pub fn duration_hours(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 3_600_000.0
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReservationStatus {
    /// Statuses that block a room for conflict checks.
    pub const ACTIVE: [ReservationStatus; 2] = [ReservationStatus::Pending, ReservationStatus::Approved];

    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
        }
    }

    /// Lifecycle is `pending -> {approved, rejected}`; both outcomes are terminal.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Approved)
                | (ReservationStatus::Pending, ReservationStatus::Rejected)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "approved" => Ok(ReservationStatus::Approved),
            "rejected" => Ok(ReservationStatus::Rejected),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub requester_id: RequesterId,
    pub span: Span,
    pub purpose: String,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    /// Category, e.g. "lab" or "lecture hall".
    pub kind: String,
    pub capacity: u32,
    pub active: bool,
}

/// All reservations of one room, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct RoomSchedule {
    pub room_id: RoomId,
    pub reservations: Vec<Reservation>,
}

impl RoomSchedule {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &ReservationId) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn has_active(&self) -> bool {
        self.reservations.iter().any(|r| r.status.is_active())
    }
}

/// Log record format. Flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: RoomId,
        name: String,
        kind: String,
        capacity: u32,
        active: bool,
    },
    RoomUpdated {
        id: RoomId,
        name: String,
        kind: String,
        capacity: u32,
        active: bool,
    },
    RoomDeleted {
        id: RoomId,
    },
    RequesterRegistered {
        id: RequesterId,
        name: String,
    },
    ReservationCreated {
        id: ReservationId,
        room_id: RoomId,
        requester_id: RequesterId,
        span: Span,
        purpose: String,
        status: ReservationStatus,
    },
    StatusChanged {
        id: ReservationId,
        room_id: RoomId,
        status: ReservationStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A reservation joined with the display names of its room and requester.
/// Names are `None` when the directory no longer knows the id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationView {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub room_name: Option<String>,
    pub requester_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_rooms: usize,
    /// Distinct rooms with an approved reservation starting today.
    pub active_usage: usize,
    pub total_bookings: usize,
    pub pending_requests: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomUsage {
    pub room_id: RoomId,
    pub room_name: String,
    pub kind: String,
    pub total_hours: f64,
    pub bookings: usize,
}

/// A reservation left out of a usage report, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedReservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyUsage {
    pub month: u32,
    pub year: i32,
    pub rooms: Vec<RoomUsage>,
    pub skipped: Vec<SkippedReservation>,
}
