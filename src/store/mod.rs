//! Collaborator seams consumed by the engine.
//!
//! The engine only talks to [`ReservationStore`] and [`RoomDirectory`]; it
//! never assumes how they keep their data. [`MemoryStore`] is the bundled
//! implementation of both, optionally backed by the append-only log.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("room {0} still has pending or approved reservations")]
    RoomInUse(RoomId),
    #[error("invalid record: {0}")]
    Invalid(&'static str),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Persist a new reservation exactly as given and return its id.
    async fn insert(&self, reservation: Reservation) -> Result<ReservationId, StoreError>;

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Reservations on `room_id` with one of `statuses` whose span overlaps `span`.
    async fn find_overlapping(
        &self,
        room_id: RoomId,
        span: &Span,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Overwrite the status of an existing reservation. `NotFound` otherwise.
    async fn update_status(&self, id: ReservationId, status: ReservationStatus) -> Result<(), StoreError>;

    async fn list_all(&self) -> Result<Vec<Reservation>, StoreError>;

    async fn list_by_requester(&self, requester_id: RequesterId) -> Result<Vec<Reservation>, StoreError>;

    /// Reservations of any status whose start falls in the calendar month.
    async fn list_by_month(&self, month: u32, year: i32) -> Result<Vec<Reservation>, StoreError>;
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;

    async fn requester_name(&self, id: RequesterId) -> Result<Option<String>, StoreError>;

    /// Whether any pending or approved reservation references the room.
    async fn has_active_reservations(&self, room_id: RoomId) -> Result<bool, StoreError>;
}
