mod admission;
mod conflict;
mod error;
mod queries;
mod stats;
#[cfg(test)]
mod tests;

pub use conflict::{compute_duration, compute_duration_text, conflicts, parse_span};
pub use error::EngineError;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::model::RoomId;
use crate::store::{MemoryStore, ReservationStore, RoomDirectory};
use crate::time::Clock;

/// Reservation admission and reporting over injected collaborators.
///
/// Holds no reservation state of its own. The only shared state is one
/// admission lock per room, which makes "check availability, then insert"
/// a single step for that room while other rooms proceed in parallel.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    directory: Arc<dyn RoomDirectory>,
    clock: Arc<dyn Clock>,
    /// One entry per room admitted against; dropped by [`Engine::forget_room`].
    room_locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        directory: Arc<dyn RoomDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            directory,
            clock,
            room_locks: DashMap::new(),
        }
    }

    /// Engine over the bundled store, which serves as both collaborators.
    pub fn with_memory_store(store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self::new(store.clone(), store, clock)
    }

    fn room_lock(&self, room_id: RoomId) -> Arc<Mutex<()>> {
        self.room_locks
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Drop the admission lock of a deleted room. Kept while any admission
    /// still holds or waits on it.
    pub fn forget_room(&self, room_id: RoomId) {
        self.room_locks
            .remove_if(&room_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
