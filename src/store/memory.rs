use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Datelike;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::limits::*;
use crate::model::*;
use crate::wal::Wal;

use super::{ReservationStore, RoomDirectory, StoreError};

pub type SharedSchedule = Arc<RwLock<RoomSchedule>>;

// ── Group-commit log writer ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the log. Each wake-up drains every append already queued and commits
/// them with a single fsync; any other command waits for that batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut deferred: Option<WalCommand> = None;
    loop {
        let cmd = match deferred.take() {
            Some(cmd) => cmd,
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
                commit_batch(&mut wal, batch);
            }
            WalCommand::Rewrite { events, response } => {
                debug!(path = %wal.path().display(), events = events.len(), "rewriting log");
                let _ = response.send(wal.rewrite(&events));
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
            }
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into
    // the next batch; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn writer_gone() -> StoreError {
    StoreError::Unavailable("log writer shut down".into())
}

/// In-process reservation store and room directory.
///
/// Reservations live in per-room schedules behind their own `RwLock`, so reads
/// of one room never wait on writes to another. With a log attached, every
/// mutation is made durable before it becomes visible.
pub struct MemoryStore {
    rooms: DashMap<RoomId, Room>,
    requesters: DashMap<RequesterId, String>,
    schedules: DashMap<RoomId, SharedSchedule>,
    /// Reverse lookup: reservation id → room id.
    reservation_room: DashMap<ReservationId, RoomId>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss a concurrent append.
    write_gate: RwLock<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl MemoryStore {
    /// Volatile store: nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            rooms: DashMap::new(),
            requesters: DashMap::new(),
            schedules: DashMap::new(),
            reservation_room: DashMap::new(),
            wal_tx: None,
            write_gate: RwLock::new(()),
        }
    }

    /// Replay the log at `path` and keep appending to it.
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::recover(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Self::in_memory();
        store.wal_tx = Some(wal_tx);
        store.replay(&events);
        info!(
            path = %path.display(),
            events = events.len(),
            rooms = store.rooms.len(),
            reservations = store.reservation_room.len(),
            "store opened"
        );
        Ok(store)
    }

    /// Rebuild state from log events. Runs before the store is shared, so the
    /// schedules are assembled unlocked and wrapped at the end.
    fn replay(&mut self, events: &[Event]) {
        let mut schedules: HashMap<RoomId, RoomSchedule> = HashMap::new();
        for event in events {
            match event {
                Event::RoomCreated { id, name, kind, capacity, active }
                | Event::RoomUpdated { id, name, kind, capacity, active } => {
                    self.rooms.insert(
                        *id,
                        Room {
                            id: *id,
                            name: name.clone(),
                            kind: kind.clone(),
                            capacity: *capacity,
                            active: *active,
                        },
                    );
                }
                Event::RoomDeleted { id } => {
                    self.rooms.remove(id);
                }
                Event::RequesterRegistered { id, name } => {
                    self.requesters.insert(*id, name.clone());
                }
                Event::ReservationCreated { id, room_id, requester_id, span, purpose, status } => {
                    if !span.is_well_ordered() {
                        warn!(reservation_id = %id, %room_id, "replayed reservation has an unusable interval");
                    }
                    schedules
                        .entry(*room_id)
                        .or_insert_with(|| RoomSchedule::new(*room_id))
                        .insert_reservation(Reservation {
                            id: *id,
                            room_id: *room_id,
                            requester_id: *requester_id,
                            span: *span,
                            purpose: purpose.clone(),
                            status: *status,
                        });
                    self.reservation_room.insert(*id, *room_id);
                }
                Event::StatusChanged { id, room_id, status } => {
                    if let Some(r) = schedules.get_mut(room_id).and_then(|s| s.get_mut(id)) {
                        r.status = *status;
                    }
                }
            }
        }
        for (room_id, schedule) in schedules {
            self.schedules.insert(room_id, Arc::new(RwLock::new(schedule)));
        }
    }

    async fn persist(&self, event: &Event) -> Result<(), StoreError> {
        let Some(tx) = &self.wal_tx else {
            return Ok(());
        };
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Append {
            event: event.clone(),
            response,
        })
        .await
        .map_err(|_| writer_gone())?;
        rx.await
            .map_err(|_| writer_gone())?
            .map_err(|e| StoreError::Unavailable(format!("log append failed: {e}")))
    }

    fn schedule(&self, room_id: &RoomId) -> Option<SharedSchedule> {
        self.schedules.get(room_id).map(|e| e.value().clone())
    }

    fn schedule_or_create(&self, room_id: RoomId) -> SharedSchedule {
        self.schedules
            .entry(room_id)
            .or_insert_with(|| Arc::new(RwLock::new(RoomSchedule::new(room_id))))
            .value()
            .clone()
    }

    /// Snapshot all schedules without holding any map shard across an await.
    fn all_schedules(&self) -> Vec<SharedSchedule> {
        self.schedules.iter().map(|e| e.value().clone()).collect()
    }

    async fn collect<F>(&self, mut keep: F) -> Vec<Reservation>
    where
        F: FnMut(&Reservation) -> bool + Send,
    {
        let mut out = Vec::new();
        for schedule in self.all_schedules() {
            let guard = schedule.read().await;
            out.extend(guard.reservations.iter().filter(|r| keep(r)).cloned());
        }
        out
    }

    // ── Room directory administration ────────────────────────

    fn validate_room(room: &Room) -> Result<(), StoreError> {
        if room.name.len() > MAX_NAME_LEN {
            return Err(StoreError::Invalid("room name too long"));
        }
        if room.kind.len() > MAX_KIND_LEN {
            return Err(StoreError::Invalid("room kind too long"));
        }
        Ok(())
    }

    pub async fn create_room(&self, room: Room) -> Result<(), StoreError> {
        Self::validate_room(&room)?;
        let _gate = self.write_gate.read().await;
        if self.rooms.contains_key(&room.id) {
            return Err(StoreError::AlreadyExists(room.id));
        }
        let event = Event::RoomCreated {
            id: room.id,
            name: room.name.clone(),
            kind: room.kind.clone(),
            capacity: room.capacity,
            active: room.active,
        };
        self.persist(&event).await?;
        info!(room_id = %room.id, name = %room.name, "room created");
        self.rooms.insert(room.id, room);
        Ok(())
    }

    pub async fn update_room(&self, room: Room) -> Result<(), StoreError> {
        Self::validate_room(&room)?;
        let _gate = self.write_gate.read().await;
        if !self.rooms.contains_key(&room.id) {
            return Err(StoreError::NotFound(room.id));
        }
        let event = Event::RoomUpdated {
            id: room.id,
            name: room.name.clone(),
            kind: room.kind.clone(),
            capacity: room.capacity,
            active: room.active,
        };
        self.persist(&event).await?;
        self.rooms.insert(room.id, room);
        Ok(())
    }

    /// Remove a room from the directory. Refused while any pending or approved
    /// reservation still references it; rejected history is kept.
    pub async fn delete_room(&self, id: RoomId) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        if !self.rooms.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        // Hold the schedule so no reservation lands between check and delete.
        let schedule = self.schedule_or_create(id);
        let guard = schedule.write().await;
        if guard.has_active() {
            return Err(StoreError::RoomInUse(id));
        }
        self.persist(&Event::RoomDeleted { id }).await?;
        self.rooms.remove(&id);
        drop(guard);
        info!(room_id = %id, "room deleted");
        Ok(())
    }

    pub async fn register_requester(&self, id: RequesterId, name: String) -> Result<(), StoreError> {
        if name.len() > MAX_NAME_LEN {
            return Err(StoreError::Invalid("requester name too long"));
        }
        let _gate = self.write_gate.read().await;
        let event = Event::RequesterRegistered { id, name: name.clone() };
        self.persist(&event).await?;
        self.requesters.insert(id, name);
        Ok(())
    }

    // ── Log maintenance ──────────────────────────────────────

    /// Rewrite the log with the minimal event set that recreates current state.
    /// No-op for a volatile store.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(tx) = &self.wal_tx else {
            return Ok(());
        };
        let _gate = self.write_gate.write().await;

        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by_key(|r| r.id);
        let mut events: Vec<Event> = rooms
            .into_iter()
            .map(|r| Event::RoomCreated {
                id: r.id,
                name: r.name,
                kind: r.kind,
                capacity: r.capacity,
                active: r.active,
            })
            .collect();
        events.extend(self.requesters.iter().map(|e| Event::RequesterRegistered {
            id: *e.key(),
            name: e.value().clone(),
        }));
        for schedule in self.all_schedules() {
            let guard = schedule.read().await;
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                id: r.id,
                room_id: r.room_id,
                requester_id: r.requester_id,
                span: r.span,
                purpose: r.purpose.clone(),
                status: r.status,
            }));
        }

        let count = events.len();
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Rewrite { events, response })
            .await
            .map_err(|_| writer_gone())?;
        rx.await
            .map_err(|_| writer_gone())?
            .map_err(|e| StoreError::Unavailable(format!("log compaction failed: {e}")))?;
        info!(events = count, "log compacted");
        Ok(())
    }

    /// Appends since the last compaction; 0 for a volatile store.
    pub async fn appends_since_compact(&self) -> u64 {
        let Some(tx) = &self.wal_tx else {
            return 0;
        };
        let (response, rx) = oneshot::channel();
        if tx.send(WalCommand::AppendsSinceCompact { response }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert(&self, reservation: Reservation) -> Result<ReservationId, StoreError> {
        let _gate = self.write_gate.read().await;
        let schedule = self.schedule_or_create(reservation.room_id);
        let mut guard = schedule.write().await;
        // delete_room holds this same lock while it removes the room.
        if !self.rooms.contains_key(&reservation.room_id) {
            return Err(StoreError::NotFound(reservation.room_id));
        }
        if self.reservation_room.contains_key(&reservation.id) {
            return Err(StoreError::AlreadyExists(reservation.id));
        }
        let event = Event::ReservationCreated {
            id: reservation.id,
            room_id: reservation.room_id,
            requester_id: reservation.requester_id,
            span: reservation.span,
            purpose: reservation.purpose.clone(),
            status: reservation.status,
        };
        self.persist(&event).await?;
        let id = reservation.id;
        self.reservation_room.insert(id, reservation.room_id);
        guard.insert_reservation(reservation);
        Ok(id)
    }

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let Some(room_id) = self.reservation_room.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(schedule) = self.schedule(&room_id) else {
            return Ok(None);
        };
        let guard = schedule.read().await;
        Ok(guard.get(&id).cloned())
    }

    async fn find_overlapping(
        &self,
        room_id: RoomId,
        span: &Span,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError> {
        let Some(schedule) = self.schedule(&room_id) else {
            return Ok(Vec::new());
        };
        let guard = schedule.read().await;
        Ok(guard
            .overlapping(span)
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: ReservationId, status: ReservationStatus) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        let room_id = self
            .reservation_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))?;
        let schedule = self.schedule(&room_id).ok_or(StoreError::NotFound(id))?;
        let mut guard = schedule.write().await;
        if guard.get(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        self.persist(&Event::StatusChanged { id, room_id, status }).await?;
        if let Some(r) = guard.get_mut(&id) {
            r.status = status;
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.collect(|_| true).await)
    }

    async fn list_by_requester(&self, requester_id: RequesterId) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.collect(|r| r.requester_id == requester_id).await)
    }

    async fn list_by_month(&self, month: u32, year: i32) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .collect(|r| r.span.start.month() == month && r.span.start.year() == year)
            .await)
    }
}

#[async_trait]
impl RoomDirectory for MemoryStore {
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        // ULIDs sort by creation time.
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(&id).map(|e| e.value().clone()))
    }

    async fn requester_name(&self, id: RequesterId) -> Result<Option<String>, StoreError> {
        Ok(self.requesters.get(&id).map(|e| e.value().clone()))
    }

    async fn has_active_reservations(&self, room_id: RoomId) -> Result<bool, StoreError> {
        let Some(schedule) = self.schedule(&room_id) else {
            return Ok(false);
        };
        let guard = schedule.read().await;
        Ok(guard.has_active())
    }
}
