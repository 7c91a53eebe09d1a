use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{conflicts, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// True iff no pending or approved reservation on the room conflicts with
    /// `[start, end)`. Rejected reservations never block. An unknown room is
    /// `NotFound`, as it is for admission.
    pub async fn is_room_available(
        &self,
        room_id: RoomId,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<bool, EngineError> {
        let span = validate_span(start, end)?;
        self.require_room(room_id).await?;
        Ok(self.first_conflict(room_id, &span).await?.is_none())
    }

    async fn require_room(&self, room_id: RoomId) -> Result<(), EngineError> {
        match self.directory.get_room(room_id).await? {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(room_id)),
        }
    }

    /// The store may over-approximate; the overlap rule is decided here.
    async fn first_conflict(&self, room_id: RoomId, span: &Span) -> Result<Option<ReservationId>, EngineError> {
        let candidates = self
            .store
            .find_overlapping(room_id, span, &ReservationStatus::ACTIVE)
            .await?;
        Ok(candidates
            .iter()
            .filter(|r| r.room_id == room_id && r.status.is_active())
            .find(|r| conflicts(span, &r.span))
            .map(|r| r.id))
    }

    /// Admit a new reservation as `pending` and return its id.
    ///
    /// Validation runs before anything touches the store. The availability
    /// check and the insert run under the room's admission lock, so two
    /// overlapping requests for one room cannot both be admitted.
    pub async fn create_reservation(
        &self,
        room_id: RoomId,
        requester_id: RequesterId,
        start: Timestamp,
        end: Timestamp,
        purpose: String,
    ) -> Result<ReservationId, EngineError> {
        let started = Instant::now();
        let result = self.admit(room_id, requester_id, start, end, purpose).await;
        metrics::counter!(
            observability::ADMISSIONS_TOTAL,
            "outcome" => observability::admission_outcome(&result)
        )
        .increment(1);
        metrics::histogram!(observability::ADMISSION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn admit(
        &self,
        room_id: RoomId,
        requester_id: RequesterId,
        start: Timestamp,
        end: Timestamp,
        purpose: String,
    ) -> Result<ReservationId, EngineError> {
        let span = validate_span(start, end)?;
        if purpose.len() > MAX_PURPOSE_LEN {
            return Err(EngineError::LimitExceeded("purpose too long"));
        }
        self.require_room(room_id).await?;

        let lock = self.room_lock(room_id);
        let _admission = lock.lock().await;

        if let Some(blocking) = self.first_conflict(room_id, &span).await? {
            info!(%room_id, %blocking, start = %span.start, end = %span.end, "reservation refused: slot taken");
            return Err(EngineError::Conflict(blocking));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            room_id,
            requester_id,
            span,
            purpose,
            status: ReservationStatus::Pending,
        };
        let id = self.store.insert(reservation).await?;
        info!(reservation_id = %id, %room_id, %requester_id, start = %span.start, end = %span.end, "reservation admitted");
        Ok(id)
    }

    /// Move a reservation along `pending -> {approved, rejected}`.
    ///
    /// Re-applying the current status succeeds without writing anything.
    /// Leaving a terminal status, or returning to pending, is refused.
    pub async fn set_status(&self, id: ReservationId, status: ReservationStatus) -> Result<(), EngineError> {
        let room_id = self
            .store
            .get(id)
            .await?
            .ok_or(EngineError::NotFound(id))?
            .room_id;

        // Same lock as admission: concurrent approve/reject cannot both win.
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        let current = self.store.get(id).await?.ok_or(EngineError::NotFound(id))?;
        if current.status == status {
            debug!(reservation_id = %id, %status, "status unchanged");
            return Ok(());
        }
        if !current.status.can_transition_to(status) {
            return Err(EngineError::IllegalTransition {
                id,
                from: current.status,
                to: status,
            });
        }

        self.store.update_status(id, status).await?;
        metrics::counter!(observability::STATUS_CHANGES_TOTAL, "status" => status.as_str()).increment(1);
        info!(reservation_id = %id, %room_id, from = %current.status, to = %status, "reservation status changed");
        Ok(())
    }

    pub async fn approve(&self, id: ReservationId) -> Result<(), EngineError> {
        self.set_status(id, ReservationStatus::Approved).await
    }

    pub async fn reject(&self, id: ReservationId) -> Result<(), EngineError> {
        self.set_status(id, ReservationStatus::Rejected).await
    }
}
