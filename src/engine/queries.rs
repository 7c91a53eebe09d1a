use std::collections::HashMap;

use chrono::Datelike;

use crate::model::*;

use super::conflict::validate_period;
use super::{Engine, EngineError};

impl Engine {
    /// All reservations, or one requester's, joined with room and requester
    /// names. Newest start first.
    pub async fn list_reservations(
        &self,
        requester_id: Option<RequesterId>,
    ) -> Result<Vec<ReservationView>, EngineError> {
        let mut reservations = match requester_id {
            Some(id) => self.store.list_by_requester(id).await?,
            None => self.store.list_all().await?,
        };
        reservations.sort_by(|a, b| b.span.start.cmp(&a.span.start).then(b.id.cmp(&a.id)));

        let mut room_names: HashMap<RoomId, Option<String>> = HashMap::new();
        let mut requester_names: HashMap<RequesterId, Option<String>> = HashMap::new();
        let mut views = Vec::with_capacity(reservations.len());
        for reservation in reservations {
            if !room_names.contains_key(&reservation.room_id) {
                let name = self.directory.get_room(reservation.room_id).await?.map(|r| r.name);
                room_names.insert(reservation.room_id, name);
            }
            if !requester_names.contains_key(&reservation.requester_id) {
                let name = self.directory.requester_name(reservation.requester_id).await?;
                requester_names.insert(reservation.requester_id, name);
            }
            views.push(ReservationView {
                room_name: room_names[&reservation.room_id].clone(),
                requester_name: requester_names[&reservation.requester_id].clone(),
                reservation,
            });
        }
        Ok(views)
    }

    /// Approved reservations starting in the calendar month, oldest first.
    pub async fn list_reservations_in_period(&self, month: u32, year: i32) -> Result<Vec<Reservation>, EngineError> {
        validate_period(month, year)?;
        let mut reservations = self.store.list_by_month(month, year).await?;
        reservations.retain(|r| {
            r.status == ReservationStatus::Approved
                && r.span.start.month() == month
                && r.span.start.year() == year
        });
        reservations.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        Ok(reservations)
    }
}
