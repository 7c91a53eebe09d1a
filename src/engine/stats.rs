use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::model::*;

use super::conflict::compute_duration;
use super::{Engine, EngineError};

impl Engine {
    /// Point-in-time counters for the dashboard. "Today" is the injected clock's date.
    pub async fn compute_dashboard_stats(&self) -> Result<DashboardStats, EngineError> {
        let total_rooms = self.directory.list_rooms().await?.len();
        let reservations = self.store.list_all().await?;
        let today = self.clock.today();

        let rooms_in_use: HashSet<RoomId> = reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Approved && r.span.start.date() == today)
            .map(|r| r.room_id)
            .collect();

        Ok(DashboardStats {
            total_rooms,
            active_usage: rooms_in_use.len(),
            total_bookings: reservations.len(),
            pending_requests: reservations
                .iter()
                .filter(|r| r.status == ReservationStatus::Pending)
                .count(),
        })
    }

    /// Hours and count of approved reservations per room for one calendar
    /// month. Every directory room appears, idle ones with zeros.
    ///
    /// A reservation that cannot be counted (unusable interval, or a room the
    /// directory no longer knows) is logged and returned under `skipped`.
    pub async fn compute_monthly_usage(&self, month: u32, year: i32) -> Result<MonthlyUsage, EngineError> {
        let reservations = self.list_reservations_in_period(month, year).await?;
        let rooms = self.directory.list_rooms().await?;

        let mut totals: HashMap<RoomId, (f64, usize)> = rooms.iter().map(|r| (r.id, (0.0, 0))).collect();
        let mut skipped = Vec::new();

        for r in &reservations {
            let hours = match compute_duration(r.span.start, r.span.end) {
                Ok(hours) => hours,
                Err(e) => {
                    warn!(reservation_id = %r.id, room_id = %r.room_id, "skipping reservation in usage report: {e}");
                    skipped.push(SkippedReservation {
                        id: r.id,
                        room_id: r.room_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            match totals.get_mut(&r.room_id) {
                Some((total_hours, count)) => {
                    *total_hours += hours;
                    *count += 1;
                }
                None => {
                    warn!(reservation_id = %r.id, room_id = %r.room_id, "skipping reservation in usage report: unknown room");
                    skipped.push(SkippedReservation {
                        id: r.id,
                        room_id: r.room_id,
                        reason: "room not in directory".into(),
                    });
                }
            }
        }

        let rooms = rooms
            .into_iter()
            .map(|room| {
                let (total_hours, bookings) = totals.get(&room.id).copied().unwrap_or_default();
                RoomUsage {
                    room_id: room.id,
                    room_name: room.name,
                    kind: room.kind,
                    total_hours,
                    bookings,
                }
            })
            .collect();

        Ok(MonthlyUsage {
            month,
            year,
            rooms,
            skipped,
        })
    }
}
