use super::*;
use crate::limits::*;
use crate::model::*;
use crate::store::ReservationStore;
use crate::time::{FixedClock, SystemClock};
use chrono::NaiveDate;
use std::path::PathBuf;
use ulid::Ulid;

fn at(month: u32, day: u32, hour: u32, min: u32) -> Timestamp {
    NaiveDate::from_ymd_opt(2026, month, day)
        .unwrap()
        .and_hms_opt(hour, min, 0)
        .unwrap()
}

fn span(start: Timestamp, end: Timestamp) -> Span {
    Span::new(start, end)
}

fn room(name: &str) -> Room {
    Room {
        id: Ulid::new(),
        name: name.into(),
        kind: "lab".into(),
        capacity: 30,
        active: true,
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    engine: Engine,
    room: Room,
    requester: RequesterId,
}

async fn fixture_with_clock(clock: Arc<dyn crate::time::Clock>) -> Fixture {
    let store = Arc::new(MemoryStore::in_memory());
    let room = room("Lab 1");
    store.create_room(room.clone()).await.unwrap();
    let requester = Ulid::new();
    store.register_requester(requester, "Ana".into()).await.unwrap();
    let engine = Engine::with_memory_store(store.clone(), clock);
    Fixture {
        store,
        engine,
        room,
        requester,
    }
}

async fn fixture() -> Fixture {
    fixture_with_clock(Arc::new(SystemClock)).await
}

impl Fixture {
    async fn book(&self, start: Timestamp, end: Timestamp) -> Result<ReservationId, EngineError> {
        self.engine
            .create_reservation(self.room.id, self.requester, start, end, "Seminar".into())
            .await
    }

    async fn book_approved(&self, start: Timestamp, end: Timestamp) -> ReservationId {
        let id = self.book(start, end).await.unwrap();
        self.engine.approve(id).await.unwrap();
        id
    }
}

// ── Pure functions ───────────────────────────────────────

#[test]
fn conflict_is_symmetric() {
    let cases = [
        (span(at(3, 1, 9, 0), at(3, 1, 11, 0)), span(at(3, 1, 10, 0), at(3, 1, 12, 0))),
        (span(at(3, 1, 9, 0), at(3, 1, 10, 0)), span(at(3, 1, 10, 0), at(3, 1, 11, 0))),
        (span(at(3, 1, 8, 0), at(3, 1, 18, 0)), span(at(3, 1, 12, 0), at(3, 1, 13, 0))),
        (span(at(3, 1, 8, 0), at(3, 1, 9, 0)), span(at(3, 2, 8, 0), at(3, 2, 9, 0))),
    ];
    for (a, b) in cases {
        assert_eq!(conflicts(&a, &b), conflicts(&b, &a), "{a:?} vs {b:?}");
    }
}

#[test]
fn touching_spans_do_not_conflict() {
    let morning = span(at(3, 1, 9, 0), at(3, 1, 10, 0));
    let late = span(at(3, 1, 10, 0), at(3, 1, 11, 0));
    assert!(!conflicts(&morning, &late));
    assert!(!conflicts(&late, &morning));
}

#[test]
fn partial_and_contained_overlap_conflict() {
    let existing = span(at(3, 1, 10, 0), at(3, 1, 12, 0));
    assert!(conflicts(&span(at(3, 1, 9, 0), at(3, 1, 11, 0)), &existing));
    assert!(conflicts(&span(at(3, 1, 11, 0), at(3, 1, 13, 0)), &existing));
    assert!(conflicts(&span(at(3, 1, 10, 30), at(3, 1, 11, 0)), &existing));
    assert!(conflicts(&span(at(3, 1, 8, 0), at(3, 1, 14, 0)), &existing));
    assert!(conflicts(&existing, &existing));
}

#[test]
fn duration_in_fractional_hours() {
    let hours = compute_duration_text("2026-03-01 09:00:00", "2026-03-01 10:30:00").unwrap();
    assert!((hours - 1.5).abs() < 1e-9);
    assert_eq!(compute_duration(at(3, 1, 9, 0), at(3, 1, 9, 15)).unwrap(), 0.25);
    assert_eq!(compute_duration(at(3, 1, 22, 0), at(3, 2, 2, 0)).unwrap(), 4.0);
}

#[test]
fn duration_accepts_rfc3339() {
    let hours = compute_duration_text("2026-03-01T09:00:00+02:00", "2026-03-01 08:00:00").unwrap();
    assert_eq!(hours, 1.0);
}

#[test]
fn reversed_or_empty_duration_is_invalid() {
    assert!(matches!(
        compute_duration_text("2026-03-01 10:00:00", "2026-03-01 09:00:00"),
        Err(EngineError::InvalidInterval(_))
    ));
    assert!(matches!(
        compute_duration(at(3, 1, 9, 0), at(3, 1, 9, 0)),
        Err(EngineError::InvalidInterval(_))
    ));
    assert!(matches!(
        compute_duration_text("tomorrow", "2026-03-01 09:00:00"),
        Err(EngineError::InvalidInterval(_))
    ));
}

#[test]
fn parse_span_validates_order() {
    let s = parse_span("2026-03-01 09:00:00", "2026-03-01 10:00:00").unwrap();
    assert_eq!(s, span(at(3, 1, 9, 0), at(3, 1, 10, 0)));
    assert!(parse_span("2026-03-01 10:00:00", "2026-03-01 10:00:00").is_err());
}

// ── Admission ────────────────────────────────────────────

#[tokio::test]
async fn new_reservation_is_pending() {
    let f = fixture().await;
    let id = f.book(at(3, 2, 9, 0), at(3, 2, 10, 0)).await.unwrap();
    let stored = f.store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReservationStatus::Pending);
    assert_eq!(stored.room_id, f.room.id);
    assert_eq!(stored.requester_id, f.requester);
    assert_eq!(stored.purpose, "Seminar");
}

#[tokio::test]
async fn conflict_with_pending_leaves_no_new_row() {
    let f = fixture().await;
    let first = f.book(at(3, 2, 9, 0), at(3, 2, 11, 0)).await.unwrap();

    let err = f.book(at(3, 2, 10, 0), at(3, 2, 12, 0)).await.unwrap_err();
    assert_eq!(err, EngineError::Conflict(first));
    assert_eq!(f.store.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn approved_reservation_still_blocks() {
    let f = fixture().await;
    let first = f.book_approved(at(3, 2, 9, 0), at(3, 2, 11, 0)).await;
    assert_eq!(
        f.book(at(3, 2, 8, 0), at(3, 2, 9, 30)).await,
        Err(EngineError::Conflict(first))
    );
}

#[tokio::test]
async fn rejected_reservation_frees_the_slot() {
    let f = fixture().await;
    let first = f.book(at(3, 2, 9, 0), at(3, 2, 11, 0)).await.unwrap();
    f.engine.reject(first).await.unwrap();

    assert!(f.engine.is_room_available(f.room.id, at(3, 2, 9, 0), at(3, 2, 11, 0)).await.unwrap());
    f.book(at(3, 2, 9, 0), at(3, 2, 11, 0)).await.unwrap();
}

#[tokio::test]
async fn back_to_back_bookings_admitted() {
    let f = fixture().await;
    f.book(at(3, 2, 9, 0), at(3, 2, 10, 0)).await.unwrap();
    f.book(at(3, 2, 10, 0), at(3, 2, 11, 0)).await.unwrap();
    f.book(at(3, 2, 8, 0), at(3, 2, 9, 0)).await.unwrap();
    assert_eq!(f.store.list_all().await.unwrap().len(), 3);
}

#[tokio::test]
async fn availability_is_per_room() {
    let f = fixture().await;
    let other = room("Lab 2");
    f.store.create_room(other.clone()).await.unwrap();
    f.book(at(3, 2, 9, 0), at(3, 2, 10, 0)).await.unwrap();

    assert!(!f.engine.is_room_available(f.room.id, at(3, 2, 9, 30), at(3, 2, 10, 30)).await.unwrap());
    assert!(f.engine.is_room_available(other.id, at(3, 2, 9, 30), at(3, 2, 10, 30)).await.unwrap());
}

#[tokio::test]
async fn availability_rejects_reversed_span() {
    let f = fixture().await;
    assert!(matches!(
        f.engine.is_room_available(f.room.id, at(3, 2, 10, 0), at(3, 2, 9, 0)).await,
        Err(EngineError::InvalidInterval(_))
    ));
}

#[tokio::test]
async fn availability_of_unknown_room_is_not_found() {
    let f = fixture().await;
    let ghost = Ulid::new();
    assert_eq!(
        f.engine.is_room_available(ghost, at(3, 2, 9, 0), at(3, 2, 10, 0)).await,
        Err(EngineError::NotFound(ghost))
    );
}

#[tokio::test]
async fn deleted_room_lock_is_pruned() {
    let f = fixture().await;
    let id = f.book(at(3, 2, 9, 0), at(3, 2, 10, 0)).await.unwrap();
    assert!(f.engine.room_locks.contains_key(&f.room.id));

    // Held lock survives a prune.
    let held = f.engine.room_lock(f.room.id);
    f.engine.forget_room(f.room.id);
    assert!(f.engine.room_locks.contains_key(&f.room.id));
    drop(held);

    f.engine.reject(id).await.unwrap();
    f.store.delete_room(f.room.id).await.unwrap();
    f.engine.forget_room(f.room.id);
    assert!(!f.engine.room_locks.contains_key(&f.room.id));
    assert_eq!(
        f.book(at(3, 2, 9, 0), at(3, 2, 10, 0)).await,
        Err(EngineError::NotFound(f.room.id))
    );
}

#[tokio::test]
async fn invalid_interval_rejected_before_store() {
    let f = fixture().await;
    assert!(matches!(
        f.book(at(3, 2, 10, 0), at(3, 2, 10, 0)).await,
        Err(EngineError::InvalidInterval(_))
    ));
    assert!(f.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_room_not_found() {
    let f = fixture().await;
    let ghost = Ulid::new();
    let err = f
        .engine
        .create_reservation(ghost, f.requester, at(3, 2, 9, 0), at(3, 2, 10, 0), String::new())
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::NotFound(ghost));
}

#[tokio::test]
async fn purpose_length_limit() {
    let f = fixture().await;
    let long = "x".repeat(MAX_PURPOSE_LEN + 1);
    let err = f
        .engine
        .create_reservation(f.room.id, f.requester, at(3, 2, 9, 0), at(3, 2, 10, 0), long)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let exact = "x".repeat(MAX_PURPOSE_LEN);
    f.engine
        .create_reservation(f.room.id, f.requester, at(3, 2, 9, 0), at(3, 2, 10, 0), exact)
        .await
        .unwrap();
}

// ── Status lifecycle ─────────────────────────────────────

#[tokio::test]
async fn set_status_is_idempotent() {
    let f = fixture().await;
    let id = f.book(at(3, 3, 9, 0), at(3, 3, 10, 0)).await.unwrap();
    f.engine.set_status(id, ReservationStatus::Approved).await.unwrap();
    f.engine.set_status(id, ReservationStatus::Approved).await.unwrap();
    assert_eq!(f.store.get(id).await.unwrap().unwrap().status, ReservationStatus::Approved);

    let pending = f.book(at(3, 3, 11, 0), at(3, 3, 12, 0)).await.unwrap();
    f.engine.set_status(pending, ReservationStatus::Pending).await.unwrap();
}

#[tokio::test]
async fn terminal_statuses_cannot_move() {
    let f = fixture().await;
    let approved = f.book_approved(at(3, 3, 9, 0), at(3, 3, 10, 0)).await;
    let rejected = f.book(at(3, 3, 11, 0), at(3, 3, 12, 0)).await.unwrap();
    f.engine.reject(rejected).await.unwrap();

    assert_eq!(
        f.engine.reject(approved).await,
        Err(EngineError::IllegalTransition {
            id: approved,
            from: ReservationStatus::Approved,
            to: ReservationStatus::Rejected,
        })
    );
    assert!(matches!(
        f.engine.set_status(approved, ReservationStatus::Pending).await,
        Err(EngineError::IllegalTransition { .. })
    ));
    assert!(matches!(
        f.engine.approve(rejected).await,
        Err(EngineError::IllegalTransition { .. })
    ));
}

#[tokio::test]
async fn set_status_unknown_id() {
    let f = fixture().await;
    let ghost = Ulid::new();
    assert_eq!(f.engine.approve(ghost).await, Err(EngineError::NotFound(ghost)));
}

// ── Listings ─────────────────────────────────────────────

#[tokio::test]
async fn listing_is_newest_first_with_names() {
    let f = fixture().await;
    let early = f.book(at(3, 1, 9, 0), at(3, 1, 10, 0)).await.unwrap();
    let late = f.book(at(3, 9, 9, 0), at(3, 9, 10, 0)).await.unwrap();
    let mid = f.book(at(3, 5, 9, 0), at(3, 5, 10, 0)).await.unwrap();

    let views = f.engine.list_reservations(None).await.unwrap();
    let ids: Vec<_> = views.iter().map(|v| v.reservation.id).collect();
    assert_eq!(ids, vec![late, mid, early]);
    assert!(views.iter().all(|v| v.room_name.as_deref() == Some("Lab 1")));
    assert!(views.iter().all(|v| v.requester_name.as_deref() == Some("Ana")));
}

#[tokio::test]
async fn listing_filters_by_requester() {
    let f = fixture().await;
    let other = Ulid::new();
    f.book(at(3, 1, 9, 0), at(3, 1, 10, 0)).await.unwrap();
    f.engine
        .create_reservation(f.room.id, other, at(3, 1, 10, 0), at(3, 1, 11, 0), "Club".into())
        .await
        .unwrap();

    let mine = f.engine.list_reservations(Some(f.requester)).await.unwrap();
    assert_eq!(mine.len(), 1);
    let theirs = f.engine.list_reservations(Some(other)).await.unwrap();
    assert_eq!(theirs.len(), 1);
    // Unregistered requester: row kept, name absent.
    assert_eq!(theirs[0].requester_name, None);
    assert_eq!(f.engine.list_reservations(Some(Ulid::new())).await.unwrap().len(), 0);
}

#[tokio::test]
async fn period_listing_is_approved_only_and_ascending() {
    let f = fixture().await;
    let b = f.book_approved(at(3, 20, 9, 0), at(3, 20, 10, 0)).await;
    let a = f.book_approved(at(3, 1, 0, 0), at(3, 1, 1, 0)).await;
    f.book(at(3, 10, 9, 0), at(3, 10, 10, 0)).await.unwrap();
    let rejected = f.book(at(3, 11, 9, 0), at(3, 11, 10, 0)).await.unwrap();
    f.engine.reject(rejected).await.unwrap();
    f.book_approved(at(4, 1, 0, 0), at(4, 1, 1, 0)).await;
    f.book_approved(at(2, 28, 23, 0), at(2, 28, 23, 30)).await;

    let march = f.engine.list_reservations_in_period(3, 2026).await.unwrap();
    let ids: Vec<_> = march.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![a, b]);
    assert!(f.engine.list_reservations_in_period(3, 2025).await.unwrap().is_empty());
}

#[tokio::test]
async fn period_month_out_of_range() {
    let f = fixture().await;
    assert_eq!(
        f.engine.list_reservations_in_period(13, 2026).await,
        Err(EngineError::InvalidPeriod { month: 13, year: 2026 })
    );
    assert!(matches!(
        f.engine.compute_monthly_usage(0, 2026).await,
        Err(EngineError::InvalidPeriod { .. })
    ));
}

// ── Stats ────────────────────────────────────────────────

#[tokio::test]
async fn monthly_usage_respects_month_boundaries() {
    let f = fixture().await;
    let idle = room("Hall");
    f.store.create_room(idle.clone()).await.unwrap();

    f.book_approved(at(3, 1, 0, 0), at(3, 1, 1, 30)).await;
    // Starts in February, ends on March 1: belongs to February only.
    f.book_approved(at(2, 28, 23, 0), at(3, 1, 0, 0)).await;
    // Starts in March, ends in April: counted in full for March.
    f.book_approved(at(3, 31, 23, 0), at(4, 1, 1, 0)).await;
    f.book_approved(at(4, 1, 1, 0), at(4, 1, 6, 0)).await;
    f.book(at(3, 5, 9, 0), at(3, 5, 12, 0)).await.unwrap();
    let rejected = f.book(at(3, 6, 9, 0), at(3, 6, 12, 0)).await.unwrap();
    f.engine.reject(rejected).await.unwrap();

    let usage = f.engine.compute_monthly_usage(3, 2026).await.unwrap();
    assert_eq!((usage.month, usage.year), (3, 2026));
    assert!(usage.skipped.is_empty());
    assert_eq!(usage.rooms.len(), 2);

    let lab = usage.rooms.iter().find(|r| r.room_id == f.room.id).unwrap();
    assert_eq!(lab.bookings, 2);
    assert!((lab.total_hours - 3.5).abs() < 1e-9);
    assert_eq!(lab.room_name, "Lab 1");

    let hall = usage.rooms.iter().find(|r| r.room_id == idle.id).unwrap();
    assert_eq!((hall.bookings, hall.total_hours), (0, 0.0));

    let april = f.engine.compute_monthly_usage(4, 2026).await.unwrap();
    let lab = april.rooms.iter().find(|r| r.room_id == f.room.id).unwrap();
    assert_eq!((lab.bookings, lab.total_hours), (1, 5.0));

    let february = f.engine.compute_monthly_usage(2, 2026).await.unwrap();
    let lab = february.rooms.iter().find(|r| r.room_id == f.room.id).unwrap();
    assert_eq!((lab.bookings, lab.total_hours), (1, 1.0));
}

#[tokio::test]
async fn monthly_usage_skips_uncountable_rows() {
    let f = fixture().await;
    f.book_approved(at(5, 2, 9, 0), at(5, 2, 10, 0)).await;

    // Rows written behind the engine's back: a reversed span, and a room the
    // store knows but the engine's directory does not.
    let annex = room("Annex");
    f.store.create_room(annex.clone()).await.unwrap();
    let reversed = Reservation {
        id: Ulid::new(),
        room_id: f.room.id,
        requester_id: f.requester,
        span: Span::unchecked(at(5, 3, 10, 0), at(5, 3, 9, 0)),
        purpose: String::new(),
        status: ReservationStatus::Approved,
    };
    let orphan = Reservation {
        id: Ulid::new(),
        room_id: annex.id,
        requester_id: f.requester,
        span: span(at(5, 4, 9, 0), at(5, 4, 10, 0)),
        purpose: String::new(),
        status: ReservationStatus::Approved,
    };
    f.store.insert(reversed.clone()).await.unwrap();
    f.store.insert(orphan.clone()).await.unwrap();

    let directory = Arc::new(MemoryStore::in_memory());
    directory.create_room(f.room.clone()).await.unwrap();
    let engine = Engine::new(f.store.clone(), directory, Arc::new(SystemClock));

    let usage = engine.compute_monthly_usage(5, 2026).await.unwrap();
    assert_eq!(usage.rooms.len(), 1);
    let lab = usage.rooms.iter().find(|r| r.room_id == f.room.id).unwrap();
    assert_eq!((lab.bookings, lab.total_hours), (1, 1.0));

    let mut skipped: Vec<_> = usage.skipped.iter().map(|s| s.id).collect();
    skipped.sort();
    let mut expected = vec![reversed.id, orphan.id];
    expected.sort();
    assert_eq!(skipped, expected);
}

#[tokio::test]
async fn dashboard_counts_today_from_clock() {
    let f = fixture_with_clock(Arc::new(FixedClock(at(6, 10, 12, 0)))).await;
    let second = room("Studio");
    f.store.create_room(second.clone()).await.unwrap();

    f.book_approved(at(6, 10, 8, 0), at(6, 10, 9, 0)).await;
    f.book_approved(at(6, 10, 14, 0), at(6, 10, 15, 0)).await;
    f.book_approved(at(6, 11, 8, 0), at(6, 11, 9, 0)).await;
    f.book(at(6, 10, 16, 0), at(6, 10, 17, 0)).await.unwrap();
    f.engine
        .create_reservation(second.id, f.requester, at(6, 10, 9, 0), at(6, 10, 10, 0), String::new())
        .await
        .unwrap();

    let stats = f.engine.compute_dashboard_stats().await.unwrap();
    assert_eq!(
        stats,
        DashboardStats {
            total_rooms: 2,
            active_usage: 1,
            total_bookings: 5,
            pending_requests: 2,
        }
    );
}

#[tokio::test]
async fn dashboard_on_empty_store() {
    let store = Arc::new(MemoryStore::in_memory());
    let engine = Engine::with_memory_store(store, Arc::new(FixedClock(at(1, 1, 0, 0))));
    let stats = engine.compute_dashboard_stats().await.unwrap();
    assert_eq!(stats.total_rooms, 0);
    assert_eq!(stats.total_bookings, 0);
}

// ── Durability through the engine ────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roomslot_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

#[tokio::test]
async fn admitted_state_survives_reopen() {
    let path = test_wal_path("engine_reopen.wal");
    let hall = room("Hall");
    let (kept, dropped) = {
        let store = Arc::new(MemoryStore::open(&path).unwrap());
        store.create_room(hall.clone()).await.unwrap();
        let engine = Engine::with_memory_store(store, Arc::new(SystemClock));
        let kept = engine
            .create_reservation(hall.id, Ulid::new(), at(7, 1, 9, 0), at(7, 1, 10, 0), "Talk".into())
            .await
            .unwrap();
        let dropped = engine
            .create_reservation(hall.id, Ulid::new(), at(7, 1, 10, 0), at(7, 1, 11, 0), "Talk".into())
            .await
            .unwrap();
        engine.approve(kept).await.unwrap();
        engine.reject(dropped).await.unwrap();
        (kept, dropped)
    };

    let store = Arc::new(MemoryStore::open(&path).unwrap());
    let engine = Engine::with_memory_store(store, Arc::new(SystemClock));
    assert!(!engine.is_room_available(hall.id, at(7, 1, 9, 30), at(7, 1, 9, 45)).await.unwrap());
    assert!(engine.is_room_available(hall.id, at(7, 1, 10, 0), at(7, 1, 11, 0)).await.unwrap());
    let july = engine.list_reservations_in_period(7, 2026).await.unwrap();
    assert_eq!(july.iter().map(|r| r.id).collect::<Vec<_>>(), vec![kept]);
    assert!(matches!(
        engine.approve(dropped).await,
        Err(EngineError::IllegalTransition { .. })
    ));
}
