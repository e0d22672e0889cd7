use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use futures::future::join_all;
use ulid::Ulid;

use roombook::engine::{Engine, EngineError, SlotGrid, render_timetable};
use roombook::model::*;
use roombook::store::{LogStore, ReservationStore};

// ── Test infrastructure ──────────────────────────────────────

fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("roombook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

async fn setup(dir: &std::path::Path) -> (Arc<LogStore>, Engine, Vec<Resource>) {
    let store = Arc::new(LogStore::open(&dir.join("roombook.wal")).unwrap());
    let grid = SlotGrid::new(hm(9, 0), hm(17, 0), 60).unwrap();
    let engine = Engine::new(store.clone(), grid);
    let rooms = engine
        .seed_resources(&["Room A", "Room B", "Room C"])
        .await
        .unwrap();
    (store, engine, rooms)
}

fn request(room: &Resource, requester_id: RequesterId, start: NaiveTime, end: NaiveTime) -> NewReservation {
    NewReservation {
        resource_id: room.id,
        requester_id,
        topic: "Design review".into(),
        date: day(),
        span: Span::new(start, end),
        participants: vec!["Bob".into()],
    }
}

fn booked(tt: &Timetable, room: &str) -> Vec<Span> {
    tt.schedule(room)
        .unwrap()
        .entries
        .iter()
        .filter(|e| !e.is_free())
        .map(|e| e.slot.span)
        .collect()
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_single_booking_marks_one_slot() {
    let dir = test_dir();
    let (_store, engine, rooms) = setup(&dir).await;
    engine.reserve(request(&rooms[0], 1, hm(10, 0), hm(11, 0))).await.unwrap();

    let tt = engine.build_timetable_for_date(day()).await.unwrap();
    assert_eq!(booked(&tt, "Room A"), vec![Span::new(hm(10, 0), hm(11, 0))]);
    assert!(booked(&tt, "Room B").is_empty());
    assert!(booked(&tt, "Room C").is_empty());
    assert!(tt.schedules.iter().all(|s| s.entries.len() == 8));
}

#[tokio::test]
async fn scenario_b_overlapping_request_conflicts() {
    let dir = test_dir();
    let (_store, engine, rooms) = setup(&dir).await;
    let existing = engine.reserve(request(&rooms[0], 1, hm(10, 0), hm(11, 0))).await.unwrap();

    match engine.reserve(request(&rooms[0], 2, hm(10, 30), hm(11, 30))).await {
        Err(EngineError::Conflict(id)) => assert_eq!(id, existing.id),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_c_back_to_back_is_allowed() {
    let dir = test_dir();
    let (_store, engine, rooms) = setup(&dir).await;
    engine.reserve(request(&rooms[0], 1, hm(10, 0), hm(11, 0))).await.unwrap();
    engine.reserve(request(&rooms[0], 2, hm(11, 0), hm(12, 0))).await.unwrap();

    let tt = engine.build_timetable_for_date(day()).await.unwrap();
    assert_eq!(
        booked(&tt, "Room A"),
        vec![Span::new(hm(10, 0), hm(11, 0)), Span::new(hm(11, 0), hm(12, 0))]
    );
}

#[tokio::test]
async fn scenario_d_cancelling_someone_elses_booking_is_not_found() {
    let dir = test_dir();
    let (_store, engine, rooms) = setup(&dir).await;
    let mine = engine.reserve(request(&rooms[0], 1, hm(10, 0), hm(11, 0))).await.unwrap();

    assert!(matches!(
        engine.cancel(mine.id, 2).await,
        Err(EngineError::NotFound(id)) if id == mine.id
    ));
    // Still booked
    let tt = engine.build_timetable_for_date(day()).await.unwrap();
    assert_eq!(booked(&tt, "Room A").len(), 1);
}

// ── Concurrency ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_one_interval_yield_one_booking() {
    let dir = test_dir();
    let (store, _engine, rooms) = setup(&dir).await;
    let room = rooms[0].clone();

    let attempts = (0..32).map(|requester| {
        let store = store.clone();
        let req = request(&room, requester, hm(14, 0), hm(15, 0));
        tokio::spawn(async move { store.insert_reservation(req).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let won = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::Conflict(_))))
        .count();
    assert_eq!(won, 1);
    assert_eq!(conflicts, 31);
    assert_eq!(store.list_confirmed_reservations(day()).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_shifted_requests_never_overlap() {
    let dir = test_dir();
    let (store, engine, rooms) = setup(&dir).await;
    let room = rooms[1].clone();

    // 30-minute offsets of a one-hour booking: many pairs overlap
    let attempts = (0..14).map(|i| {
        let store = store.clone();
        let start = hm(9, 0) + chrono::TimeDelta::minutes(30 * i);
        let req = request(&room, i, start, start + chrono::TimeDelta::hours(1));
        tokio::spawn(async move { store.insert_reservation(req).await })
    });
    for joined in join_all(attempts).await {
        match joined.unwrap() {
            Ok(_) | Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let confirmed = store.list_confirmed_reservations(day()).await.unwrap();
    assert!(!confirmed.is_empty());
    for (i, a) in confirmed.iter().enumerate() {
        for b in &confirmed[i + 1..] {
            assert!(!a.span.overlaps(&b.span), "{} overlaps {}", a.span, b.span);
        }
    }
    let tt = engine.build_timetable_for_date(day()).await.unwrap();
    for entry in &tt.schedule("Room B").unwrap().entries {
        if let Some(r) = &entry.reservation {
            assert!(r.span.overlaps(&entry.slot.span));
        }
    }
}

// ── Durability ───────────────────────────────────────────────

#[tokio::test]
async fn timetable_survives_restart() {
    let dir = test_dir();
    let before = {
        let (_store, engine, rooms) = setup(&dir).await;
        engine.reserve(request(&rooms[0], 1, hm(10, 0), hm(11, 0))).await.unwrap();
        let gone = engine.reserve(request(&rooms[2], 1, hm(15, 0), hm(16, 0))).await.unwrap();
        engine.cancel(gone.id, 1).await.unwrap();
        render_timetable(&engine.build_timetable_for_date(day()).await.unwrap())
    };

    // Seeding again on restart must not duplicate rooms
    let (store, engine, rooms) = setup(&dir).await;
    assert_eq!(rooms.len(), 3);
    assert_eq!(store.list_active_resources().await.unwrap().len(), 3);
    let after = render_timetable(&engine.build_timetable_for_date(day()).await.unwrap());
    assert_eq!(before, after);

    store.compact_wal().await.unwrap();
    drop(engine);
    drop(store);
    let (_store, engine, _rooms) = setup(&dir).await;
    let compacted = render_timetable(&engine.build_timetable_for_date(day()).await.unwrap());
    assert_eq!(before, compacted);
}
