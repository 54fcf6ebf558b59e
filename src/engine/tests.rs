use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;

use super::*;

const DAY: Ms = 86_400_000;
// A fixed moment well inside the valid timestamp range.
const BASE: Ms = 1_760_000_000_000;

fn test_wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join("kenneld_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{}.wal", Ulid::new()))
}

fn new_engine(path: &PathBuf) -> Engine {
    Engine::new(path.clone(), Arc::new(NotifyHub::default())).unwrap()
}

fn days(from: i64, to: i64) -> Span {
    Span::new(BASE + from * DAY, BASE + to * DAY)
}

async fn add_kennel(engine: &Engine, number: &str) -> Ulid {
    let id = Ulid::new();
    engine
        .create_kennel(id, number.into(), KennelSize::Medium, None)
        .await
        .unwrap();
    id
}

async fn add_dog(engine: &Engine, name: &str) -> Ulid {
    let id = Ulid::new();
    engine
        .register_dog(id, name.into(), "Border Collie".into())
        .await
        .unwrap();
    id
}

async fn book(engine: &Engine, dog_id: Ulid, kennel_id: Ulid, from: i64, to: i64) -> Ulid {
    let id = Ulid::new();
    engine
        .create_booking(id, dog_id, kennel_id, days(from, to), None, 10_000)
        .await
        .unwrap();
    id
}

async fn occupied(engine: &Engine, kennel_id: Ulid) -> bool {
    engine.kennel_info_for(kennel_id).await.unwrap().occupied
}

// ── Creation and the overlap guard ───────────────────────────────

#[tokio::test]
async fn new_booking_starts_pending() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let b = book(&engine, d, k, 0, 3).await;
    let booking = engine.get_booking(b).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.total_cost_cents, 10_000);
    assert!(booking.updated_at.is_none());
    assert!(!occupied(&engine, k).await);
}

#[tokio::test]
async fn overlapping_booking_rejected_with_conflicting_id() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let existing = book(&engine, d, k, 2, 5).await;
    let err = engine
        .create_booking(Ulid::new(), d, k, days(4, 7), None, 0)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Conflict(existing));
}

#[tokio::test]
async fn back_to_back_bookings_allowed() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    book(&engine, d, k, 0, 3).await;
    // Checkout day == check-in day: half-open spans don't touch.
    book(&engine, d, k, 3, 6).await;
    book(&engine, d, k, 6, 9).await;
    assert_eq!(engine.bookings_for_kennel(k, None).await.len(), 3);
}

#[tokio::test]
async fn cancelled_booking_frees_its_dates() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let b = book(&engine, d, k, 0, 5).await;
    engine
        .set_booking_status(b, BookingStatus::Cancelled)
        .await
        .unwrap();
    // Same dates are bookable again.
    book(&engine, d, k, 0, 5).await;
}

#[tokio::test]
async fn duplicate_booking_id_rejected() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let id = Ulid::new();
    engine
        .create_booking(id, d, k, days(0, 2), None, 0)
        .await
        .unwrap();
    let err = engine
        .create_booking(id, d, k, days(10, 12), None, 0)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::AlreadyExists(id));
}

#[tokio::test]
async fn booking_requires_known_dog_and_kennel() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let ghost = Ulid::new();
    assert_eq!(
        engine
            .create_booking(Ulid::new(), ghost, k, days(0, 2), None, 0)
            .await
            .unwrap_err(),
        EngineError::NotFound(ghost)
    );
    assert_eq!(
        engine
            .create_booking(Ulid::new(), d, ghost, days(0, 2), None, 0)
            .await
            .unwrap_err(),
        EngineError::NotFound(ghost)
    );
}

#[tokio::test]
async fn malformed_spans_rejected() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let backwards = Span { start: BASE + DAY, end: BASE };
    assert!(matches!(
        engine
            .create_booking(Ulid::new(), d, k, backwards, None, 0)
            .await,
        Err(EngineError::LimitExceeded(_))
    ));

    let too_long = Span { start: BASE, end: BASE + 400 * DAY };
    assert!(matches!(
        engine
            .create_booking(Ulid::new(), d, k, too_long, None, 0)
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Updates ──────────────────────────────────────────────────────

#[tokio::test]
async fn update_excludes_own_booking_from_the_guard() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let b = book(&engine, d, k, 0, 5).await;
    // Shifting within its own window overlaps the old span of the same
    // booking; the guard must not count that as a conflict.
    let updated = engine
        .update_booking(b, d, k, days(1, 6), None, 12_000)
        .await
        .unwrap();
    assert_eq!(updated.span, days(1, 6));
    assert_eq!(updated.total_cost_cents, 12_000);
    assert!(updated.updated_at.is_some());
}

#[tokio::test]
async fn update_rejects_overlap_with_another_booking() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let other = book(&engine, d, k, 5, 8).await;
    let b = book(&engine, d, k, 0, 3).await;
    let err = engine
        .update_booking(b, d, k, days(2, 6), None, 0)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Conflict(other));
    // The original span is untouched after the failed update.
    assert_eq!(engine.get_booking(b).await.unwrap().span, days(0, 3));
}

#[tokio::test]
async fn update_preserves_status_and_created_at() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let b = book(&engine, d, k, 0, 5).await;
    engine
        .set_booking_status(b, BookingStatus::Confirmed)
        .await
        .unwrap();
    let before = engine.get_booking(b).await.unwrap();

    let after = engine
        .update_booking(b, d, k, days(1, 6), Some("grain-free diet".into()), 0)
        .await
        .unwrap();
    assert_eq!(after.status, BookingStatus::Confirmed);
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(after.special_requirements.as_deref(), Some("grain-free diet"));
}

// ── Status graph and occupancy ───────────────────────────────────

#[tokio::test]
async fn check_in_occupies_and_check_out_frees() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;
    let b = book(&engine, d, k, 0, 3).await;

    engine.set_booking_status(b, BookingStatus::Confirmed).await.unwrap();
    assert!(!occupied(&engine, k).await, "confirmed alone never occupies");

    engine.set_booking_status(b, BookingStatus::CheckedIn).await.unwrap();
    assert!(occupied(&engine, k).await);

    engine.set_booking_status(b, BookingStatus::CheckedOut).await.unwrap();
    assert!(!occupied(&engine, k).await);
}

#[tokio::test]
async fn illegal_transitions_rejected() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;
    let b = book(&engine, d, k, 0, 3).await;

    // Pending cannot skip straight to CheckedIn or CheckedOut.
    for to in [BookingStatus::CheckedIn, BookingStatus::CheckedOut] {
        assert_eq!(
            engine.set_booking_status(b, to).await.unwrap_err(),
            EngineError::InvalidTransition { from: BookingStatus::Pending, to }
        );
    }

    engine.set_booking_status(b, BookingStatus::Confirmed).await.unwrap();
    engine.set_booking_status(b, BookingStatus::CheckedIn).await.unwrap();
    // A dog on site cannot be cancelled, only checked out.
    assert_eq!(
        engine
            .set_booking_status(b, BookingStatus::Cancelled)
            .await
            .unwrap_err(),
        EngineError::InvalidTransition {
            from: BookingStatus::CheckedIn,
            to: BookingStatus::Cancelled
        }
    );

    engine.set_booking_status(b, BookingStatus::CheckedOut).await.unwrap();
    // CheckedOut is terminal.
    for to in [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::CheckedIn,
        BookingStatus::Cancelled,
    ] {
        assert!(engine.set_booking_status(b, to).await.is_err());
    }
}

#[tokio::test]
async fn occupancy_recompute_writes_only_on_flips() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;
    let b = book(&engine, d, k, 0, 3).await;
    engine.set_booking_status(b, BookingStatus::Confirmed).await.unwrap();
    engine.set_booking_status(b, BookingStatus::CheckedIn).await.unwrap();

    let before = engine.wal_appends_since_compact().await;
    // A cost-only update recomputes occupancy but the flag stays true, so
    // exactly one record (the update itself) hits the log.
    engine
        .update_booking(b, d, k, days(0, 3), None, 99_000)
        .await
        .unwrap();
    let after = engine.wal_appends_since_compact().await;
    assert_eq!(after, before + 1);
    assert!(occupied(&engine, k).await);
}

#[tokio::test]
async fn moving_checked_in_booking_swaps_occupancy() {
    let engine = new_engine(&test_wal_path());
    let a = add_kennel(&engine, "K001").await;
    let b_kennel = add_kennel(&engine, "K002").await;
    let d = add_dog(&engine, "Rex").await;

    let b = book(&engine, d, a, 0, 5).await;
    engine.set_booking_status(b, BookingStatus::Confirmed).await.unwrap();
    engine.set_booking_status(b, BookingStatus::CheckedIn).await.unwrap();
    assert!(occupied(&engine, a).await);
    assert!(!occupied(&engine, b_kennel).await);

    let moved = engine
        .update_booking(b, d, b_kennel, days(0, 5), None, 10_000)
        .await
        .unwrap();
    assert_eq!(moved.kennel_id, b_kennel);
    assert_eq!(moved.status, BookingStatus::CheckedIn);
    assert!(!occupied(&engine, a).await, "old kennel freed");
    assert!(occupied(&engine, b_kennel).await, "new kennel occupied");
    assert_eq!(engine.kennel_for_booking(&b), Some(b_kennel));
}

#[tokio::test]
async fn move_keeps_old_kennel_occupied_by_remaining_guest() {
    let engine = new_engine(&test_wal_path());
    let a = add_kennel(&engine, "K001").await;
    let b_kennel = add_kennel(&engine, "K002").await;
    let d1 = add_dog(&engine, "Rex").await;
    let d2 = add_dog(&engine, "Bella").await;

    let staying = book(&engine, d1, a, 0, 5).await;
    let moving = book(&engine, d2, a, 5, 10).await;
    for b in [staying, moving] {
        engine.set_booking_status(b, BookingStatus::Confirmed).await.unwrap();
        engine.set_booking_status(b, BookingStatus::CheckedIn).await.unwrap();
    }

    engine
        .update_booking(moving, d2, b_kennel, days(5, 10), None, 0)
        .await
        .unwrap();
    assert!(occupied(&engine, a).await, "other checked-in guest remains");
    assert!(occupied(&engine, b_kennel).await);
}

#[tokio::test]
async fn move_rejected_when_target_kennel_conflicts() {
    let engine = new_engine(&test_wal_path());
    let a = add_kennel(&engine, "K001").await;
    let b_kennel = add_kennel(&engine, "K002").await;
    let d = add_dog(&engine, "Rex").await;

    let blocker = book(&engine, d, b_kennel, 0, 5).await;
    let b = book(&engine, d, a, 0, 5).await;
    let err = engine
        .update_booking(b, d, b_kennel, days(0, 5), None, 0)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Conflict(blocker));
    // The booking never left its kennel.
    assert_eq!(engine.kennel_for_booking(&b), Some(a));
}

// ── Deletion ─────────────────────────────────────────────────────

#[tokio::test]
async fn delete_booking_clears_occupancy() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;
    let b = book(&engine, d, k, 0, 3).await;
    engine.set_booking_status(b, BookingStatus::Confirmed).await.unwrap();
    engine.set_booking_status(b, BookingStatus::CheckedIn).await.unwrap();

    let kennel_id = engine.delete_booking(b).await.unwrap();
    assert_eq!(kennel_id, k);
    assert!(!occupied(&engine, k).await);
    assert!(engine.get_booking(b).await.is_none());
    assert_eq!(
        engine.delete_booking(b).await.unwrap_err(),
        EngineError::NotFound(b)
    );
}

#[tokio::test]
async fn delete_kennel_with_bookings_rejected() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;
    let b = book(&engine, d, k, 0, 3).await;

    assert_eq!(
        engine.delete_kennel(k).await.unwrap_err(),
        EngineError::HasBookings(k)
    );
    engine.delete_booking(b).await.unwrap();
    engine.delete_kennel(k).await.unwrap();
    assert!(engine.kennel_info_for(k).await.is_none());
}

#[tokio::test]
async fn remove_dog_with_bookings_rejected() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;
    let b = book(&engine, d, k, 0, 3).await;

    assert_eq!(
        engine.remove_dog(d).await.unwrap_err(),
        EngineError::HasBookings(d)
    );
    engine.delete_booking(b).await.unwrap();
    engine.remove_dog(d).await.unwrap();
    assert!(engine.get_dog(&d).is_none());
}

// ── Queries ──────────────────────────────────────────────────────

#[tokio::test]
async fn available_kennels_filters_conflicting_dates() {
    let engine = new_engine(&test_wal_path());
    let free = add_kennel(&engine, "K001").await;
    let busy = add_kennel(&engine, "K002").await;
    let d = add_dog(&engine, "Rex").await;
    book(&engine, d, busy, 0, 5).await;

    let available = engine.available_kennels(days(2, 4)).await;
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].id, free);

    // Outside the busy window both are available.
    assert_eq!(engine.available_kennels(days(5, 7)).await.len(), 2);

    assert!(!engine.check_availability(busy, days(2, 4), None).await.unwrap());
    assert!(engine.check_availability(free, days(2, 4), None).await.unwrap());
    let ghost = Ulid::new();
    assert_eq!(
        engine.check_availability(ghost, days(0, 1), None).await.unwrap_err(),
        EngineError::NotFound(ghost)
    );
}

#[tokio::test]
async fn bookings_for_kennel_can_exclude_a_status() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let cancelled = book(&engine, d, k, 0, 3).await;
    engine.set_booking_status(cancelled, BookingStatus::Cancelled).await.unwrap();
    let live = book(&engine, d, k, 0, 3).await;

    let all = engine.bookings_for_kennel(k, None).await;
    assert_eq!(all.len(), 2);
    let active = engine
        .bookings_for_kennel(k, Some(BookingStatus::Cancelled))
        .await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, live);
}

// ── Durability ───────────────────────────────────────────────────

#[tokio::test]
async fn replay_rebuilds_state_and_occupancy() {
    let path = test_wal_path();
    let (k1, k2, d, checked_in, pending);
    {
        let engine = new_engine(&path);
        k1 = add_kennel(&engine, "K001").await;
        k2 = add_kennel(&engine, "K002").await;
        d = add_dog(&engine, "Rex").await;
        checked_in = book(&engine, d, k1, 0, 5).await;
        pending = book(&engine, d, k2, 0, 5).await;
        engine.set_booking_status(checked_in, BookingStatus::Confirmed).await.unwrap();
        engine.set_booking_status(checked_in, BookingStatus::CheckedIn).await.unwrap();
    }

    let engine = new_engine(&path);
    assert_eq!(engine.list_kennels().await.len(), 2);
    assert_eq!(engine.list_dogs().len(), 1);
    let b = engine.get_booking(checked_in).await.unwrap();
    assert_eq!(b.status, BookingStatus::CheckedIn);
    assert_eq!(b.span, days(0, 5));
    assert_eq!(engine.get_booking(pending).await.unwrap().status, BookingStatus::Pending);
    assert!(occupied(&engine, k1).await);
    assert!(!occupied(&engine, k2).await);
}

#[tokio::test]
async fn replay_follows_kennel_moves() {
    let path = test_wal_path();
    let (k1, k2, d, b);
    {
        let engine = new_engine(&path);
        k1 = add_kennel(&engine, "K001").await;
        k2 = add_kennel(&engine, "K002").await;
        d = add_dog(&engine, "Rex").await;
        b = book(&engine, d, k1, 0, 5).await;
        engine.set_booking_status(b, BookingStatus::Confirmed).await.unwrap();
        engine.set_booking_status(b, BookingStatus::CheckedIn).await.unwrap();
        engine.update_booking(b, d, k2, days(0, 5), None, 0).await.unwrap();
    }

    let engine = new_engine(&path);
    assert_eq!(engine.kennel_for_booking(&b), Some(k2));
    let booking = engine.get_booking(b).await.unwrap();
    assert_eq!(booking.status, BookingStatus::CheckedIn);
    assert!(!occupied(&engine, k1).await);
    assert!(occupied(&engine, k2).await);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path();
    let (k, d, kept);
    {
        let engine = new_engine(&path);
        k = add_kennel(&engine, "K001").await;
        d = add_dog(&engine, "Rex").await;
        // Churn that compaction should erase from the log.
        let doomed = book(&engine, d, k, 10, 12).await;
        engine.delete_booking(doomed).await.unwrap();
        kept = book(&engine, d, k, 0, 5).await;
        engine.set_booking_status(kept, BookingStatus::Confirmed).await.unwrap();
        engine.set_booking_status(kept, BookingStatus::CheckedIn).await.unwrap();

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = new_engine(&path);
    assert_eq!(engine.list_bookings().await.len(), 1);
    let b = engine.get_booking(kept).await.unwrap();
    assert_eq!(b.status, BookingStatus::CheckedIn);
    assert!(occupied(&engine, k).await);
}

#[tokio::test]
async fn failed_create_releases_its_id() {
    let engine = new_engine(&test_wal_path());
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;
    book(&engine, d, k, 0, 5).await;

    // A create that loses to the overlap guard must not burn its id.
    let id = Ulid::new();
    assert!(matches!(
        engine.create_booking(id, d, k, days(2, 4), None, 0).await,
        Err(EngineError::Conflict(_))
    ));
    assert_eq!(engine.kennel_for_booking(&id), None);
    engine
        .create_booking(id, d, k, days(5, 8), None, 0)
        .await
        .unwrap();
    assert_eq!(engine.kennel_for_booking(&id), Some(k));
}

// ── Concurrency ──────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_overlapping_creates_admit_exactly_one() {
    let engine = Arc::new(new_engine(&test_wal_path()));
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(Ulid::new(), d, k, days(0, 5), None, 0)
                .await
        }));
    }

    let mut wins = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => wins += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1, "exactly one of the racing creates may succeed");
    assert_eq!(engine.bookings_for_kennel(k, None).await.len(), 1);
}

#[tokio::test]
async fn concurrent_same_id_creates_admit_exactly_one() {
    let engine = Arc::new(new_engine(&test_wal_path()));
    let k1 = add_kennel(&engine, "K001").await;
    let k2 = add_kennel(&engine, "K002").await;
    let d = add_dog(&engine, "Rex").await;

    // Same booking id racing onto different kennels with disjoint dates:
    // the id reservation, not the overlap guard, must break the tie.
    let id = Ulid::new();
    let a = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.create_booking(id, d, k1, days(0, 2), None, 0).await })
    };
    let b = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.create_booking(id, d, k2, days(5, 7), None, 0).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(EngineError::AlreadyExists(e)) if *e == id)));
    let booking = engine.get_booking(id).await.unwrap();
    assert_eq!(engine.kennel_for_booking(&id), Some(booking.kennel_id));
}

#[tokio::test]
async fn create_racing_kennel_deletion_is_refused() {
    let engine = Arc::new(new_engine(&test_wal_path()));
    let k = add_kennel(&engine, "K001").await;
    let d = add_dog(&engine, "Rex").await;

    // Pin the kennel's lock so both tasks queue behind it, deletion first
    // (the lock hands out fairly, in arrival order). The create fetches the
    // kennel's Arc while it is still mapped, then wakes after the deletion
    // committed — exactly the window where it must not acknowledge a
    // booking into an orphaned kennel.
    let ks = engine.get_kennel(&k).unwrap();
    let pin = ks.write_owned().await;

    let deletion = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.delete_kennel(k).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let creation = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .create_booking(Ulid::new(), d, k, days(0, 3), None, 0)
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    drop(pin);

    deletion.await.unwrap().unwrap();
    assert_eq!(
        creation.await.unwrap().unwrap_err(),
        EngineError::NotFound(k)
    );
    assert!(engine.list_bookings().await.is_empty());
    // No index entry leaked for the refused booking.
    assert!(engine.booking_to_kennel.is_empty());
}

#[tokio::test]
async fn status_change_follows_a_concurrent_move() {
    let engine = Arc::new(new_engine(&test_wal_path()));
    let k1 = add_kennel(&engine, "K001").await;
    let k2 = add_kennel(&engine, "K002").await;
    let d = add_dog(&engine, "Rex").await;
    let b = book(&engine, d, k1, 0, 5).await;

    // Pin the old kennel and relocate the booking while a status change is
    // queued on it: the waiter looked the kennel up before the move landed
    // and must chase the booking to its new home instead of reporting
    // NotFound.
    let ks1 = engine.get_kennel(&k1).unwrap();
    let mut pin = ks1.write_owned().await;
    let status_change = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.set_booking_status(b, BookingStatus::Confirmed).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let moved = pin.remove_booking(b).unwrap();
    {
        let ks2 = engine.get_kennel(&k2).unwrap();
        let mut g2 = ks2.write().await;
        g2.insert_booking(Booking { kennel_id: k2, ..moved });
    }
    engine.booking_to_kennel.insert(b, k2);
    drop(pin);

    let booking = status_change.await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.kennel_id, k2);
}

#[tokio::test]
async fn compaction_never_drops_acknowledged_writes() {
    let path = test_wal_path();
    let mut ids = Vec::new();
    {
        let engine = Arc::new(new_engine(&path));
        let k = add_kennel(&engine, "K001").await;
        let d = add_dog(&engine, "Rex").await;

        // Disjoint spans so every create is admissible; compactions race
        // the creates. Any create that returned Ok must survive a restart.
        let mut creates = Vec::new();
        let mut compactions = Vec::new();
        for i in 0..20i64 {
            let create_engine = engine.clone();
            creates.push(tokio::spawn(async move {
                create_engine
                    .create_booking(Ulid::new(), d, k, days(2 * i, 2 * i + 1), None, 0)
                    .await
            }));
            if i % 4 == 0 {
                let compact_engine = engine.clone();
                compactions.push(tokio::spawn(async move { compact_engine.compact_wal().await }));
            }
        }
        for c in creates {
            ids.push(c.await.unwrap().unwrap().id);
        }
        for c in compactions {
            c.await.unwrap().unwrap();
        }
    }

    let engine = new_engine(&path);
    for id in &ids {
        assert!(
            engine.get_booking(*id).await.is_some(),
            "acknowledged booking {id} lost across compaction + restart"
        );
    }
    assert_eq!(engine.list_bookings().await.len(), ids.len());
}
