use std::sync::Arc;

use chrono::{Days, NaiveDate};

use super::*;
use super::conflict::now_ms;
use crate::calendar::Calendar;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms
const ORG: &str = "acme";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("cowork_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn admin() -> Principal {
    Principal::new("alice", Role::Admin, ORG)
}

fn manager() -> Principal {
    Principal::new("bob", Role::Manager, ORG)
}

fn staff() -> Principal {
    Principal::new("sam", Role::Staff, ORG)
}

/// Tomorrow (UTC) and the instant it starts.
fn tomorrow() -> (NaiveDate, Ms) {
    let cal = Calendar::utc();
    let date = cal.date_of(now_ms()) + Days::new(1);
    (date, cal.day_start(date))
}

fn new_space(name: &str, space_type: SpaceType, hourly_rate: f64) -> NewSpace {
    NewSpace {
        id: Ulid::new(),
        name: name.into(),
        space_type,
        capacity: 6,
        hourly_rate,
        daily_rate: hourly_rate * 7.0,
        monthly_rate: hourly_rate * 120.0,
        description: None,
    }
}

fn new_client(name: &str) -> NewClient {
    NewClient {
        id: Ulid::new(),
        name: name.into(),
        email: format!("{}@example.com", name.to_lowercase()),
        phone: None,
        company: None,
        segment: None,
    }
}

fn new_booking(space_id: Ulid, client_id: Ulid, start: Ms, end: Ms) -> NewBooking {
    NewBooking {
        id: Ulid::new(),
        space_id,
        client_id,
        start,
        end,
        notes: None,
    }
}

/// Engine with one meeting room at 25/h and one client.
async fn setup(name: &str) -> (Engine, Ulid, Ulid) {
    let engine = Engine::new(ORG, test_wal_path(name), Calendar::utc()).unwrap();
    let space = engine
        .create_space(&admin(), new_space("Room A", SpaceType::MeetingRoom, 25.0))
        .await
        .unwrap();
    let client = engine.create_client(&staff(), new_client("Ada")).await.unwrap();
    (engine, space.id, client.id)
}

// ── Creation and conflicts ───────────────────────────────

#[tokio::test]
async fn create_booking_is_confirmed_and_priced() {
    let (engine, space, client) = setup("create_priced.wal").await;
    let (_, day) = tomorrow();

    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + 9 * H, day + 10 * H + 30 * M))
        .await
        .unwrap();
    assert_eq!(b.status, BookingStatus::Confirmed);
    assert_eq!(b.total_amount, 37.5);
    assert_eq!(engine.get_booking(&b.id).await, Some(b));
}

#[tokio::test]
async fn overlapping_booking_rejected_with_details() {
    let (engine, space, client) = setup("overlap.wal").await;
    let (_, day) = tomorrow();
    let first = engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();

    let result = engine
        .create_booking(&staff(), new_booking(space, client, day + 11 * H, day + 13 * H))
        .await;
    match result {
        Err(EngineError::Overlap { id, span }) => {
            assert_eq!(id, first.id);
            assert_eq!(span, Span::new(day + 10 * H, day + 12 * H));
        }
        other => panic!("expected overlap, got {other:?}"),
    }
    assert_eq!(engine.count_bookings(&BookingFilter::default()).await, 1);
}

#[tokio::test]
async fn touching_bookings_are_allowed() {
    let (engine, space, client) = setup("touching.wal").await;
    let (_, day) = tomorrow();
    engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();
    engine
        .create_booking(&staff(), new_booking(space, client, day + 12 * H, day + 13 * H))
        .await
        .unwrap();
    engine
        .create_booking(&staff(), new_booking(space, client, day + 9 * H, day + 10 * H))
        .await
        .unwrap();
    assert_eq!(engine.count_bookings(&BookingFilter::default()).await, 3);
}

#[tokio::test]
async fn other_space_does_not_conflict() {
    let (engine, space, client) = setup("other_space.wal").await;
    let other = engine
        .create_space(&manager(), new_space("Room B", SpaceType::MeetingRoom, 30.0))
        .await
        .unwrap();
    let (_, day) = tomorrow();
    engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();
    let b = engine
        .create_booking(&staff(), new_booking(other.id, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();
    assert_eq!(b.total_amount, 60.0);
}

#[tokio::test]
async fn cancelled_booking_frees_the_slot() {
    let (engine, space, client) = setup("cancel_frees.wal").await;
    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();
    let cancelled = engine.cancel_booking(&manager(), b.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();
    // Soft delete: the cancelled record is still there.
    assert_eq!(engine.count_bookings(&BookingFilter::default()).await, 2);
}

#[tokio::test]
async fn checked_out_booking_frees_the_slot() {
    let (engine, space, client) = setup("checkout_frees.wal").await;
    let now = now_ms();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, now + 5 * M, now + 2 * H))
        .await
        .unwrap();
    engine.check_in(&staff(), b.id).await.unwrap();
    let out = engine.check_out(&staff(), b.id).await.unwrap();
    assert_eq!(out.status, BookingStatus::CheckedOut);

    engine
        .create_booking(&staff(), new_booking(space, client, now + 30 * M, now + H))
        .await
        .unwrap();
}

#[tokio::test]
async fn invalid_bookings_rejected() {
    let (engine, space, client) = setup("invalid.wal").await;
    let (_, day) = tomorrow();

    let r = engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 10 * H))
        .await;
    assert!(matches!(r, Err(EngineError::Validation(_))));

    let r = engine
        .create_booking(&staff(), new_booking(space, client, day + 12 * H, day + 10 * H))
        .await;
    assert!(matches!(r, Err(EngineError::Validation(_))));

    let past = now_ms() - 2 * H;
    let r = engine
        .create_booking(&staff(), new_booking(space, client, past, past + H))
        .await;
    assert!(matches!(r, Err(EngineError::Validation(_))));

    let r = engine
        .create_booking(&staff(), new_booking(Ulid::new(), client, day + H, day + 2 * H))
        .await;
    assert!(matches!(r, Err(EngineError::NotFound { entity: Entity::Space, .. })));

    let r = engine
        .create_booking(&staff(), new_booking(space, Ulid::new(), day + H, day + 2 * H))
        .await;
    assert!(matches!(r, Err(EngineError::NotFound { entity: Entity::Client, .. })));
}

#[tokio::test]
async fn duplicate_booking_id_rejected() {
    let (engine, space, client) = setup("dup_booking.wal").await;
    let (_, day) = tomorrow();
    let nb = new_booking(space, client, day + H, day + 2 * H);
    engine.create_booking(&staff(), nb.clone()).await.unwrap();
    let mut again = nb;
    again.start = day + 5 * H;
    again.end = day + 6 * H;
    assert!(matches!(
        engine.create_booking(&staff(), again).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn inactive_space_takes_no_new_bookings() {
    let (engine, space, client) = setup("inactive_space.wal").await;
    engine
        .update_space(
            &admin(),
            space,
            SpacePatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let (_, day) = tomorrow();
    assert!(matches!(
        engine
            .create_booking(&staff(), new_booking(space, client, day + H, day + 2 * H))
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn inactive_client_takes_no_new_bookings() {
    let (engine, space, client) = setup("inactive_client.wal").await;
    let retired = engine.create_client(&staff(), new_client("Grace")).await.unwrap();
    engine.deactivate_client(&admin(), retired.id).await.unwrap();
    let (_, day) = tomorrow();

    assert!(matches!(
        engine
            .create_booking(&staff(), new_booking(space, retired.id, day + H, day + 2 * H))
            .await,
        Err(EngineError::Validation(_))
    ));

    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + H, day + 2 * H))
        .await
        .unwrap();
    let r = engine
        .update_booking(
            &staff(),
            b.id,
            BookingPatch {
                client_id: Some(retired.id),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(r, Err(EngineError::Validation(_))));
    assert_eq!(engine.get_booking(&b.id).await.unwrap().client_id, client);
}

#[tokio::test]
async fn deactivation_racing_bookings_leaves_no_active_booking() {
    let (engine, space, client) = setup("deactivate_race.wal").await;
    let engine = Arc::new(engine);
    let (_, day) = tomorrow();

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let _ = engine
                .create_booking(&staff(), new_booking(space, client, day + i * H, day + (i + 1) * H))
                .await;
        }));
    }
    let deactivated = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.deactivate_client(&admin(), client).await })
    };
    for h in handles {
        h.await.unwrap();
    }

    if deactivated.await.unwrap().is_ok() {
        let filter = BookingFilter {
            client_id: Some(client),
            ..Default::default()
        };
        let bookings = engine.collect_bookings(&filter).await;
        assert!(bookings.iter().all(|b| !b.status.is_active()));
    }
}

#[tokio::test]
async fn concurrent_requests_for_one_slot_admit_exactly_one() {
    let (engine, space, client) = setup("race.wal").await;
    let engine = Arc::new(engine);
    let (_, day) = tomorrow();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 11 * H))
                .await
        }));
    }
    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Overlap { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 15);
}

// ── Updates ──────────────────────────────────────────────

#[tokio::test]
async fn update_excludes_itself_and_reprices() {
    let (engine, space, client) = setup("update_self.wal").await;
    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();

    let updated = engine
        .update_booking(
            &staff(),
            b.id,
            BookingPatch {
                start: Some(day + 11 * H),
                end: Some(day + 14 * H),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.span, Span::new(day + 11 * H, day + 14 * H));
    assert_eq!(updated.total_amount, 75.0);
    assert_eq!(updated.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn notes_only_update_keeps_amount() {
    let (engine, space, client) = setup("update_notes.wal").await;
    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();
    // A rate change must not leak into an untouched booking.
    engine
        .update_space(
            &admin(),
            space,
            SpacePatch {
                hourly_rate: Some(99.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let updated = engine
        .update_booking(
            &staff(),
            b.id,
            BookingPatch {
                notes: Some(Some("projector".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.total_amount, 50.0);
    assert_eq!(updated.notes.as_deref(), Some("projector"));
}

#[tokio::test]
async fn update_into_another_booking_conflicts() {
    let (engine, space, client) = setup("update_conflict.wal").await;
    let (_, day) = tomorrow();
    let a = engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + 13 * H, day + 14 * H))
        .await
        .unwrap();
    let r = engine
        .update_booking(
            &staff(),
            b.id,
            BookingPatch {
                start: Some(day + 11 * H),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(r, Err(EngineError::Overlap { id, .. }) if id == a.id));
    assert_eq!(engine.get_booking(&b.id).await.unwrap().span.start, day + 13 * H);
}

#[tokio::test]
async fn moving_to_another_space_checks_and_reprices() {
    let (engine, space, client) = setup("update_move.wal").await;
    let other = engine
        .create_space(&admin(), new_space("Studio", SpaceType::EventSpace, 100.0))
        .await
        .unwrap();
    let (_, day) = tomorrow();
    let blocker = engine
        .create_booking(&staff(), new_booking(other.id, client, day + 10 * H, day + 11 * H))
        .await
        .unwrap();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();

    let r = engine
        .update_booking(
            &staff(),
            b.id,
            BookingPatch {
                space_id: Some(other.id),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(r, Err(EngineError::Overlap { id, .. }) if id == blocker.id));

    let moved = engine
        .update_booking(
            &staff(),
            b.id,
            BookingPatch {
                space_id: Some(other.id),
                start: Some(day + 14 * H),
                end: Some(day + 16 * H),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.space_id, other.id);
    assert_eq!(moved.total_amount, 200.0);
    let filter = BookingFilter {
        space_id: Some(space),
        ..Default::default()
    };
    assert_eq!(engine.count_bookings(&filter).await, 0);
    // The old slot is free again.
    engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_moves_follow_the_booking() {
    let (engine, space, client) = setup("move_race.wal").await;
    let other = engine
        .create_space(&admin(), new_space("Studio", SpaceType::EventSpace, 100.0))
        .await
        .unwrap();
    let engine = Arc::new(engine);
    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 11 * H))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for target in [space, other.id] {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..10 {
                engine
                    .update_booking(
                        &staff(),
                        b.id,
                        BookingPatch {
                            space_id: Some(target),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let now = engine.get_booking(&b.id).await.unwrap();
    assert_eq!(*engine.booking_to_space.get(&b.id).unwrap().value(), now.space_id);
    let filter = BookingFilter::default();
    assert_eq!(engine.count_bookings(&filter).await, 1);
}

#[tokio::test]
async fn update_after_check_in_rejected() {
    let (engine, space, client) = setup("update_checked_in.wal").await;
    let now = now_ms();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, now + 5 * M, now + H))
        .await
        .unwrap();
    engine.check_in(&staff(), b.id).await.unwrap();
    let r = engine
        .update_booking(
            &staff(),
            b.id,
            BookingPatch {
                end: Some(now + 2 * H),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(r, Err(EngineError::InvalidTransition { .. })));
}

// ── Status machine ───────────────────────────────────────

#[tokio::test]
async fn check_in_too_early_rejected() {
    let (engine, space, client) = setup("checkin_early.wal").await;
    let now = now_ms();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, now + 2 * H, now + 3 * H))
        .await
        .unwrap();
    assert!(matches!(
        engine.check_in(&staff(), b.id).await,
        Err(EngineError::CheckInTooEarly { .. })
    ));
    assert!(matches!(
        engine.check_out(&staff(), b.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn checked_in_booking_cannot_be_cancelled() {
    let (engine, space, client) = setup("cancel_checked_in.wal").await;
    let now = now_ms();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, now + 10 * M, now + H))
        .await
        .unwrap();
    let checked_in = engine
        .set_booking_status(&staff(), b.id, BookingStatus::CheckedIn)
        .await
        .unwrap();
    assert_eq!(checked_in.status, BookingStatus::CheckedIn);
    assert!(matches!(
        engine.cancel_booking(&admin(), b.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.check_in(&staff(), b.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn cancel_requires_back_office_role() {
    let (engine, space, client) = setup("cancel_role.wal").await;
    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + H, day + 2 * H))
        .await
        .unwrap();
    assert!(matches!(
        engine.cancel_booking(&staff(), b.id).await,
        Err(EngineError::Forbidden { role: Role::Staff, .. })
    ));
    assert!(matches!(
        engine
            .set_booking_status(&staff(), b.id, BookingStatus::Cancelled)
            .await,
        Err(EngineError::Forbidden { .. })
    ));
    engine.cancel_booking(&admin(), b.id).await.unwrap();
    // Terminal.
    assert!(matches!(
        engine.cancel_booking(&admin(), b.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn unsupported_target_status_rejected() {
    let (engine, space, client) = setup("bad_target.wal").await;
    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + H, day + 2 * H))
        .await
        .unwrap();
    assert!(matches!(
        engine
            .set_booking_status(&admin(), b.id, BookingStatus::Pending)
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn unknown_booking_is_not_found() {
    let (engine, _, _) = setup("unknown_booking.wal").await;
    let id = Ulid::new();
    assert!(matches!(
        engine.check_in(&staff(), id).await,
        Err(EngineError::NotFound { entity: Entity::Booking, .. })
    ));
    assert!(matches!(
        engine
            .update_booking(&staff(), id, BookingPatch::default())
            .await,
        Err(EngineError::NotFound { .. })
    ));
}

// ── Authorization ────────────────────────────────────────

#[tokio::test]
async fn staff_cannot_maintain_spaces() {
    let (engine, space, _) = setup("staff_spaces.wal").await;
    assert!(matches!(
        engine
            .create_space(&staff(), new_space("Desk", SpaceType::Desk, 5.0))
            .await,
        Err(EngineError::Forbidden { .. })
    ));
    assert!(matches!(
        engine.delete_space(&staff(), space).await,
        Err(EngineError::Forbidden { .. })
    ));
}

#[tokio::test]
async fn other_organization_rejected() {
    let (engine, space, client) = setup("other_org.wal").await;
    let outsider = Principal::new("eve", Role::Admin, "globex");
    let (_, day) = tomorrow();
    let r = engine
        .create_booking(&outsider, new_booking(space, client, day + H, day + 2 * H))
        .await;
    assert!(matches!(r, Err(EngineError::WrongOrganization(_))));
    assert_eq!(r.unwrap_err().kind(), ErrorKind::Forbidden);
}

// ── Spaces and clients ───────────────────────────────────

#[tokio::test]
async fn space_validation() {
    let (engine, _, _) = setup("space_validation.wal").await;
    let mut bad = new_space("Zero", SpaceType::Desk, 5.0);
    bad.capacity = 0;
    assert!(matches!(
        engine.create_space(&admin(), bad).await,
        Err(EngineError::Validation(_))
    ));
    let bad = new_space("Negative", SpaceType::Desk, -1.0);
    assert!(matches!(
        engine.create_space(&admin(), bad).await,
        Err(EngineError::Validation(_))
    ));
    let bad = new_space("  ", SpaceType::Desk, 1.0);
    assert!(matches!(
        engine.create_space(&admin(), bad).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn space_with_active_booking_cannot_be_deleted() {
    let (engine, space, client) = setup("delete_space.wal").await;
    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + H, day + 2 * H))
        .await
        .unwrap();
    assert!(matches!(
        engine.delete_space(&admin(), space).await,
        Err(EngineError::HasActiveBookings { entity: Entity::Space, .. })
    ));
    engine.cancel_booking(&admin(), b.id).await.unwrap();
    engine.delete_space(&admin(), space).await.unwrap();
    assert!(engine.get_space(&space).await.is_none());
    assert!(engine.get_booking(&b.id).await.is_none());
}

#[tokio::test]
async fn booking_queued_behind_space_deletion_is_rejected() {
    let (engine, space, client) = setup("delete_race.wal").await;
    let engine = Arc::new(engine);
    let (_, day) = tomorrow();

    let arc = engine.space_arc(&space).unwrap();
    let held = arc.write().await;

    let deleting = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.delete_space(&admin(), space).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let booking = new_booking(space, client, day + 10 * H, day + 11 * H);
    let booking_id = booking.id;
    let creating = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.create_booking(&staff(), booking).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    drop(held);

    deleting.await.unwrap().unwrap();
    assert!(matches!(
        creating.await.unwrap(),
        Err(EngineError::NotFound { entity: Entity::Space, .. })
    ));
    assert!(engine.get_space(&space).await.is_none());
    assert!(!engine.booking_to_space.contains_key(&booking_id));
}

#[tokio::test]
async fn space_with_invoiced_booking_cannot_be_deleted() {
    let (engine, space, client) = setup("delete_invoiced.wal").await;
    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + H, day + 2 * H))
        .await
        .unwrap();
    let inv = engine
        .issue_invoice(
            &admin(),
            NewInvoice {
                id: Ulid::new(),
                client_id: client,
                booking_id: Some(b.id),
                amount: None,
                tax_amount: None,
                due_date: None,
                notes: None,
            },
        )
        .await
        .unwrap();
    engine.cancel_booking(&admin(), b.id).await.unwrap();

    assert!(matches!(
        engine.delete_space(&admin(), space).await,
        Err(EngineError::AlreadyInvoiced { booking_id, invoice_id })
            if booking_id == b.id && invoice_id == inv.id
    ));
    assert!(engine.get_space(&space).await.is_some());
}

#[tokio::test]
async fn space_listing_filters() {
    let (engine, _, _) = setup("list_spaces.wal").await;
    let mut big = new_space("Hall", SpaceType::EventSpace, 200.0);
    big.capacity = 80;
    engine.create_space(&admin(), big).await.unwrap();
    engine
        .create_space(&admin(), new_space("Booth", SpaceType::PhoneBooth, 3.0))
        .await
        .unwrap();

    let all = engine.list_spaces(&SpaceFilter::default()).await;
    let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Booth", "Hall", "Room A"]);

    let large = engine
        .list_spaces(&SpaceFilter {
            min_capacity: Some(10),
            ..Default::default()
        })
        .await;
    assert_eq!(large.len(), 1);
    assert_eq!(large[0].name, "Hall");

    let booths = engine
        .list_spaces(&SpaceFilter {
            space_type: Some(SpaceType::PhoneBooth),
            ..Default::default()
        })
        .await;
    assert_eq!(booths.len(), 1);
}

#[tokio::test]
async fn client_update_and_deactivation() {
    let (engine, space, client) = setup("client_lifecycle.wal").await;
    let updated = engine
        .update_client(
            &staff(),
            client,
            ClientPatch {
                company: Some(Some("Analytical Engines".into())),
                segment: Some(Some("SMB".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.company.as_deref(), Some("Analytical Engines"));

    let bad = engine
        .update_client(
            &staff(),
            client,
            ClientPatch {
                email: Some("not-an-email".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(bad, Err(EngineError::Validation(_))));

    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + H, day + 2 * H))
        .await
        .unwrap();
    assert!(matches!(
        engine.deactivate_client(&admin(), client).await,
        Err(EngineError::HasActiveBookings { entity: Entity::Client, .. })
    ));
    engine.cancel_booking(&admin(), b.id).await.unwrap();
    let gone = engine.deactivate_client(&admin(), client).await.unwrap();
    assert!(!gone.active);
    let active = engine.list_clients(&ClientFilter {
        active: Some(true),
        ..Default::default()
    });
    assert!(active.is_empty());
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn find_overlapping_is_a_pure_query() {
    let (engine, space, client) = setup("find_overlapping.wal").await;
    let (_, day) = tomorrow();
    let a = engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();

    let hit = engine
        .find_overlapping(space, day + 11 * H, day + 13 * H, None)
        .await
        .unwrap();
    assert_eq!(hit.map(|b| b.id), Some(a.id));
    let none = engine
        .find_overlapping(space, day + 11 * H, day + 13 * H, Some(a.id))
        .await
        .unwrap();
    assert!(none.is_none());
    let none = engine
        .find_overlapping(space, day + 12 * H, day + 13 * H, None)
        .await
        .unwrap();
    assert!(none.is_none());
    assert!(matches!(
        engine.find_overlapping(Ulid::new(), day, day + H, None).await,
        Err(EngineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn totals_by_filter() {
    let (engine, space, client) = setup("totals.wal").await;
    let (_, day) = tomorrow();
    engine
        .create_booking(&staff(), new_booking(space, client, day + H, day + 3 * H))
        .await
        .unwrap();
    let c = engine
        .create_booking(&staff(), new_booking(space, client, day + 4 * H, day + 5 * H))
        .await
        .unwrap();
    engine.cancel_booking(&admin(), c.id).await.unwrap();

    let all = BookingFilter::default();
    assert_eq!(engine.count_bookings(&all).await, 2);
    assert_eq!(engine.sum_bookings(&all, BookingField::TotalAmount).await, 75.0);

    let live = BookingFilter {
        exclude_cancelled: true,
        ..Default::default()
    };
    let totals = engine.booking_totals(&live).await;
    assert_eq!(totals.count, 1);
    assert_eq!(totals.total_amount, 50.0);
    assert_eq!(engine.sum_bookings(&live, BookingField::Hours).await, 2.0);
}

#[tokio::test]
async fn booking_pages() {
    let (engine, space, client) = setup("pages.wal").await;
    let (_, day) = tomorrow();
    for i in 0..5 {
        engine
            .create_booking(&staff(), new_booking(space, client, day + i * H, day + i * H + 30 * M))
            .await
            .unwrap();
    }
    let page = engine
        .list_bookings(&BookingFilter::default(), Page { page: 2, per_page: 2 })
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].span.start, day + 2 * H);

    let last = engine
        .list_bookings(&BookingFilter::default(), Page { page: 3, per_page: 2 })
        .await
        .unwrap();
    assert_eq!(last.items.len(), 1);

    assert!(matches!(
        engine
            .list_bookings(&BookingFilter::default(), Page { page: 0, per_page: 2 })
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn day_availability_and_free_slots() {
    let (engine, space, client) = setup("availability.wal").await;
    let (date, day) = tomorrow();
    let a = engine
        .create_booking(&staff(), new_booking(space, client, day + 10 * H, day + 12 * H))
        .await
        .unwrap();
    engine
        .create_booking(&staff(), new_booking(space, client, day + 14 * H, day + 15 * H))
        .await
        .unwrap();
    let c = engine
        .create_booking(&staff(), new_booking(space, client, day + 16 * H, day + 17 * H))
        .await
        .unwrap();
    engine.cancel_booking(&admin(), c.id).await.unwrap();

    let avail = engine.day_availability(space, date).await.unwrap();
    assert_eq!(avail.bookings.len(), 2);
    assert_eq!(avail.bookings[0].booking_id, a.id);
    assert_eq!(avail.bookings[0].start, day + 10 * H);
    assert_eq!(avail.bookings[1].end, day + 15 * H);

    let free = engine.free_slots(space, date, None).await.unwrap();
    assert_eq!(
        free,
        vec![
            Span::new(day, day + 10 * H),
            Span::new(day + 12 * H, day + 14 * H),
            Span::new(day + 15 * H, day + 24 * H),
        ]
    );
    let long = engine.free_slots(space, date, Some(3 * H)).await.unwrap();
    assert_eq!(long.len(), 2);

    let next_day = engine
        .day_availability(space, date + Days::new(1))
        .await
        .unwrap();
    assert!(next_day.bookings.is_empty());
}

// ── Invoicing ────────────────────────────────────────────

#[tokio::test]
async fn invoices_issue_pay_and_guard() {
    let (engine, space, client) = setup("invoices.wal").await;
    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + H, day + 3 * H))
        .await
        .unwrap();

    let inv = engine
        .issue_invoice(
            &admin(),
            NewInvoice {
                id: Ulid::new(),
                client_id: client,
                booking_id: Some(b.id),
                amount: None,
                tax_amount: Some(11.0),
                due_date: None,
                notes: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(inv.amount, 50.0);
    assert!(inv.number.starts_with("INV-"));
    assert!(inv.number.ends_with("-0001"));
    assert_eq!(engine.invoice_for_booking(&b.id).map(|i| i.id), Some(inv.id));

    let again = engine
        .issue_invoice(
            &admin(),
            NewInvoice {
                id: Ulid::new(),
                client_id: client,
                booking_id: Some(b.id),
                amount: Some(1.0),
                tax_amount: None,
                due_date: None,
                notes: None,
            },
        )
        .await;
    assert!(matches!(again, Err(EngineError::AlreadyInvoiced { .. })));

    let paid = engine.mark_invoice_paid(&staff(), inv.id).await.unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert!(paid.paid_at.is_some());
    assert!(matches!(
        engine.mark_invoice_paid(&staff(), inv.id).await,
        Err(EngineError::InvoicePaid(_))
    ));

    // A paid invoice pins the booking.
    assert!(matches!(
        engine.cancel_booking(&admin(), b.id).await,
        Err(EngineError::PaidInvoice { .. })
    ));
}

#[tokio::test]
async fn invoice_booking_must_belong_to_client() {
    let (engine, space, client) = setup("invoice_owner.wal").await;
    let other = engine.create_client(&staff(), new_client("Grace")).await.unwrap();
    let (_, day) = tomorrow();
    let b = engine
        .create_booking(&staff(), new_booking(space, client, day + H, day + 2 * H))
        .await
        .unwrap();
    let r = engine
        .issue_invoice(
            &admin(),
            NewInvoice {
                id: Ulid::new(),
                client_id: other.id,
                booking_id: Some(b.id),
                amount: None,
                tax_amount: None,
                due_date: None,
                notes: None,
            },
        )
        .await;
    assert!(matches!(r, Err(EngineError::Validation(_))));

    let r = engine
        .issue_invoice(
            &staff(),
            NewInvoice {
                id: Ulid::new(),
                client_id: client,
                booking_id: None,
                amount: Some(10.0),
                tax_amount: None,
                due_date: None,
                notes: None,
            },
        )
        .await;
    assert!(matches!(r, Err(EngineError::Forbidden { .. })));

    let r = engine
        .issue_invoice(
            &admin(),
            NewInvoice {
                id: Ulid::new(),
                client_id: client,
                booking_id: None,
                amount: None,
                tax_amount: None,
                due_date: None,
                notes: None,
            },
        )
        .await;
    assert!(matches!(r, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn generate_invoices_for_completed_bookings() {
    let (engine, space, client) = setup("generate.wal").await;
    let now = now_ms();
    let done = engine
        .create_booking(&staff(), new_booking(space, client, now + 5 * M, now + 2 * H + 5 * M))
        .await
        .unwrap();
    engine.check_in(&staff(), done.id).await.unwrap();
    engine.check_out(&staff(), done.id).await.unwrap();
    let (_, day) = tomorrow();
    engine
        .create_booking(&staff(), new_booking(space, client, day + 20 * H, day + 21 * H))
        .await
        .unwrap();

    assert!(matches!(
        engine.generate_invoices(&staff()).await,
        Err(EngineError::Forbidden { .. })
    ));
    assert_eq!(engine.generate_invoices(&manager()).await.unwrap(), 1);
    let inv = engine.invoice_for_booking(&done.id).unwrap();
    assert_eq!(inv.amount, 50.0);
    assert_eq!(inv.tax_amount, 11.0);
    assert!(inv.due_date > now + 29 * 24 * H);

    // Idempotent once invoiced.
    assert_eq!(engine.generate_invoices(&manager()).await.unwrap(), 0);
}

// ── Reports ──────────────────────────────────────────────

#[tokio::test]
async fn booking_stats_counts_by_status() {
    let (engine, space, client) = setup("stats.wal").await;
    let (date, day) = tomorrow();
    for i in 0..3 {
        engine
            .create_booking(&staff(), new_booking(space, client, day + i * H, day + i * H + H))
            .await
            .unwrap();
    }
    let c = engine
        .create_booking(&staff(), new_booking(space, client, day + 5 * H, day + 6 * H))
        .await
        .unwrap();
    engine.cancel_booking(&admin(), c.id).await.unwrap();

    let range = DateRange::new(date, date).unwrap();
    let stats = engine.booking_stats(&staff(), Some(range), Some(space)).await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.confirmed, 3);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.total_revenue, 75.0);
    assert_eq!(stats.occupancy_rate, 75.0);

    let empty = engine
        .booking_stats(&staff(), DateRange::new(date + Days::new(3), date + Days::new(3)), None)
        .await
        .unwrap();
    assert_eq!(empty.total, 0);
    assert_eq!(empty.occupancy_rate, 0.0);
}

#[tokio::test]
async fn reports_aggregate_non_cancelled_bookings() {
    let (engine, room, ada) = setup("reports.wal").await;
    let desk = engine
        .create_space(&admin(), new_space("Desk 1", SpaceType::Desk, 10.0))
        .await
        .unwrap();
    let mut grace = new_client("Grace");
    grace.segment = Some("ENTERPRISE".into());
    let grace = engine.create_client(&staff(), grace).await.unwrap();
    let (date, day) = tomorrow();

    engine
        .create_booking(&staff(), new_booking(room, ada, day + 9 * H, day + 11 * H))
        .await
        .unwrap();
    engine
        .create_booking(&staff(), new_booking(room, grace.id, day + 12 * H, day + 13 * H))
        .await
        .unwrap();
    engine
        .create_booking(&staff(), new_booking(desk.id, grace.id, day + 9 * H, day + 17 * H))
        .await
        .unwrap();
    let cancelled = engine
        .create_booking(&staff(), new_booking(desk.id, ada, day + 18 * H, day + 19 * H))
        .await
        .unwrap();
    engine.cancel_booking(&admin(), cancelled.id).await.unwrap();

    let range = DateRange::new(date, date + Days::new(1)).unwrap();

    assert!(matches!(
        engine.revenue_report(&staff(), range).await,
        Err(EngineError::Forbidden { .. })
    ));
    let revenue = engine.revenue_report(&manager(), range).await.unwrap();
    assert_eq!(revenue.total, 155.0);
    assert_eq!(revenue.daily.len(), 1);
    assert_eq!(revenue.daily[0].date, date);
    let by_type: Vec<_> = revenue.by_type.iter().map(|t| (t.space_type, t.revenue)).collect();
    assert_eq!(by_type, vec![(SpaceType::MeetingRoom, 75.0), (SpaceType::Desk, 80.0)]);

    let occupancy = engine.occupancy_report(&admin(), range).await.unwrap();
    assert_eq!(occupancy.daily.len(), 2);
    assert_eq!(occupancy.daily[0].bookings, 3);
    assert_eq!(occupancy.daily[0].occupancy_rate, 100.0);
    assert_eq!(occupancy.daily[1].occupancy_rate, 0.0);
    assert_eq!(occupancy.average_occupancy, 50.0);

    let overview = engine.overview(&admin(), Some(range)).await.unwrap();
    assert_eq!(overview.total_bookings, 3);
    assert_eq!(overview.total_revenue, 155.0);
    assert_eq!(overview.total_spaces, 2);
    assert_eq!(overview.active_clients, 2);
    assert_eq!(overview.occupancy_rate, 75.0);

    let spaces = engine.spaces_report(&admin(), Some(range)).await.unwrap();
    assert_eq!(spaces.total_spaces, 2);
    assert_eq!(spaces.top_spaces[0].id, room);
    assert_eq!(spaces.top_spaces[0].bookings_count, 2);
    assert_eq!(spaces.top_spaces[0].total_hours, 3.0);
    assert_eq!(spaces.top_spaces[1].revenue, 80.0);

    let clients = engine.clients_report(&admin(), None).await.unwrap();
    assert_eq!(clients.total_clients, 2);
    assert_eq!(clients.top_clients[0].id, grace.id);
    assert_eq!(clients.top_clients[0].total_revenue, 105.0);
    assert_eq!(clients.top_clients[1].bookings_count, 1);
    assert_eq!(
        clients.segments,
        vec![
            SegmentCount { segment: None, count: 1 },
            SegmentCount { segment: Some("ENTERPRISE".into()), count: 1 },
        ]
    );
}

#[tokio::test]
async fn dashboard_and_billing_stats() {
    let (engine, space, client) = setup("dashboard.wal").await;
    let now = now_ms();
    // Close enough to now to land on today unless the test runs at midnight.
    let b = engine
        .create_booking(&staff(), new_booking(space, client, now + M, now + 2 * M))
        .await
        .unwrap();
    let dash = engine.dashboard(&staff()).await.unwrap();
    assert_eq!(dash.total_spaces, 1);
    assert_eq!(dash.total_clients, 1);
    assert!(dash.today_bookings <= 1);

    engine
        .issue_invoice(
            &admin(),
            NewInvoice {
                id: Ulid::new(),
                client_id: client,
                booking_id: Some(b.id),
                amount: Some(100.0),
                tax_amount: Some(22.0),
                due_date: Some(now - H),
                notes: None,
            },
        )
        .await
        .unwrap();
    let paid = engine
        .issue_invoice(
            &admin(),
            NewInvoice {
                id: Ulid::new(),
                client_id: client,
                booking_id: None,
                amount: Some(50.0),
                tax_amount: None,
                due_date: None,
                notes: None,
            },
        )
        .await
        .unwrap();
    assert!(paid.number.ends_with("-0002"));
    engine.mark_invoice_paid(&staff(), paid.id).await.unwrap();

    let billing = engine.billing_stats(&staff(), None).await.unwrap();
    assert_eq!(billing.total_invoices, 2);
    assert_eq!(billing.pending_invoices, 1);
    assert_eq!(billing.overdue_invoices, 1);
    assert_eq!(billing.total_amount, 172.0);
    assert_eq!(billing.pending_amount, 122.0);
    assert_eq!(billing.paid_amount, 50.0);
    assert_eq!(billing.collection_rate, 50.0);
    assert_eq!(engine.dashboard(&staff()).await.unwrap().pending_invoices, 1);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let (date, day) = tomorrow();
    let (space_id, client_id, kept, moved, cancelled, invoice_id);
    {
        let engine = Engine::new(ORG, path.clone(), Calendar::utc()).unwrap();
        let space = engine
            .create_space(&admin(), new_space("Room A", SpaceType::MeetingRoom, 25.0))
            .await
            .unwrap();
        let other = engine
            .create_space(&admin(), new_space("Room B", SpaceType::MeetingRoom, 40.0))
            .await
            .unwrap();
        let client = engine.create_client(&staff(), new_client("Ada")).await.unwrap();
        space_id = space.id;
        client_id = client.id;
        kept = engine
            .create_booking(&staff(), new_booking(space.id, client.id, day + H, day + 2 * H))
            .await
            .unwrap()
            .id;
        let m = engine
            .create_booking(&staff(), new_booking(space.id, client.id, day + 3 * H, day + 4 * H))
            .await
            .unwrap();
        moved = engine
            .update_booking(
                &staff(),
                m.id,
                BookingPatch {
                    space_id: Some(other.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let c = engine
            .create_booking(&staff(), new_booking(space.id, client.id, day + 5 * H, day + 6 * H))
            .await
            .unwrap();
        cancelled = engine.cancel_booking(&admin(), c.id).await.unwrap();
        let inv = engine
            .issue_invoice(
                &admin(),
                NewInvoice {
                    id: Ulid::new(),
                    client_id: client.id,
                    booking_id: Some(kept),
                    amount: None,
                    tax_amount: None,
                    due_date: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
        engine.mark_invoice_paid(&staff(), inv.id).await.unwrap();
        invoice_id = inv.id;
    }

    let engine = Engine::new(ORG, path, Calendar::utc()).unwrap();
    assert!(engine.get_client(&client_id).is_some());
    assert_eq!(engine.get_booking(&kept).await.unwrap().total_amount, 25.0);
    assert_eq!(engine.get_booking(&moved.id).await, Some(moved.clone()));
    assert_eq!(
        engine.get_booking(&cancelled.id).await.unwrap().status,
        BookingStatus::Cancelled
    );
    assert_eq!(engine.get_invoice(&invoice_id).unwrap().status, InvoiceStatus::Paid);
    let avail = engine.day_availability(space_id, date).await.unwrap();
    assert_eq!(avail.bookings.len(), 1);
    // The moved booking's old slot is free after replay.
    assert!(
        engine
            .find_overlapping(space_id, day + 3 * H, day + 4 * H, None)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let (_, day) = tomorrow();
    let booking_id;
    {
        let engine = Engine::new(ORG, path.clone(), Calendar::utc()).unwrap();
        let space = engine
            .create_space(&admin(), new_space("Room A", SpaceType::MeetingRoom, 25.0))
            .await
            .unwrap();
        let client = engine.create_client(&staff(), new_client("Ada")).await.unwrap();
        for i in 0..10 {
            let b = engine
                .create_booking(&staff(), new_booking(space.id, client.id, day + i * H, day + i * H + H))
                .await
                .unwrap();
            engine.cancel_booking(&admin(), b.id).await.unwrap();
        }
        booking_id = engine
            .create_booking(&staff(), new_booking(space.id, client.id, day + 12 * H, day + 13 * H))
            .await
            .unwrap()
            .id;
        assert_eq!(engine.wal_appends_since_compact().await, 23);

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "{after} < {before}");
    }

    let engine = Engine::new(ORG, path, Calendar::utc()).unwrap();
    assert_eq!(engine.count_bookings(&BookingFilter::default()).await, 11);
    let live = BookingFilter {
        exclude_cancelled: true,
        ..Default::default()
    };
    assert_eq!(engine.count_bookings(&live).await, 1);
    assert!(engine.get_booking(&booking_id).await.is_some());
}
