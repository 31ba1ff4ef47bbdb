mod common;

use chrono::NaiveDate;
use common::*;
use std::collections::BTreeSet;
use vaccine_booking::core::wizard::{Action, ActionKind, NoticeLevel, Prompt, Step};
use vaccine_booking::domain::model::{Money, ReservationStatus, VaccineId, Weekday};
use vaccine_booking::utils::error::ErrorKind;

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

#[tokio::test]
async fn test_direct_booking_creates_pending_reservation() {
    let backend = backend();
    let mut c = controller(&backend);

    let view = direct_to_date_choice(&mut c).await;
    assert_eq!(view.step, Step::DateChoice);

    let view = monday_nine_to_confirmation(&mut c).await;
    assert_eq!(view.step, Step::Confirmation);
    assert_eq!(view.total, Money::from_cents(8990));

    let view = tokio_test::assert_ok!(c.dispatch(Action::Confirm).await);
    assert_eq!(view.step, Step::Committed);
    assert_eq!(view.notice.as_ref().map(|n| n.level), Some(NoticeLevel::Info));
    assert!(view.auto_close_after.is_some());

    let reservations = backend.reservations();
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].status, ReservationStatus::Pending);
    assert_eq!(reservations[0].date, monday());
    assert_eq!(reservations[0].vaccine_ids, vec![VaccineId::from("flu")]);
    assert_eq!(backend.quotes().len(), 1);
}

#[tokio::test]
async fn test_full_slot_returns_to_date_choice() {
    let backend = backend();
    backend.add_reservation(booked_by("bruno", monday(), "09:00:00"));
    backend.add_reservation(booked_by("carla", monday(), "09:00"));
    let mut c = controller(&backend);

    direct_to_date_choice(&mut c).await;
    monday_nine_to_confirmation(&mut c).await;
    let view = c.dispatch(Action::Confirm).await.unwrap();

    assert_eq!(view.step, Step::DateChoice);
    let notice = view.notice.unwrap();
    assert_eq!(notice.kind, Some(ErrorKind::CapacityExceeded));
    assert!(notice.message.contains("2 of 2"));
    assert_eq!(c.session().selection().date(), None);
    assert_eq!(backend.reservations().len(), 2);
}

#[tokio::test]
async fn test_unserved_weekday_is_rejected_in_place() {
    let backend = backend();
    let mut c = controller(&backend);
    direct_to_date_choice(&mut c).await;

    let view = c
        .dispatch(Action::EnterDate("2026-10-20".to_string()))
        .await
        .unwrap();

    assert_eq!(view.step, Step::DateChoice);
    let notice = view.notice.as_ref().unwrap();
    assert_eq!(notice.kind, Some(ErrorKind::Validation));
    assert!(notice.message.contains("Tuesday"));
    assert!(notice.message.contains("Monday"));
    assert_eq!(c.session().selection().date(), None);
    assert_eq!(
        c.session().served_weekdays(),
        &BTreeSet::from([Weekday::Monday, Weekday::Wednesday])
    );
    assert!(view
        .prompts
        .iter()
        .any(|p| matches!(p, Prompt::Input { submit: ActionKind::EnterDate, .. })));

    let view = c
        .dispatch(Action::EnterDate("21/10/2026".to_string()))
        .await
        .unwrap();
    assert_eq!(view.step, Step::TimeChoice);
}

#[tokio::test]
async fn test_past_date_is_rejected() {
    let backend = backend();
    let mut c = controller(&backend);
    direct_to_date_choice(&mut c).await;

    let view = c
        .dispatch(Action::EnterDate("12/10/2026".to_string()))
        .await
        .unwrap();

    assert_eq!(view.step, Step::DateChoice);
    assert_eq!(view.notice.unwrap().kind, Some(ErrorKind::Validation));
    assert!(!backend.calls().contains(&"weekly_schedule_for_day"));
}

#[tokio::test]
async fn test_cancel_asks_before_discarding() {
    let backend = backend();
    let mut c = controller(&backend);
    direct_to_date_choice(&mut c).await;
    c.dispatch(Action::EnterDate("19/10/2026".to_string()))
        .await
        .unwrap();

    let view = c.dispatch(Action::Cancel).await.unwrap();
    assert_eq!(view.actions, vec![ActionKind::ConfirmAbandon, ActionKind::Resume]);

    let view = c.dispatch(Action::Resume).await.unwrap();
    assert_eq!(view.step, Step::TimeChoice);
    let selection = c.session().selection();
    assert_eq!(selection.date(), Some(monday()));
    assert_eq!(selection.unit().map(|u| u.id.as_str()), Some("u1"));
    assert_eq!(selection.vaccine_count(), 1);

    c.dispatch(Action::Cancel).await.unwrap();
    let view = c.dispatch(Action::ConfirmAbandon).await.unwrap();
    assert_eq!(view.step, Step::ModeChoice);
    assert!(!c.session().selection().has_progress());
    assert_eq!(view.total, Money::ZERO);
}

#[tokio::test]
async fn test_quote_booking_deletes_quote() {
    let backend = backend();
    let mut c = controller(&backend);

    c.start().await.unwrap();
    let view = c.dispatch(Action::UseQuote).await.unwrap();
    assert_eq!(view.step, Step::QuoteListing);
    c.dispatch(Action::SelectQuote("q1".into())).await.unwrap();
    c.dispatch(Action::SelectUnit("u1".into())).await.unwrap();
    let view = monday_nine_to_confirmation(&mut c).await;
    assert_eq!(view.total, Money::from_cents(18000));

    let view = c.dispatch(Action::Confirm).await.unwrap();

    assert_eq!(view.step, Step::Committed);
    assert!(backend.quotes().is_empty());
    let reservations = backend.reservations();
    assert_eq!(reservations[0].total, Money::from_cents(18000));
    assert_eq!(reservations[0].vaccine_ids.len(), 2);
}

#[tokio::test]
async fn test_quote_cleanup_failure_keeps_reservation() {
    let backend = backend();
    backend.fail_on("delete_quote");
    let mut c = controller(&backend);

    c.start().await.unwrap();
    c.dispatch(Action::UseQuote).await.unwrap();
    c.dispatch(Action::SelectQuote("q1".into())).await.unwrap();
    c.dispatch(Action::SelectUnit("u1".into())).await.unwrap();
    monday_nine_to_confirmation(&mut c).await;
    let view = c.dispatch(Action::Confirm).await.unwrap();

    assert_eq!(view.step, Step::Committed);
    let notice = view.notice.unwrap();
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert!(notice.message.contains("could not be removed"));
    assert_eq!(backend.reservations().len(), 1);
    assert_eq!(backend.quotes().len(), 1);
}

#[tokio::test]
async fn test_direct_listing_hides_unbookable_vaccines() {
    let backend = backend();
    let mut c = controller(&backend);
    c.start().await.unwrap();

    let view = c.dispatch(Action::GoDirect).await.unwrap();
    let listed: Vec<Action> = offered(&view)
        .into_iter()
        .filter(|a| matches!(a, Action::ToggleVaccine(_)))
        .collect();

    assert!(listed.contains(&Action::ToggleVaccine("flu".into())));
    assert!(listed.contains(&Action::ToggleVaccine("dengue".into())));
    for hidden in ["promo", "bcg", "yellow"] {
        assert!(!listed.contains(&Action::ToggleVaccine(hidden.into())));
    }
}

#[tokio::test]
async fn test_toggling_twice_restores_total() {
    let backend = backend();
    let mut c = controller(&backend);
    c.start().await.unwrap();
    c.dispatch(Action::GoDirect).await.unwrap();

    c.dispatch(Action::ToggleVaccine("flu".into())).await.unwrap();
    let before = c.dispatch(Action::ToggleVaccine("hepb".into())).await.unwrap();
    c.dispatch(Action::ToggleVaccine("flu".into())).await.unwrap();
    let after = c.dispatch(Action::ToggleVaccine("flu".into())).await.unwrap();

    assert_eq!(before.total, Money::from_cents(20990));
    assert_eq!(after.total, before.total);
    assert_eq!(c.session().selection().vaccine_count(), 2);
}

#[tokio::test]
async fn test_unreachable_unit_never_reaches_date_choice() {
    let backend = backend();
    let mut c = controller(&backend);
    c.start().await.unwrap();
    c.dispatch(Action::GoDirect).await.unwrap();
    c.dispatch(Action::ToggleVaccine("flu".into())).await.unwrap();
    c.dispatch(Action::ContinueToUnits).await.unwrap();

    let view = c.dispatch(Action::SelectUnit("u2".into())).await.unwrap();

    assert_eq!(view.step, Step::UnitChoice);
    assert_eq!(
        view.notice.unwrap().kind,
        Some(ErrorKind::ReachabilityRejected)
    );
    assert!(c.session().selection().unit().is_none());
}

#[tokio::test]
async fn test_same_day_booking_conflict_stays_at_confirmation() {
    let backend = backend();
    let mut existing = booked_by("ana", monday(), "10:00:00");
    existing.unit_id = "u3".into();
    backend.add_reservation(existing);
    let mut c = controller(&backend);

    direct_to_date_choice(&mut c).await;
    monday_nine_to_confirmation(&mut c).await;
    let view = c.dispatch(Action::Confirm).await.unwrap();

    assert_eq!(view.step, Step::Confirmation);
    assert_eq!(view.notice.unwrap().kind, Some(ErrorKind::Conflict));
    assert_eq!(backend.reservations().len(), 1);
}

#[tokio::test]
async fn test_remote_failure_offers_retry() {
    let backend = backend();
    backend.fail_on("list_units");
    let mut c = controller(&backend);
    c.start().await.unwrap();
    c.dispatch(Action::GoDirect).await.unwrap();
    c.dispatch(Action::ToggleVaccine("flu".into())).await.unwrap();

    let view = c.dispatch(Action::ContinueToUnits).await.unwrap();
    assert_eq!(view.step, Step::VaccineListing);
    assert!(view.allows(ActionKind::Retry));
    assert_eq!(view.notice.unwrap().kind, Some(ErrorKind::RemoteFailure));

    backend.recover("list_units");
    let view = c.dispatch(Action::Retry).await.unwrap();
    assert_eq!(view.step, Step::UnitChoice);
    assert!(!view.allows(ActionKind::Retry));
}

#[tokio::test]
async fn test_back_walks_to_previous_step() {
    let backend = backend();
    let mut c = controller(&backend);
    direct_to_date_choice(&mut c).await;
    monday_nine_to_confirmation(&mut c).await;

    let view = c.dispatch(Action::Back).await.unwrap();
    assert_eq!(view.step, Step::PaymentChoice);
    assert!(c.session().selection().payment_method().is_none());

    let view = c
        .dispatch(Action::SelectPaymentMethod("card".into()))
        .await
        .unwrap();
    assert_eq!(view.step, Step::Confirmation);

    let view = c.dispatch(Action::ChangeDate).await.unwrap();
    assert_eq!(view.step, Step::DateChoice);
    assert_eq!(c.session().selection().date(), None);
    assert_eq!(c.session().selection().vaccine_count(), 1);
}

#[tokio::test]
async fn test_committed_booking_closes() {
    let backend = backend();
    let mut c = controller(&backend);
    direct_to_date_choice(&mut c).await;
    monday_nine_to_confirmation(&mut c).await;
    c.dispatch(Action::Confirm).await.unwrap();

    let view = c.dispatch(Action::Close).await.unwrap();
    assert_eq!(view.step, Step::Closed);
    assert_eq!(view.actions, vec![ActionKind::Start]);
}
