#![allow(dead_code)]

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use vaccine_booking::adapters::{Fixture, InMemoryBackend};
use vaccine_booking::core::controller::WizardController;
use vaccine_booking::core::wizard::{Action, Prompt, WizardSettings, WizardView};
use vaccine_booking::domain::model::{
    Money, Reservation, ReservationStatus, UnitId, UserId, VaccineId,
};
use vaccine_booking::domain::ports::FixedClock;

/// Sunday. The next Monday is 2026-10-19.
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
}

pub fn demo_fixture() -> Fixture {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/fixture.json");
    Fixture::from_file(path).unwrap()
}

pub fn backend() -> Arc<InMemoryBackend> {
    Arc::new(InMemoryBackend::from_fixture(demo_fixture()))
}

pub fn controller(backend: &Arc<InMemoryBackend>) -> WizardController<InMemoryBackend> {
    WizardController::new(
        Arc::clone(backend),
        Arc::new(FixedClock(today())),
        WizardSettings {
            auto_close_after: Duration::from_millis(0),
        },
    )
}

pub fn booked_by(user: &str, date: NaiveDate, time: &str) -> Reservation {
    Reservation {
        id: None,
        user_id: UserId::from(user),
        unit_id: UnitId::from("u1"),
        payment_method_id: "pix".into(),
        total: Money::from_cents(8990),
        date,
        time: time.to_string(),
        vaccine_ids: vec![VaccineId::from("flu")],
        status: ReservationStatus::Pending,
    }
}

/// Every action offered through a choice prompt, in display order.
pub fn offered(view: &WizardView) -> Vec<Action> {
    view.prompts
        .iter()
        .flat_map(|p| match p {
            Prompt::Choice { options, .. } => options
                .iter()
                .filter(|o| o.enabled)
                .map(|o| o.action.clone())
                .collect(),
            _ => Vec::new(),
        })
        .collect()
}

/// Drives a direct booking of influenza at Downtown up to the date step.
pub async fn direct_to_date_choice(c: &mut WizardController<InMemoryBackend>) -> WizardView {
    c.start().await.unwrap();
    c.dispatch(Action::GoDirect).await.unwrap();
    c.dispatch(Action::ToggleVaccine("flu".into())).await.unwrap();
    c.dispatch(Action::ContinueToUnits).await.unwrap();
    c.dispatch(Action::SelectUnit("u1".into())).await.unwrap()
}

/// Continues from the date step to confirmation for Monday 09:00 via Pix.
pub async fn monday_nine_to_confirmation(c: &mut WizardController<InMemoryBackend>) -> WizardView {
    c.dispatch(Action::EnterDate("19/10/2026".to_string())).await.unwrap();
    c.dispatch(Action::SelectTime("09:00".to_string())).await.unwrap();
    c.dispatch(Action::SelectPaymentMethod("pix".into())).await.unwrap()
}
