use crate::core::availability::{format_time, AvailabilityResolver};
use crate::core::committer::{CommitOutcome, CommitRequest, ReservationCommitter};
use crate::domain::model::{Money, PaymentMethodId, QuoteId, UnitId, VaccineId};
use crate::domain::ports::{BookingBackend, Clock};
use crate::utils::error::{BookingError, Result};
use crate::utils::validation::{parse_date, require_selection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// All booking fields submitted at once, as the standalone scheduling page
/// sends them. Either `quote` or `vaccines` provides what is being booked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleForm {
    pub unit: Option<UnitId>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub payment_method: Option<PaymentMethodId>,
    #[serde(default)]
    pub vaccines: Vec<VaccineId>,
    #[serde(default)]
    pub quote: Option<QuoteId>,
}

/// One-shot counterpart of the wizard: same gates, same committer.
pub struct DirectScheduler<B: BookingBackend + ?Sized> {
    backend: Arc<B>,
    resolver: AvailabilityResolver<B>,
    committer: ReservationCommitter<B>,
    clock: Arc<dyn Clock>,
}

impl<B: BookingBackend + ?Sized> DirectScheduler<B> {
    pub fn new(backend: Arc<B>, committer: ReservationCommitter<B>, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver: AvailabilityResolver::new(Arc::clone(&backend)),
            backend,
            committer,
            clock,
        }
    }

    pub async fn submit(&self, form: &ScheduleForm) -> Result<CommitOutcome> {
        let unit_id = require_selection("unit", &form.unit)?;
        let date = parse_date("date", require_selection("date", &form.date)?)?;
        let time = require_selection("time", &form.time)?;
        let payment_id = require_selection("payment_method", &form.payment_method)?;
        if form.quote.is_none() && form.vaccines.is_empty() {
            return Err(BookingError::validation("vaccines", "select at least one vaccine"));
        }

        let user = self
            .backend
            .current_user()
            .await?
            .ok_or(BookingError::Unauthenticated)?;

        let (vaccine_ids, total) = match &form.quote {
            Some(quote_id) => {
                let quote = self
                    .backend
                    .quotes_for(&user)
                    .await?
                    .into_iter()
                    .find(|q| &q.id == quote_id)
                    .ok_or_else(|| BookingError::validation("quote", format!("{} is not one of your quotes", quote_id)))?;
                if quote.vaccine_ids.is_empty() {
                    return Err(BookingError::validation("quote", "this quote has no vaccines"));
                }
                let catalog = self.backend.list_vaccines(false).await?;
                if let Some(vaccine) = catalog
                    .iter()
                    .find(|v| v.is_request_only() && quote.vaccine_ids.contains(&v.id))
                {
                    return Err(BookingError::validation(
                        "quote",
                        format!("{} can only be requested, not booked online", vaccine.name),
                    ));
                }
                (quote.vaccine_ids, quote.total)
            }
            None => {
                let catalog = self.backend.list_vaccines(true).await?;
                let mut chosen: Vec<VaccineId> = Vec::with_capacity(form.vaccines.len());
                let mut total = Money::ZERO;
                for id in &form.vaccines {
                    if chosen.contains(id) {
                        continue;
                    }
                    let vaccine = catalog
                        .iter()
                        .find(|v| &v.id == id && v.is_listable())
                        .ok_or_else(|| BookingError::validation("vaccines", format!("{} is not available", id)))?;
                    if vaccine.is_request_only() {
                        return Err(BookingError::validation(
                            "vaccines",
                            format!("{} can only be requested, not booked online", vaccine.name),
                        ));
                    }
                    total = total + vaccine.price;
                    chosen.push(id.clone());
                }
                (chosen, total)
            }
        };

        let unit = self
            .backend
            .list_units(true)
            .await?
            .into_iter()
            .find(|u| &u.id == unit_id)
            .ok_or_else(|| BookingError::validation("unit", format!("{} is not available", unit_id)))?;
        let reachable = self.backend.units_reachable_by_user(&user).await?;
        if !reachable.contains(&unit.id) {
            return Err(BookingError::ReachabilityRejected { unit: unit.name });
        }
        if !unit.app_booking {
            return Err(BookingError::UnsupportedChannel { unit: unit.name });
        }

        let slots = self.resolver.slots_for(&unit, date, self.clock.today()).await?;
        if slots.is_empty() {
            return Err(BookingError::AvailabilityEmpty { date });
        }
        let wanted = format_time(time);
        let slot = slots
            .iter()
            .find(|s| format_time(&s.start_time) == wanted)
            .ok_or_else(|| BookingError::validation("time", format!("{} is not an available slot", time)))?;

        let payment = self
            .backend
            .list_payment_methods()
            .await?
            .into_iter()
            .find(|m| &m.id == payment_id)
            .ok_or_else(|| BookingError::validation("payment_method", format!("{} is not accepted", payment_id)))?;

        let request = CommitRequest {
            user,
            unit: unit.id,
            date,
            time: slot.start_time.clone(),
            payment_method: payment.id,
            vaccine_ids,
            total,
            quote: form.quote.clone(),
        };
        self.committer.commit(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBackend;
    use crate::domain::model::{
        PaymentMethod, Quote, Unit, UnitStatus, UserId, Vaccine, WeeklyScheduleEntry, Weekday,
    };
    use crate::domain::ports::FixedClock;
    use chrono::NaiveDate;

    fn scheduler() -> (Arc<InMemoryBackend>, DirectScheduler<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        let user = UserId::from("ana");
        backend.sign_in(user.clone());
        backend.add_vaccine(Vaccine {
            id: VaccineId::from("flu"),
            name: "Influenza".to_string(),
            price: Money::from_cents(8990),
            doses: 1,
            active: true,
            insurance_price: None,
            insurance_available: None,
        });
        backend.add_unit(
            Unit {
                id: UnitId::from("u1"),
                name: "Downtown".to_string(),
                status: UnitStatus::Active,
                app_booking: true,
            },
            Some(&user),
        );
        backend.add_payment_method(PaymentMethod {
            id: PaymentMethodId::from("pix"),
            name: "Pix".to_string(),
        });
        backend.add_schedule(WeeklyScheduleEntry {
            unit_id: UnitId::from("u1"),
            weekday: Weekday::Monday,
            start_time: "09:00:00".to_string(),
            end_time: "10:00:00".to_string(),
            capacity: Some(2),
            vaccine_capacity: None,
        });
        let committer = ReservationCommitter::new(Arc::clone(&backend));
        let clock = Arc::new(FixedClock(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()));
        let scheduler = DirectScheduler::new(Arc::clone(&backend), committer, clock);
        (backend, scheduler)
    }

    fn form() -> ScheduleForm {
        ScheduleForm {
            unit: Some(UnitId::from("u1")),
            date: Some("2026-10-19".to_string()),
            time: Some("09:00".to_string()),
            payment_method: Some(PaymentMethodId::from("pix")),
            vaccines: vec![VaccineId::from("flu")],
            quote: None,
        }
    }

    #[tokio::test]
    async fn test_form_books_matching_slot() {
        let (backend, scheduler) = scheduler();
        let outcome = scheduler.submit(&form()).await.unwrap();

        assert_eq!(outcome.reservation.time, "09:00:00");
        assert_eq!(outcome.reservation.total, Money::from_cents(8990));
        assert_eq!(backend.reservations().len(), 1);
    }

    #[tokio::test]
    async fn test_form_missing_field_is_named() {
        let (backend, scheduler) = scheduler();
        let mut incomplete = form();
        incomplete.payment_method = None;

        let err = scheduler.submit(&incomplete).await.unwrap_err();
        assert!(err.to_string().contains("payment_method"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_form_rejects_unserved_day() {
        let (_, scheduler) = scheduler();
        let mut tuesday = form();
        tuesday.date = Some("20/10/2026".to_string());

        let err = scheduler.submit(&tuesday).await.unwrap_err();
        assert!(matches!(err, BookingError::AvailabilityEmpty { .. }));
    }

    #[tokio::test]
    async fn test_form_rejects_unknown_slot() {
        let (_, scheduler) = scheduler();
        let mut late = form();
        late.time = Some("18:00".to_string());

        let err = scheduler.submit(&late).await.unwrap_err();
        assert!(err.to_string().contains("time"));
    }

    #[tokio::test]
    async fn test_repeated_vaccine_is_booked_once() {
        let (backend, scheduler) = scheduler();
        let mut twice = form();
        twice.vaccines = vec![VaccineId::from("flu"), VaccineId::from("flu")];

        let outcome = scheduler.submit(&twice).await.unwrap();

        assert_eq!(outcome.reservation.total, Money::from_cents(8990));
        assert_eq!(outcome.reservation.vaccine_ids, vec![VaccineId::from("flu")]);
        assert_eq!(backend.reservations()[0].vaccine_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_quote_with_request_only_vaccine_is_rejected() {
        let (backend, scheduler) = scheduler();
        backend.add_vaccine(Vaccine {
            id: VaccineId::from("dengue"),
            name: "Dengue".to_string(),
            price: Money::from_cents(15000),
            doses: 2,
            active: true,
            insurance_price: None,
            insurance_available: Some(false),
        });
        backend.add_quote(Quote {
            id: QuoteId::from("q2"),
            user_id: UserId::from("ana"),
            vaccine_ids: vec![VaccineId::from("dengue")],
            total: Money::from_cents(15000),
        });
        let mut from_quote = form();
        from_quote.vaccines.clear();
        from_quote.quote = Some(QuoteId::from("q2"));

        let err = scheduler.submit(&from_quote).await.unwrap_err();

        assert!(matches!(err, BookingError::ValidationError { .. }));
        assert!(err.to_string().contains("Dengue"));
        assert!(backend.reservations().is_empty());
        assert_eq!(backend.quotes().len(), 1);
    }
}
