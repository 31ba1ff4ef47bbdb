use crate::core::availability::format_time;
use crate::domain::model::{
    CapacityCheck, FollowUpRequest, PaymentMethod, Quote, QuoteId, Reservation, ReservationId,
    ReservationStatus, Unit, UnitId, UserId, Vaccine, WeeklyScheduleEntry, Weekday,
};
use crate::domain::ports::{CatalogAccessor, QuoteRepository, ReservationGateway, SessionProvider};
use crate::utils::error::{BookingError, ConflictKind, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Seed data for [`InMemoryBackend`], loadable from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default)]
    pub vaccines: Vec<Vaccine>,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default)]
    pub payment_methods: Vec<PaymentMethod>,
    /// Units that serve the signed-in user's postal code.
    #[serde(default)]
    pub reachable_units: Vec<UnitId>,
    #[serde(default)]
    pub schedule: Vec<WeeklyScheduleEntry>,
    #[serde(default)]
    pub quotes: Vec<Quote>,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

impl Fixture {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Debug, Default)]
struct State {
    user: Option<UserId>,
    vaccines: Vec<Vaccine>,
    units: Vec<Unit>,
    payment_methods: Vec<PaymentMethod>,
    reachable: HashMap<UserId, Vec<UnitId>>,
    schedule: Vec<WeeklyScheduleEntry>,
    quotes: Vec<Quote>,
    reservations: Vec<Reservation>,
    follow_ups: Vec<FollowUpRequest>,
    failing: HashSet<&'static str>,
    calls: Vec<&'static str>,
}

/// Process-local stand-in for the remote data service. Applies the same
/// capacity rules the service does, so the wizard can be exercised end to end
/// without a network.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let mut reachable = HashMap::new();
        if let Some(user) = &fixture.user {
            reachable.insert(user.clone(), fixture.reachable_units.clone());
        }
        Self {
            state: Mutex::new(State {
                user: fixture.user,
                vaccines: fixture.vaccines,
                units: fixture.units,
                payment_methods: fixture.payment_methods,
                reachable,
                schedule: fixture.schedule,
                quotes: fixture.quotes,
                reservations: fixture.reservations,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, operation: &'static str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(operation);
        if state.failing.contains(operation) {
            return Err(BookingError::remote(format!("{} failed", operation)));
        }
        Ok(())
    }

    pub fn sign_in(&self, user: UserId) {
        self.lock().user = Some(user);
    }

    pub fn add_vaccine(&self, vaccine: Vaccine) {
        self.lock().vaccines.push(vaccine);
    }

    pub fn add_unit(&self, unit: Unit, reachable_by: Option<&UserId>) {
        let mut state = self.lock();
        if let Some(user) = reachable_by {
            state
                .reachable
                .entry(user.clone())
                .or_default()
                .push(unit.id.clone());
        }
        state.units.push(unit);
    }

    pub fn add_payment_method(&self, method: PaymentMethod) {
        self.lock().payment_methods.push(method);
    }

    pub fn add_schedule(&self, entry: WeeklyScheduleEntry) {
        self.lock().schedule.push(entry);
    }

    pub fn add_quote(&self, quote: Quote) {
        self.lock().quotes.push(quote);
    }

    pub fn add_reservation(&self, reservation: Reservation) {
        self.lock().reservations.push(reservation);
    }

    /// Makes every later call to `operation` fail with a remote error.
    pub fn fail_on(&self, operation: &'static str) {
        self.lock().failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.lock().failing.remove(operation);
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.lock().reservations.clone()
    }

    pub fn quotes(&self) -> Vec<Quote> {
        self.lock().quotes.clone()
    }

    pub fn follow_ups(&self) -> Vec<FollowUpRequest> {
        self.lock().follow_ups.clone()
    }

    /// Names of the operations invoked so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }
}

fn same_slot(reservation: &Reservation, unit: &UnitId, date: NaiveDate, time: &str) -> bool {
    !reservation.status.is_cancelled()
        && &reservation.unit_id == unit
        && reservation.date == date
        && format_time(&reservation.time) == format_time(time)
}

fn capacity_of(state: &State, unit: &UnitId, date: NaiveDate, time: &str, new_vaccines: u32) -> CapacityCheck {
    let weekday = Weekday::of(date);
    let entry = state.schedule.iter().find(|e| {
        &e.unit_id == unit
            && e.weekday == weekday
            && e.is_offered()
            && format_time(&e.start_time) == format_time(time)
    });

    let taken: Vec<&Reservation> = state
        .reservations
        .iter()
        .filter(|r| same_slot(r, unit, date, time))
        .collect();
    let existing_reservations = taken.len() as u32;
    let existing_vaccines: u32 = taken.iter().map(|r| r.vaccine_ids.len() as u32).sum();

    let (reservation_ceiling, vaccine_ceiling) = match entry {
        Some(e) => (
            e.capacity.unwrap_or(0),
            e.vaccine_capacity.unwrap_or(u32::MAX),
        ),
        None => (0, 0),
    };

    let allowed = existing_reservations < reservation_ceiling
        && existing_vaccines.saturating_add(new_vaccines) <= vaccine_ceiling;

    CapacityCheck {
        allowed,
        existing_reservations,
        reservation_ceiling,
        existing_vaccines,
        vaccine_ceiling,
    }
}

#[async_trait]
impl SessionProvider for InMemoryBackend {
    async fn current_user(&self) -> Result<Option<UserId>> {
        self.record("current_user")?;
        Ok(self.lock().user.clone())
    }
}

#[async_trait]
impl CatalogAccessor for InMemoryBackend {
    async fn list_vaccines(&self, active_only: bool) -> Result<Vec<Vaccine>> {
        self.record("list_vaccines")?;
        Ok(self
            .lock()
            .vaccines
            .iter()
            .filter(|v| !active_only || v.active)
            .cloned()
            .collect())
    }

    async fn list_units(&self, active_only: bool) -> Result<Vec<Unit>> {
        self.record("list_units")?;
        Ok(self
            .lock()
            .units
            .iter()
            .filter(|u| !active_only || u.is_active())
            .cloned()
            .collect())
    }

    async fn list_payment_methods(&self) -> Result<Vec<PaymentMethod>> {
        self.record("list_payment_methods")?;
        Ok(self.lock().payment_methods.clone())
    }

    async fn units_reachable_by_user(&self, user: &UserId) -> Result<Vec<UnitId>> {
        self.record("units_reachable_by_user")?;
        Ok(self.lock().reachable.get(user).cloned().unwrap_or_default())
    }

    async fn weekly_schedule_for(&self, unit: &UnitId) -> Result<Vec<WeeklyScheduleEntry>> {
        self.record("weekly_schedule_for")?;
        Ok(self
            .lock()
            .schedule
            .iter()
            .filter(|e| &e.unit_id == unit)
            .cloned()
            .collect())
    }

    async fn weekly_schedule_for_day(
        &self,
        unit: &UnitId,
        weekday: Weekday,
    ) -> Result<Vec<WeeklyScheduleEntry>> {
        self.record("weekly_schedule_for_day")?;
        Ok(self
            .lock()
            .schedule
            .iter()
            .filter(|e| &e.unit_id == unit && e.weekday == weekday)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl QuoteRepository for InMemoryBackend {
    async fn quotes_for(&self, user: &UserId) -> Result<Vec<Quote>> {
        self.record("quotes_for")?;
        Ok(self
            .lock()
            .quotes
            .iter()
            .filter(|q| &q.user_id == user)
            .cloned()
            .collect())
    }

    async fn delete_quote(&self, quote: &QuoteId) -> Result<()> {
        self.record("delete_quote")?;
        self.lock().quotes.retain(|q| &q.id != quote);
        Ok(())
    }
}

#[async_trait]
impl ReservationGateway for InMemoryBackend {
    async fn check_capacity(
        &self,
        unit: &UnitId,
        date: NaiveDate,
        time: &str,
        new_vaccine_count: u32,
    ) -> Result<CapacityCheck> {
        self.record("check_capacity")?;
        let state = self.lock();
        Ok(capacity_of(&state, unit, date, time, new_vaccine_count))
    }

    async fn create_reservation(&self, reservation: &Reservation) -> Result<ReservationId> {
        self.record("create_reservation")?;
        let mut state = self.lock();

        let check = capacity_of(
            &state,
            &reservation.unit_id,
            reservation.date,
            &reservation.time,
            reservation.vaccine_ids.len() as u32,
        );
        if !check.allowed {
            return Err(BookingError::ConflictError {
                kind: ConflictKind::SlotTaken,
            });
        }

        let id = ReservationId::new(format!("res-{}", state.reservations.len() + 1));
        let mut stored = reservation.clone();
        stored.id = Some(id.clone());
        state.reservations.push(stored);
        Ok(id)
    }

    async fn cancel_reservation(&self, reservation: &ReservationId) -> Result<()> {
        self.record("cancel_reservation")?;
        let mut state = self.lock();
        let found = state
            .reservations
            .iter_mut()
            .find(|r| r.id.as_ref() == Some(reservation))
            .ok_or_else(|| BookingError::validation("reservation", format!("{} not found", reservation)))?;
        found.status = ReservationStatus::Cancelled;
        Ok(())
    }

    async fn active_reservation_on(
        &self,
        user: &UserId,
        date: NaiveDate,
    ) -> Result<Option<Reservation>> {
        self.record("active_reservation_on")?;
        Ok(self
            .lock()
            .reservations
            .iter()
            .find(|r| &r.user_id == user && r.date == date && !r.status.is_cancelled())
            .cloned())
    }

    async fn create_follow_up_request(&self, request: &FollowUpRequest) -> Result<()> {
        self.record("create_follow_up_request")?;
        self.lock().follow_ups.push(request.clone());
        Ok(())
    }
}
