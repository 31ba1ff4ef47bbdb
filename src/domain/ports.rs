use crate::domain::model::{
    CapacityCheck, FollowUpRequest, PaymentMethod, Quote, QuoteId, Reservation, ReservationId,
    Unit, UnitId, UserId, Vaccine, WeeklyScheduleEntry, Weekday,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<UserId>>;
}

#[async_trait]
pub trait CatalogAccessor: Send + Sync {
    async fn list_vaccines(&self, active_only: bool) -> Result<Vec<Vaccine>>;
    async fn list_units(&self, active_only: bool) -> Result<Vec<Unit>>;
    async fn list_payment_methods(&self) -> Result<Vec<PaymentMethod>>;
    async fn units_reachable_by_user(&self, user: &UserId) -> Result<Vec<UnitId>>;
    async fn weekly_schedule_for(&self, unit: &UnitId) -> Result<Vec<WeeklyScheduleEntry>>;
    async fn weekly_schedule_for_day(
        &self,
        unit: &UnitId,
        weekday: Weekday,
    ) -> Result<Vec<WeeklyScheduleEntry>>;
}

#[async_trait]
pub trait QuoteRepository: Send + Sync {
    async fn quotes_for(&self, user: &UserId) -> Result<Vec<Quote>>;
    async fn delete_quote(&self, quote: &QuoteId) -> Result<()>;
}

#[async_trait]
pub trait ReservationGateway: Send + Sync {
    async fn check_capacity(
        &self,
        unit: &UnitId,
        date: NaiveDate,
        time: &str,
        new_vaccine_count: u32,
    ) -> Result<CapacityCheck>;

    /// Fails with `ConflictError { SlotTaken }` when the slot filled up
    /// between the capacity check and the insert.
    async fn create_reservation(&self, reservation: &Reservation) -> Result<ReservationId>;

    async fn cancel_reservation(&self, reservation: &ReservationId) -> Result<()>;

    /// First non-cancelled reservation the user holds on `date`, if any.
    async fn active_reservation_on(
        &self,
        user: &UserId,
        date: NaiveDate,
    ) -> Result<Option<Reservation>>;

    async fn create_follow_up_request(&self, request: &FollowUpRequest) -> Result<()>;
}

/// Everything the booking core needs from the remote data service.
pub trait BookingBackend:
    SessionProvider + CatalogAccessor + QuoteRepository + ReservationGateway
{
}

impl<T> BookingBackend for T where
    T: SessionProvider + CatalogAccessor + QuoteRepository + ReservationGateway
{
}

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
