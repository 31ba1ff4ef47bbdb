use crate::core::availability::format_time;
use crate::core::selection::{BookingMode, SelectionState};
use crate::domain::model::{
    Money, PaymentMethodId, QuoteId, Reservation, ReservationId, ReservationStatus, UnitId,
    UserId, VaccineId,
};
use crate::domain::ports::{QuoteRepository, ReservationGateway};
use crate::utils::error::{BookingError, ConflictKind, Result};
use crate::utils::validation::require_selection;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Fully validated input for one reservation write.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequest {
    pub user: UserId,
    pub unit: UnitId,
    pub date: NaiveDate,
    pub time: String,
    pub payment_method: PaymentMethodId,
    pub vaccine_ids: Vec<VaccineId>,
    pub total: Money,
    pub quote: Option<QuoteId>,
}

impl CommitRequest {
    /// Fails with a validation error naming the first missing field.
    pub fn from_selection(user: &UserId, selection: &SelectionState) -> Result<Self> {
        let mode = *require_selection("booking_mode", &selection.mode())?;
        let quote = match mode {
            BookingMode::Quote => Some(require_selection("quote", &selection.quote().cloned())?.id.clone()),
            BookingMode::Direct => None,
        };
        if !selection.has_vaccines() {
            return Err(BookingError::validation("vaccines", "select at least one vaccine"));
        }
        let unit = require_selection("unit", &selection.unit().cloned())?.id.clone();
        let date = *require_selection("date", &selection.date())?;
        let time = require_selection("time", &selection.time().map(str::to_string))?.clone();
        let payment_method = require_selection("payment_method", &selection.payment_method().cloned())?
            .id
            .clone();

        Ok(Self {
            user: user.clone(),
            unit,
            date,
            time,
            payment_method,
            vaccine_ids: selection.vaccine_ids(),
            total: selection.total(),
            quote,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.vaccine_ids.is_empty() {
            return Err(BookingError::validation("vaccines", "select at least one vaccine"));
        }
        if self.time.trim().is_empty() {
            return Err(BookingError::validation("time", "is required"));
        }
        Ok(())
    }

    fn slot_key(&self) -> SlotKey {
        SlotKey {
            unit: self.unit.clone(),
            date: self.date,
            time: format_time(&self.time),
        }
    }

    fn to_reservation(&self) -> Reservation {
        Reservation {
            id: None,
            user_id: self.user.clone(),
            unit_id: self.unit.clone(),
            payment_method_id: self.payment_method.clone(),
            total: self.total,
            date: self.date,
            time: self.time.clone(),
            vaccine_ids: self.vaccine_ids.clone(),
            status: ReservationStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteCleanup {
    NotApplicable,
    Deleted,
    /// Reservation stands; the quote could not be removed.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub reservation_id: ReservationId,
    pub reservation: Reservation,
    pub quote_cleanup: QuoteCleanup,
}

impl CommitOutcome {
    pub fn is_partial(&self) -> bool {
        matches!(self.quote_cleanup, QuoteCleanup::Failed(_))
    }

    pub fn message(&self) -> String {
        let booked = format!(
            "Appointment booked for {} at {} (reservation {}).",
            self.reservation.date.format("%Y-%m-%d"),
            format_time(&self.reservation.time),
            self.reservation_id
        );
        match &self.quote_cleanup {
            QuoteCleanup::Failed(_) => format!(
                "{} Your quote could not be removed; you can delete it from your quotes page.",
                booked
            ),
            _ => booked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    unit: UnitId,
    date: NaiveDate,
    time: String,
}

/// One async lock per (unit, date, time) so a capacity check and its write
/// never interleave with another commit to the same slot from this process.
#[derive(Debug, Default)]
struct SlotLocks {
    slots: Mutex<HashMap<SlotKey, Arc<AsyncMutex<()>>>>,
}

impl SlotLocks {
    async fn acquire(&self, key: SlotKey) -> SlotGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        SlotGuard {
            locks: self,
            key,
            held: Some(slot.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Holds a slot lock and drops the table entry once nobody else wants it.
struct SlotGuard<'a> {
    locks: &'a SlotLocks,
    key: SlotKey,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        // The owned guard keeps its own Arc, so release it before counting.
        drop(self.held.take());
        let mut slots = self.locks.slots.lock().unwrap_or_else(|p| p.into_inner());
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

pub struct ReservationCommitter<G: QuoteRepository + ReservationGateway + ?Sized> {
    gateway: Arc<G>,
    locks: Arc<SlotLocks>,
}

impl<G: QuoteRepository + ReservationGateway + ?Sized> Clone for ReservationCommitter<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<G: QuoteRepository + ReservationGateway + ?Sized> ReservationCommitter<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            locks: Arc::new(SlotLocks::default()),
        }
    }

    /// Capacity check, duplicate guard and insert as one serialized step per
    /// slot, followed by best-effort removal of the source quote.
    pub async fn commit(&self, request: &CommitRequest) -> Result<CommitOutcome> {
        request.validate()?;
        let new_vaccines = request.vaccine_ids.len() as u32;

        let _slot = self.locks.acquire(request.slot_key()).await;
        tracing::info!(
            "🔒 Committing {} vaccine(s) at unit {} on {} {}",
            new_vaccines,
            request.unit,
            request.date,
            request.time
        );

        let check = self
            .gateway
            .check_capacity(&request.unit, request.date, &request.time, new_vaccines)
            .await?;
        if !check.allowed {
            tracing::warn!(
                "⛔ Capacity refused: {}/{} reservations, {}/{} vaccines",
                check.existing_reservations,
                check.reservation_ceiling,
                check.existing_vaccines,
                check.vaccine_ceiling
            );
            return Err(BookingError::CapacityExceeded {
                existing_reservations: check.existing_reservations,
                reservation_ceiling: check.reservation_ceiling,
                existing_vaccines: check.existing_vaccines,
                vaccine_ceiling: check.vaccine_ceiling,
                requested_vaccines: new_vaccines,
            });
        }

        if let Some(existing) = self
            .gateway
            .active_reservation_on(&request.user, request.date)
            .await?
        {
            tracing::warn!(
                "⛔ User {} already has reservation {:?} on {}",
                request.user,
                existing.id,
                request.date
            );
            return Err(BookingError::ConflictError {
                kind: ConflictKind::UserAlreadyBooked,
            });
        }

        let reservation = request.to_reservation();
        let reservation_id = self.gateway.create_reservation(&reservation).await?;
        tracing::info!("✅ Reservation {} created", reservation_id);

        let quote_cleanup = match &request.quote {
            None => QuoteCleanup::NotApplicable,
            Some(quote) => match self.gateway.delete_quote(quote).await {
                Ok(()) => {
                    tracing::info!("🧹 Quote {} consumed", quote);
                    QuoteCleanup::Deleted
                }
                Err(e) => {
                    tracing::error!("❌ Could not delete quote {}: {}", quote, e);
                    QuoteCleanup::Failed(e.to_string())
                }
            },
        };

        let mut stored = reservation;
        stored.id = Some(reservation_id.clone());
        Ok(CommitOutcome {
            reservation_id,
            reservation: stored,
            quote_cleanup,
        })
    }

    pub async fn cancel(&self, reservation: &ReservationId) -> Result<()> {
        self.gateway.cancel_reservation(reservation).await?;
        tracing::info!("🗑️ Reservation {} cancelled", reservation);
        Ok(())
    }
}
