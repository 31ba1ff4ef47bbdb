use crate::domain::model::{Unit, UnitId, WeeklyScheduleEntry, Weekday};
use crate::domain::ports::CatalogAccessor;
use crate::utils::error::{BookingError, Result};
use crate::utils::validation::validate_not_past;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeSet;
use std::sync::Arc;

const TIME_FORMATS: [&str; 3] = ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// One bookable time window on a concrete date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Start time exactly as stored; this is what a reservation records.
    pub start_time: String,
    pub end_time: String,
    pub label: String,
    /// Reservation ceiling from the weekly schedule. Bookings already taken
    /// are not subtracted; the committer checks what is left.
    pub capacity: u32,
}

impl Slot {
    fn from_entry(entry: &WeeklyScheduleEntry) -> Self {
        Self {
            start_time: entry.start_time.clone(),
            end_time: entry.end_time.clone(),
            label: format!(
                "{} - {}",
                format_time(&entry.start_time),
                format_time(&entry.end_time)
            ),
            capacity: entry.capacity.unwrap_or(0),
        }
    }

    pub fn display(&self) -> String {
        let noun = if self.capacity == 1 { "spot" } else { "spots" };
        format!("{} ({} {})", self.label, self.capacity, noun)
    }
}

/// Normalizes `HH:MM[:SS]` or a full timestamp to zero-padded `HH:MM`.
/// Anything unparseable comes back unchanged.
pub fn format_time(raw: &str) -> String {
    let trimmed = raw.trim();

    let time = TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(trimmed).ok().map(|dt| dt.time()))
        .or_else(|| {
            TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.time())
        });

    match time {
        Some(t) => t.format("%H:%M").to_string(),
        None => raw.to_string(),
    }
}

pub fn served_weekdays(entries: &[WeeklyScheduleEntry]) -> BTreeSet<Weekday> {
    entries
        .iter()
        .filter(|e| e.is_offered())
        .map(|e| e.weekday)
        .collect()
}

pub fn describe_weekdays(days: &BTreeSet<Weekday>) -> String {
    if days.is_empty() {
        return "no days".to_string();
    }
    days.iter()
        .map(|d| d.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Offered slots for one weekday, earliest first.
pub fn slots_from(entries: &[WeeklyScheduleEntry], weekday: Weekday) -> Vec<Slot> {
    let mut slots: Vec<Slot> = entries
        .iter()
        .filter(|e| e.weekday == weekday && e.is_offered())
        .map(Slot::from_entry)
        .collect();
    slots.sort_by(|a, b| format_time(&a.start_time).cmp(&format_time(&b.start_time)));
    slots
}

pub struct AvailabilityResolver<C: CatalogAccessor + ?Sized> {
    catalog: Arc<C>,
}

impl<C: CatalogAccessor + ?Sized> Clone for AvailabilityResolver<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
        }
    }
}

impl<C: CatalogAccessor + ?Sized> AvailabilityResolver<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self { catalog }
    }

    /// Weekdays on which the unit has at least one slot with capacity.
    pub async fn served_weekdays(&self, unit: &UnitId) -> Result<BTreeSet<Weekday>> {
        let entries = self.catalog.weekly_schedule_for(unit).await?;
        let days = served_weekdays(&entries);
        tracing::debug!("📅 Unit {} serves: {}", unit, describe_weekdays(&days));
        Ok(days)
    }

    /// Bookable slots for `unit` on `date`. An empty vector means the unit has
    /// nothing that day; presenting that is the caller's job.
    pub async fn slots_for(&self, unit: &Unit, date: NaiveDate, today: NaiveDate) -> Result<Vec<Slot>> {
        if !unit.is_active() {
            return Err(BookingError::validation(
                "unit",
                format!("{} is not active", unit.name),
            ));
        }
        validate_not_past("date", date, today)?;

        let weekday = Weekday::of(date);
        let entries = self
            .catalog
            .weekly_schedule_for_day(&unit.id, weekday)
            .await?;
        let slots = slots_from(&entries, weekday);

        tracing::debug!(
            "🕘 Unit {} on {} ({}): {} slot(s)",
            unit.id,
            date,
            weekday,
            slots.len()
        );
        Ok(slots)
    }
}
