use crate::domain::model::{Money, PaymentMethod, Quote, Unit, Vaccine, VaccineId};
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingMode {
    Quote,
    Direct,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChosenVaccine {
    pub id: VaccineId,
    pub name: String,
    pub price: Money,
}

impl From<&Vaccine> for ChosenVaccine {
    fn from(vaccine: &Vaccine) -> Self {
        Self {
            id: vaccine.id.clone(),
            name: vaccine.name.clone(),
            price: vaccine.price,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChosenSlot {
    pub start_time: String,
    pub label: String,
}

/// Everything the person has picked so far. Choosing an earlier field clears
/// the ones that depend on it, so the state never holds a time for a date
/// that is no longer selected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
    mode: Option<BookingMode>,
    quote: Option<Quote>,
    quote_vaccines: Vec<ChosenVaccine>,
    vaccines: BTreeMap<VaccineId, ChosenVaccine>,
    unit: Option<Unit>,
    date: Option<NaiveDate>,
    slot: Option<ChosenSlot>,
    payment_method: Option<PaymentMethod>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn mode(&self) -> Option<BookingMode> {
        self.mode
    }

    pub fn choose_mode(&mut self, mode: BookingMode) {
        if self.mode != Some(mode) {
            self.reset();
            self.mode = Some(mode);
        }
    }

    pub fn clear_mode(&mut self) {
        self.reset();
    }

    /// Adds the vaccine when absent, removes it when present. Returns whether
    /// it is selected afterwards.
    pub fn toggle_vaccine(&mut self, vaccine: &Vaccine) -> bool {
        if self.vaccines.remove(&vaccine.id).is_some() {
            false
        } else {
            self.vaccines
                .insert(vaccine.id.clone(), ChosenVaccine::from(vaccine));
            true
        }
    }

    pub fn is_vaccine_selected(&self, id: &VaccineId) -> bool {
        self.vaccines.contains_key(id)
    }

    /// Pins a quote and resolves its vaccine ids against the catalog for display.
    pub fn set_quote(&mut self, quote: Quote, catalog: &[Vaccine]) {
        self.quote_vaccines = quote
            .vaccine_ids
            .iter()
            .map(|id| match catalog.iter().find(|v| &v.id == id) {
                Some(vaccine) => ChosenVaccine::from(vaccine),
                None => ChosenVaccine {
                    id: id.clone(),
                    name: id.to_string(),
                    price: Money::ZERO,
                },
            })
            .collect();
        self.quote = Some(quote);
        self.clear_unit();
    }

    pub fn clear_quote(&mut self) {
        self.quote = None;
        self.quote_vaccines.clear();
        self.clear_unit();
    }

    pub fn quote(&self) -> Option<&Quote> {
        self.quote.as_ref()
    }

    /// Vaccines that would go on the reservation, whichever mode produced them.
    pub fn vaccines(&self) -> Vec<&ChosenVaccine> {
        match self.mode {
            Some(BookingMode::Quote) => self.quote_vaccines.iter().collect(),
            Some(BookingMode::Direct) => self.vaccines.values().collect(),
            None => Vec::new(),
        }
    }

    pub fn vaccine_ids(&self) -> Vec<VaccineId> {
        self.vaccines().into_iter().map(|v| v.id.clone()).collect()
    }

    pub fn vaccine_count(&self) -> u32 {
        self.vaccines().len() as u32
    }

    pub fn has_vaccines(&self) -> bool {
        self.vaccine_count() > 0
    }

    /// Sum of selected prices in direct mode, the stored quote total otherwise.
    pub fn total(&self) -> Money {
        match self.mode {
            Some(BookingMode::Quote) => self.quote.as_ref().map(|q| q.total).unwrap_or_default(),
            Some(BookingMode::Direct) => self.vaccines.values().map(|v| v.price).sum(),
            None => Money::ZERO,
        }
    }

    pub fn unit(&self) -> Option<&Unit> {
        self.unit.as_ref()
    }

    pub fn set_unit(&mut self, unit: Unit) {
        self.unit = Some(unit);
        self.clear_date();
    }

    pub fn clear_unit(&mut self) {
        self.unit = None;
        self.clear_date();
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn set_date(&mut self, date: NaiveDate) {
        self.date = Some(date);
        self.clear_slot();
    }

    pub fn clear_date(&mut self) {
        self.date = None;
        self.clear_slot();
    }

    pub fn slot(&self) -> Option<&ChosenSlot> {
        self.slot.as_ref()
    }

    pub fn time(&self) -> Option<&str> {
        self.slot.as_ref().map(|s| s.start_time.as_str())
    }

    pub fn set_slot(&mut self, slot: ChosenSlot) {
        self.slot = Some(slot);
        self.payment_method = None;
    }

    pub fn clear_slot(&mut self) {
        self.slot = None;
        self.payment_method = None;
    }

    pub fn payment_method(&self) -> Option<&PaymentMethod> {
        self.payment_method.as_ref()
    }

    pub fn set_payment_method(&mut self, method: PaymentMethod) {
        self.payment_method = Some(method);
    }

    pub fn clear_payment_method(&mut self) {
        self.payment_method = None;
    }

    /// True once anything past the mode choice has been picked.
    pub fn has_progress(&self) -> bool {
        self.quote.is_some()
            || !self.vaccines.is_empty()
            || self.unit.is_some()
            || self.date.is_some()
            || self.slot.is_some()
            || self.payment_method.is_some()
    }

    pub fn summary(&self) -> BookingSummary {
        BookingSummary {
            vaccines: self
                .vaccines()
                .into_iter()
                .map(|v| (v.name.clone(), v.price))
                .collect(),
            total: self.total(),
            unit: self.unit.as_ref().map(|u| u.name.clone()),
            date: self.date,
            time: self.slot.as_ref().map(|s| s.label.clone()),
            payment_method: self.payment_method.as_ref().map(|p| p.name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingSummary {
    pub vaccines: Vec<(String, Money)>,
    pub total: Money,
    pub unit: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub payment_method: Option<String>,
}

impl BookingSummary {
    pub fn render(&self) -> String {
        let mut lines = vec!["Please review your booking:".to_string()];
        for (name, price) in &self.vaccines {
            lines.push(format!("  - {} ({})", name, price));
        }
        lines.push(format!("Total: {}", self.total));
        if let Some(unit) = &self.unit {
            lines.push(format!("Unit: {}", unit));
        }
        if let Some(date) = self.date {
            lines.push(format!("Date: {}", date.format("%Y-%m-%d")));
        }
        if let Some(time) = &self.time {
            lines.push(format!("Time: {}", time));
        }
        if let Some(method) = &self.payment_method {
            lines.push(format!("Payment: {}", method));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{QuoteId, UnitId, UnitStatus, UserId};

    fn vaccine(id: &str, cents: i64) -> Vaccine {
        Vaccine {
            id: VaccineId::from(id),
            name: id.to_uppercase(),
            price: Money::from_cents(cents),
            doses: 1,
            active: true,
            insurance_price: None,
            insurance_available: None,
        }
    }

    fn unit() -> Unit {
        Unit {
            id: UnitId::from("u1"),
            name: "Downtown".to_string(),
            status: UnitStatus::Active,
            app_booking: true,
        }
    }

    #[test]
    fn test_toggle_twice_restores_selection_and_total() {
        let mut state = SelectionState::new();
        state.choose_mode(BookingMode::Direct);
        let flu = vaccine("flu", 8990);
        let hpv = vaccine("hpv", 45050);

        state.toggle_vaccine(&flu);
        let before = state.clone();
        let total_before = state.total();

        assert!(state.toggle_vaccine(&hpv));
        assert_eq!(state.total(), Money::from_cents(54040));
        assert!(!state.toggle_vaccine(&hpv));

        assert_eq!(state, before);
        assert_eq!(state.total(), total_before);
    }

    #[test]
    fn test_quote_mode_total_is_stored_total() {
        let mut state = SelectionState::new();
        state.choose_mode(BookingMode::Quote);
        let catalog = vec![vaccine("flu", 8990), vaccine("hpv", 45050)];
        state.set_quote(
            Quote {
                id: QuoteId::from("q1"),
                user_id: UserId::from("user"),
                vaccine_ids: vec![VaccineId::from("flu"), VaccineId::from("hpv")],
                total: Money::from_cents(50000),
            },
            &catalog,
        );

        assert_eq!(state.total(), Money::from_cents(50000));
        assert_eq!(state.vaccine_count(), 2);
        assert_eq!(state.summary().vaccines[0].0, "FLU");
    }

    #[test]
    fn test_earlier_choice_clears_dependents() {
        let mut state = SelectionState::new();
        state.choose_mode(BookingMode::Direct);
        state.set_unit(unit());
        state.set_date(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        state.set_slot(ChosenSlot {
            start_time: "09:00:00".to_string(),
            label: "09:00 - 10:00".to_string(),
        });

        state.set_unit(unit());
        assert!(state.date().is_none());
        assert!(state.time().is_none());
    }

    #[test]
    fn test_switching_mode_resets_everything() {
        let mut state = SelectionState::new();
        state.choose_mode(BookingMode::Direct);
        state.toggle_vaccine(&vaccine("flu", 100));
        assert!(state.has_progress());

        state.choose_mode(BookingMode::Quote);
        assert!(!state.has_progress());
        assert_eq!(state.total(), Money::ZERO);
    }
}
