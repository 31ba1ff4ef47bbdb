use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(UserId);
string_id!(VaccineId);
string_id!(UnitId);
string_id!(PaymentMethodId);
string_id!(QuoteId);
string_id!(ReservationId);

/// Monetary amount in cents. The remote service stores decimals; everything
/// inside the crate adds integers so totals stay exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub fn from_decimal(value: f64) -> Self {
        Money((value * 100.0).round() as i64)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace(',', ".");
        normalized
            .parse::<f64>()
            .map(Money::from_decimal)
            .map_err(|_| format!("invalid amount '{}'", s))
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_decimal())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Money::from_decimal(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// The seven canonical day labels used by weekly schedule rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn of(date: NaiveDate) -> Self {
        use chrono::Datelike;
        Weekday::from(date.weekday())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
            Weekday::Sunday => "Sunday",
        }
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Weekday {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Weekday::ALL
            .iter()
            .copied()
            .find(|day| day.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown weekday '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vaccine {
    pub id: VaccineId,
    pub name: String,
    pub price: Money,
    pub doses: i32,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub insurance_price: Option<Money>,
    /// `Some(false)` marks a vaccine without negotiated insurance pricing;
    /// those are handled as manual follow-up requests.
    #[serde(default)]
    pub insurance_available: Option<bool>,
}

impl Vaccine {
    pub fn is_listable(&self) -> bool {
        self.active && self.price.is_positive() && self.doses > 0
    }

    pub fn is_request_only(&self) -> bool {
        self.insurance_available == Some(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub status: UnitStatus,
    #[serde(default)]
    pub app_booking: bool,
}

impl Unit {
    pub fn is_active(&self) -> bool {
        self.status == UnitStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyScheduleEntry {
    pub unit_id: UnitId,
    pub weekday: Weekday,
    pub start_time: String,
    pub end_time: String,
    /// Reservation ceiling for the slot; zero or absent means not offered.
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub vaccine_capacity: Option<u32>,
}

impl WeeklyScheduleEntry {
    pub fn is_offered(&self) -> bool {
        self.capacity.unwrap_or(0) > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub user_id: UserId,
    pub vaccine_ids: Vec<VaccineId>,
    pub total: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReservationStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ReservationId>,
    pub user_id: UserId,
    pub unit_id: UnitId,
    pub payment_method_id: PaymentMethodId,
    pub total: Money,
    pub date: NaiveDate,
    pub time: String,
    pub vaccine_ids: Vec<VaccineId>,
    pub status: ReservationStatus,
}

/// Answer of the server-side capacity check for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityCheck {
    pub allowed: bool,
    #[serde(alias = "existingReservations")]
    pub existing_reservations: u32,
    #[serde(alias = "reservationCeiling")]
    pub reservation_ceiling: u32,
    #[serde(alias = "existingVaccines")]
    pub existing_vaccines: u32,
    #[serde(alias = "vaccineCeiling")]
    pub vaccine_ceiling: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRequest {
    pub user_id: UserId,
    pub vaccine_ids: Vec<VaccineId>,
    pub note: String,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_is_exact() {
        let total: Money = [0.1, 0.2, 0.7]
            .iter()
            .map(|v| Money::from_decimal(*v))
            .sum();
        assert_eq!(total, Money::from_cents(100));
        assert_eq!(total.to_string(), "1.00");
        assert_eq!(Money::from_cents(-5).to_string(), "-0.05");
    }

    #[test]
    fn test_money_deserializes_numbers_and_strings() {
        let from_number: Money = serde_json::from_str("120.5").unwrap();
        let from_text: Money = serde_json::from_str("\"120,50\"").unwrap();
        assert_eq!(from_number, Money::from_cents(12050));
        assert_eq!(from_text, from_number);
    }

    #[test]
    fn test_weekday_of_date() {
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(Weekday::of(monday), Weekday::Monday);
        assert_eq!("sunday".parse::<Weekday>().unwrap(), Weekday::Sunday);
        assert!("Funday".parse::<Weekday>().is_err());
    }

    #[test]
    fn test_vaccine_listing_filter() {
        let mut vaccine = Vaccine {
            id: VaccineId::from("flu"),
            name: "Influenza".to_string(),
            price: Money::from_cents(9000),
            doses: 1,
            active: true,
            insurance_price: None,
            insurance_available: None,
        };
        assert!(vaccine.is_listable());

        vaccine.doses = 0;
        assert!(!vaccine.is_listable());

        vaccine.doses = 1;
        vaccine.price = Money::ZERO;
        assert!(!vaccine.is_listable());
    }

    #[test]
    fn test_schedule_entry_offered() {
        let mut entry = WeeklyScheduleEntry {
            unit_id: UnitId::from("u1"),
            weekday: Weekday::Monday,
            start_time: "09:00".to_string(),
            end_time: "10:00".to_string(),
            capacity: None,
            vaccine_capacity: None,
        };
        assert!(!entry.is_offered());
        entry.capacity = Some(0);
        assert!(!entry.is_offered());
        entry.capacity = Some(2);
        assert!(entry.is_offered());
    }
}
