use crate::config::toml_config::ServiceConfig;
use crate::domain::model::{
    CapacityCheck, FollowUpRequest, PaymentMethod, Quote, QuoteId, Reservation, ReservationId,
    Unit, UnitId, UserId, Vaccine, WeeklyScheduleEntry, Weekday,
};
use crate::domain::ports::{CatalogAccessor, QuoteRepository, ReservationGateway, SessionProvider};
use crate::utils::error::{BookingError, ConflictKind, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Client for the remote data service: a PostgREST-style table API under
/// `rest/v1`, stored procedures under `rest/v1/rpc`, and the session
/// endpoint under `auth/v1`.
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Inserted {
    id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ReachableUnit {
    unit_id: UnitId,
}

impl RestBackend {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds()))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: config.access_token().map(str::to_string),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        tracing::debug!("📡 {} {}", status, response.url().path());

        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => Err(BookingError::Unauthenticated),
            StatusCode::CONFLICT => Err(BookingError::ConflictError {
                kind: ConflictKind::SlotTaken,
            }),
            _ => Err(BookingError::remote(format!("{} {}", status, body.trim()))),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.execute(builder).await?;
        Ok(response.json::<T>().await?)
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl SessionProvider for RestBackend {
    async fn current_user(&self) -> Result<Option<UserId>> {
        if self.access_token.is_none() {
            return Ok(None);
        }
        match self.fetch::<SessionUser>(self.request(Method::GET, "auth/v1/user")).await {
            Ok(user) => Ok(Some(UserId::new(user.id))),
            Err(BookingError::Unauthenticated) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl CatalogAccessor for RestBackend {
    async fn list_vaccines(&self, active_only: bool) -> Result<Vec<Vaccine>> {
        let mut builder = self
            .request(Method::GET, "rest/v1/vaccines")
            .query(&[("select", "*"), ("order", "name")]);
        if active_only {
            builder = builder.query(&[("active", "eq.true")]);
        }
        self.fetch(builder).await
    }

    async fn list_units(&self, active_only: bool) -> Result<Vec<Unit>> {
        let mut builder = self
            .request(Method::GET, "rest/v1/units")
            .query(&[("select", "*"), ("order", "name")]);
        if active_only {
            builder = builder.query(&[("status", "eq.active")]);
        }
        self.fetch(builder).await
    }

    async fn list_payment_methods(&self) -> Result<Vec<PaymentMethod>> {
        self.fetch(
            self.request(Method::GET, "rest/v1/payment_methods")
                .query(&[("select", "*")]),
        )
        .await
    }

    async fn units_reachable_by_user(&self, user: &UserId) -> Result<Vec<UnitId>> {
        let rows: Vec<ReachableUnit> = self
            .fetch(
                self.request(Method::POST, "rest/v1/rpc/units_reachable_by_user")
                    .json(&serde_json::json!({ "user_id": user })),
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.unit_id).collect())
    }

    async fn weekly_schedule_for(&self, unit: &UnitId) -> Result<Vec<WeeklyScheduleEntry>> {
        self.fetch(
            self.request(Method::GET, "rest/v1/weekly_schedule")
                .query(&[("select", "*".to_string()), ("unit_id", eq(unit))]),
        )
        .await
    }

    async fn weekly_schedule_for_day(
        &self,
        unit: &UnitId,
        weekday: Weekday,
    ) -> Result<Vec<WeeklyScheduleEntry>> {
        self.fetch(self.request(Method::GET, "rest/v1/weekly_schedule").query(&[
            ("select", "*".to_string()),
            ("unit_id", eq(unit)),
            ("weekday", eq(weekday)),
            ("capacity", "gt.0".to_string()),
        ]))
        .await
    }
}

#[async_trait]
impl QuoteRepository for RestBackend {
    async fn quotes_for(&self, user: &UserId) -> Result<Vec<Quote>> {
        self.fetch(
            self.request(Method::GET, "rest/v1/quotes")
                .query(&[("select", "*".to_string()), ("user_id", eq(user))]),
        )
        .await
    }

    async fn delete_quote(&self, quote: &QuoteId) -> Result<()> {
        self.execute(
            self.request(Method::DELETE, "rest/v1/quotes")
                .query(&[("id", eq(quote))]),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ReservationGateway for RestBackend {
    async fn check_capacity(
        &self,
        unit: &UnitId,
        date: NaiveDate,
        time: &str,
        new_vaccine_count: u32,
    ) -> Result<CapacityCheck> {
        self.fetch(
            self.request(Method::POST, "rest/v1/rpc/check_capacity")
                .json(&serde_json::json!({
                    "unit_id": unit,
                    "date": date,
                    "time": time,
                    "new_vaccine_count": new_vaccine_count,
                })),
        )
        .await
    }

    async fn create_reservation(&self, reservation: &Reservation) -> Result<ReservationId> {
        let rows: Vec<Inserted> = self
            .fetch(
                self.request(Method::POST, "rest/v1/reservations")
                    .header("Prefer", "return=representation")
                    .json(reservation),
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| BookingError::remote("reservation insert returned no row"))?;
        let id = match row.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(ReservationId::new(id))
    }

    async fn cancel_reservation(&self, reservation: &ReservationId) -> Result<()> {
        self.execute(
            self.request(Method::PATCH, "rest/v1/reservations")
                .query(&[("id", eq(reservation))])
                .json(&serde_json::json!({ "status": "cancelled" })),
        )
        .await?;
        Ok(())
    }

    async fn active_reservation_on(
        &self,
        user: &UserId,
        date: NaiveDate,
    ) -> Result<Option<Reservation>> {
        let rows: Vec<Reservation> = self
            .fetch(self.request(Method::GET, "rest/v1/reservations").query(&[
                ("select", "*".to_string()),
                ("user_id", eq(user)),
                ("date", eq(date)),
                ("status", "neq.cancelled".to_string()),
                ("limit", "1".to_string()),
            ]))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn create_follow_up_request(&self, request: &FollowUpRequest) -> Result<()> {
        self.execute(
            self.request(Method::POST, "rest/v1/follow_up_requests")
                .json(request),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Money;
    use httpmock::prelude::*;

    fn backend(server: &MockServer, token: Option<&str>) -> RestBackend {
        RestBackend::new(&ServiceConfig {
            base_url: server.base_url(),
            api_key: "anon-key".to_string(),
            access_token: token.map(str::to_string),
            timeout_seconds: Some(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_current_user_without_token_skips_request() {
        let server = MockServer::start();
        let auth_mock = server.mock(|when, then| {
            when.method(GET).path("/auth/v1/user");
            then.status(200).json_body(serde_json::json!({"id": "x"}));
        });

        let user = backend(&server, None).current_user().await.unwrap();

        assert!(user.is_none());
        auth_mock.assert_hits(0);
    }

    #[tokio::test]
    async fn test_current_user_expired_token_is_signed_out() {
        let server = MockServer::start();
        let auth_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/auth/v1/user")
                .header("authorization", "Bearer stale");
            then.status(401);
        });

        let user = backend(&server, Some("stale")).current_user().await.unwrap();

        auth_mock.assert();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn test_list_vaccines_filters_active() {
        let server = MockServer::start();
        let vaccines_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/v1/vaccines")
                .query_param("active", "eq.true")
                .header("apikey", "anon-key");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!([
                    {"id": "flu", "name": "Influenza", "price": 89.9, "doses": 1, "active": true},
                    {"id": "hpv", "name": "HPV", "price": "450.50", "doses": 3, "active": true,
                     "insurance_price": 300.0, "insurance_available": true}
                ]));
        });

        let vaccines = backend(&server, Some("token")).list_vaccines(true).await.unwrap();

        vaccines_mock.assert();
        assert_eq!(vaccines.len(), 2);
        assert_eq!(vaccines[0].price, Money::from_cents(8990));
        assert_eq!(vaccines[1].insurance_price, Some(Money::from_cents(30000)));
    }

    #[tokio::test]
    async fn test_schedule_for_day_queries_weekday() {
        let server = MockServer::start();
        let schedule_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/v1/weekly_schedule")
                .query_param("unit_id", "eq.u1")
                .query_param("weekday", "eq.Monday");
            then.status(200).json_body(serde_json::json!([
                {"unit_id": "u1", "weekday": "Monday", "start_time": "09:00:00",
                 "end_time": "10:00:00", "capacity": 2}
            ]));
        });

        let rows = backend(&server, Some("token"))
            .weekly_schedule_for_day(&UnitId::from("u1"), Weekday::Monday)
            .await
            .unwrap();

        schedule_mock.assert();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].capacity, Some(2));
    }

    #[tokio::test]
    async fn test_check_capacity_accepts_camel_case() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/rest/v1/rpc/check_capacity")
                .json_body_partial(r#"{"unit_id": "u1", "new_vaccine_count": 1}"#);
            then.status(200).json_body(serde_json::json!({
                "allowed": false,
                "existingReservations": 2,
                "reservationCeiling": 2,
                "existingVaccines": 2,
                "vaccineCeiling": 10
            }));
        });

        let check = backend(&server, Some("token"))
            .check_capacity(
                &UnitId::from("u1"),
                NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                "09:00",
                1,
            )
            .await
            .unwrap();

        assert!(!check.allowed);
        assert_eq!(check.existing_reservations, 2);
        assert_eq!(check.vaccine_ceiling, 10);
    }

    #[tokio::test]
    async fn test_create_reservation_conflict_maps_to_slot_taken() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/rest/v1/reservations");
            then.status(409).body("duplicate key value violates unique constraint");
        });

        let reservation = Reservation {
            id: None,
            user_id: UserId::from("ana"),
            unit_id: UnitId::from("u1"),
            payment_method_id: "pix".into(),
            total: Money::from_cents(8990),
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            time: "09:00".to_string(),
            vaccine_ids: vec!["flu".into()],
            status: crate::domain::model::ReservationStatus::Pending,
        };

        let err = backend(&server, Some("token"))
            .create_reservation(&reservation)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BookingError::ConflictError {
                kind: ConflictKind::SlotTaken
            }
        ));
    }

    #[tokio::test]
    async fn test_create_reservation_returns_numeric_id() {
        let server = MockServer::start();
        let insert_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/rest/v1/reservations")
                .header("Prefer", "return=representation")
                .json_body_partial(r#"{"status": "pending", "time": "09:00"}"#);
            then.status(201).json_body(serde_json::json!([{"id": 42}]));
        });

        let reservation = Reservation {
            id: None,
            user_id: UserId::from("ana"),
            unit_id: UnitId::from("u1"),
            payment_method_id: "pix".into(),
            total: Money::from_cents(8990),
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            time: "09:00".to_string(),
            vaccine_ids: vec!["flu".into()],
            status: crate::domain::model::ReservationStatus::Pending,
        };

        let id = backend(&server, Some("token"))
            .create_reservation(&reservation)
            .await
            .unwrap();

        insert_mock.assert();
        assert_eq!(id, ReservationId::from("42"));
    }

    #[tokio::test]
    async fn test_server_error_is_remote_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/rest/v1/payment_methods");
            then.status(500).body("boom");
        });

        let err = backend(&server, Some("token"))
            .list_payment_methods()
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::RemoteFailure { .. }));
    }
}
