use crate::core::availability::AvailabilityResolver;
use crate::core::committer::ReservationCommitter;
use crate::core::wizard::{Action, Command, Response, UnitOption, WizardSession, WizardSettings, WizardView};
use crate::domain::ports::{BookingBackend, Clock};
use crate::utils::error::Result;
use std::collections::HashSet;
use std::sync::Arc;

/// Runs a [`WizardSession`] against a backend: every action is applied to
/// the session and any remote work it asks for is executed before the next
/// action is taken.
pub struct WizardController<B: BookingBackend + ?Sized> {
    session: WizardSession,
    backend: Arc<B>,
    resolver: AvailabilityResolver<B>,
    committer: ReservationCommitter<B>,
    clock: Arc<dyn Clock>,
}

impl<B: BookingBackend + ?Sized> WizardController<B> {
    pub fn new(backend: Arc<B>, clock: Arc<dyn Clock>, settings: WizardSettings) -> Self {
        let committer = ReservationCommitter::new(Arc::clone(&backend));
        Self::with_committer(backend, committer, clock, settings)
    }

    /// Shares `committer` (and its per-slot locks) with other sessions.
    pub fn with_committer(
        backend: Arc<B>,
        committer: ReservationCommitter<B>,
        clock: Arc<dyn Clock>,
        settings: WizardSettings,
    ) -> Self {
        Self {
            session: WizardSession::new(Arc::clone(&clock), settings),
            resolver: AvailabilityResolver::new(Arc::clone(&backend)),
            backend,
            committer,
            clock,
        }
    }

    pub fn session(&self) -> &WizardSession {
        &self.session
    }

    pub fn view(&self) -> WizardView {
        self.session.view()
    }

    pub async fn start(&mut self) -> Result<WizardView> {
        self.dispatch(Action::Start).await
    }

    /// Applies `action`. Errors are only returned for actions the current
    /// step does not accept; booking failures show up in the view's notice.
    pub async fn dispatch(&mut self, action: Action) -> Result<WizardView> {
        if let Some(effect) = self.session.handle(action)? {
            let response = self.execute(&effect.command).await;
            self.session.apply(&effect.ticket, response);
        }
        Ok(self.session.view())
    }

    async fn execute(&self, command: &Command) -> Result<Response> {
        match command {
            Command::LoadUser => Ok(Response::User(self.backend.current_user().await?)),
            Command::LoadQuotes { user } => {
                let quotes = self.backend.quotes_for(user).await?;
                let vaccines = self.backend.list_vaccines(false).await?;
                Ok(Response::Quotes { quotes, vaccines })
            }
            Command::LoadVaccines => Ok(Response::Vaccines(self.backend.list_vaccines(true).await?)),
            Command::LoadUnits { user } => {
                let units = self.backend.list_units(true).await?;
                let reachable: HashSet<_> = self
                    .backend
                    .units_reachable_by_user(user)
                    .await?
                    .into_iter()
                    .collect();
                Ok(Response::Units(
                    units
                        .into_iter()
                        .map(|unit| UnitOption {
                            reachable: reachable.contains(&unit.id),
                            app_booking: unit.app_booking,
                            unit,
                        })
                        .collect(),
                ))
            }
            Command::LoadServedWeekdays { unit } => {
                Ok(Response::ServedWeekdays(self.resolver.served_weekdays(unit).await?))
            }
            Command::LoadSlots { unit, date } => Ok(Response::Slots(
                self.resolver.slots_for(unit, *date, self.clock.today()).await?,
            )),
            Command::LoadPaymentMethods => Ok(Response::PaymentMethods(
                self.backend.list_payment_methods().await?,
            )),
            Command::Commit(request) => Ok(Response::Committed(self.committer.commit(request).await?)),
            Command::SubmitFollowUp(request) => {
                self.backend.create_follow_up_request(request).await?;
                tracing::info!("📨 Follow-up request recorded for {}", request.user_id);
                Ok(Response::FollowUpRecorded)
            }
        }
    }
}
