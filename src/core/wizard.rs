//! Booking wizard state machine.
//!
//! [`WizardSession`] is synchronous: user [`Action`]s go in, and whenever a
//! step needs remote data it hands back an [`Effect`] stamped with a
//! [`Ticket`]. Whoever runs the effect feeds the answer to
//! [`WizardSession::apply`]; answers whose ticket no longer matches the
//! session (closed, restarted, superseded) are dropped.

use crate::core::availability::{describe_weekdays, format_time, Slot};
use crate::core::committer::{CommitOutcome, CommitRequest};
use crate::core::selection::{BookingMode, ChosenSlot, SelectionState};
use crate::domain::model::{
    FollowUpRequest, Money, PaymentMethod, PaymentMethodId, Quote, QuoteId, Unit, UnitId, UserId,
    Vaccine, VaccineId, Weekday,
};
use crate::domain::ports::Clock;
use crate::utils::error::{BookingError, ErrorKind, Result};
use crate::utils::validation::{parse_date, validate_not_past};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Start,
    Unauthenticated,
    ModeChoice,
    QuoteListing,
    QuoteRedirect,
    VaccineListing,
    RequestOnly,
    RequestSubmitted,
    UnitChoice,
    ContactUnit,
    DateChoice,
    TimeChoice,
    PaymentChoice,
    Confirmation,
    Committed,
    Cancelled,
    Closed,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Start => "start",
            Step::Unauthenticated => "unauthenticated",
            Step::ModeChoice => "mode_choice",
            Step::QuoteListing => "quote_listing",
            Step::QuoteRedirect => "quote_redirect",
            Step::VaccineListing => "vaccine_listing",
            Step::RequestOnly => "request_only",
            Step::RequestSubmitted => "request_submitted",
            Step::UnitChoice => "unit_choice",
            Step::ContactUnit => "contact_unit",
            Step::DateChoice => "date_choice",
            Step::TimeChoice => "time_choice",
            Step::PaymentChoice => "payment_choice",
            Step::Confirmation => "confirmation",
            Step::Committed => "committed",
            Step::Cancelled => "cancelled",
            Step::Closed => "closed",
        }
    }

    /// Steps that end the booking flow; only restarting or closing remains.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Step::Unauthenticated
                | Step::QuoteRedirect
                | Step::RequestSubmitted
                | Step::ContactUnit
                | Step::Committed
                | Step::Cancelled
                | Step::Closed
        )
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start,
    UseQuote,
    GoDirect,
    CreateQuote,
    SelectQuote(QuoteId),
    ToggleVaccine(VaccineId),
    ContinueToUnits,
    SubmitFollowUp,
    SelectUnit(UnitId),
    EnterDate(String),
    SelectTime(String),
    SelectPaymentMethod(PaymentMethodId),
    Confirm,
    ChangeDate,
    ChangeTime,
    Back,
    Retry,
    Cancel,
    Close,
    ConfirmAbandon,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Start,
    UseQuote,
    GoDirect,
    CreateQuote,
    SelectQuote,
    ToggleVaccine,
    ContinueToUnits,
    SubmitFollowUp,
    SelectUnit,
    EnterDate,
    SelectTime,
    SelectPaymentMethod,
    Confirm,
    ChangeDate,
    ChangeTime,
    Back,
    Retry,
    Cancel,
    Close,
    ConfirmAbandon,
    Resume,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Start => ActionKind::Start,
            Action::UseQuote => ActionKind::UseQuote,
            Action::GoDirect => ActionKind::GoDirect,
            Action::CreateQuote => ActionKind::CreateQuote,
            Action::SelectQuote(_) => ActionKind::SelectQuote,
            Action::ToggleVaccine(_) => ActionKind::ToggleVaccine,
            Action::ContinueToUnits => ActionKind::ContinueToUnits,
            Action::SubmitFollowUp => ActionKind::SubmitFollowUp,
            Action::SelectUnit(_) => ActionKind::SelectUnit,
            Action::EnterDate(_) => ActionKind::EnterDate,
            Action::SelectTime(_) => ActionKind::SelectTime,
            Action::SelectPaymentMethod(_) => ActionKind::SelectPaymentMethod,
            Action::Confirm => ActionKind::Confirm,
            Action::ChangeDate => ActionKind::ChangeDate,
            Action::ChangeTime => ActionKind::ChangeTime,
            Action::Back => ActionKind::Back,
            Action::Retry => ActionKind::Retry,
            Action::Cancel => ActionKind::Cancel,
            Action::Close => ActionKind::Close,
            Action::ConfirmAbandon => ActionKind::ConfirmAbandon,
            Action::Resume => ActionKind::Resume,
        }
    }
}

/// A unit as offered at `unit_choice`, annotated for the signed-in user.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOption {
    pub unit: Unit,
    pub reachable: bool,
    pub app_booking: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LoadUser,
    LoadQuotes { user: UserId },
    LoadVaccines,
    LoadUnits { user: UserId },
    LoadServedWeekdays { unit: UnitId },
    LoadSlots { unit: Unit, date: NaiveDate },
    LoadPaymentMethods,
    Commit(CommitRequest),
    SubmitFollowUp(FollowUpRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    User(Option<UserId>),
    Quotes {
        quotes: Vec<Quote>,
        vaccines: Vec<Vaccine>,
    },
    Vaccines(Vec<Vaccine>),
    Units(Vec<UnitOption>),
    ServedWeekdays(BTreeSet<Weekday>),
    Slots(Vec<Slot>),
    PaymentMethods(Vec<PaymentMethod>),
    Committed(CommitOutcome),
    FollowUpRecorded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
    seq: u64,
    step: Step,
}

impl Ticket {
    pub fn step(&self) -> Step {
        self.step
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub ticket: Ticket,
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Accepted,
    /// The session moved on; the response was ignored.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub kind: Option<ErrorKind>,
    pub message: String,
}

impl Notice {
    fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            kind: None,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            kind: None,
            message: message.into(),
        }
    }

    fn from_error(error: &BookingError) -> Self {
        let level = match error.kind() {
            ErrorKind::UnsupportedChannel => NoticeLevel::Info,
            _ => NoticeLevel::Error,
        };
        Self {
            level,
            kind: Some(error.kind()),
            message: error.user_friendly_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOption {
    pub label: String,
    pub action: Action,
    pub enabled: bool,
}

impl ChoiceOption {
    fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
            enabled: true,
        }
    }

    fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// What the presentation layer draws for the current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Text {
        message: String,
    },
    Choice {
        message: String,
        options: Vec<ChoiceOption>,
    },
    Input {
        message: String,
        placeholder: String,
        submit: ActionKind,
    },
}

impl Prompt {
    fn text(message: impl Into<String>) -> Self {
        Prompt::Text {
            message: message.into(),
        }
    }

    fn choice(message: impl Into<String>, options: Vec<ChoiceOption>) -> Self {
        Prompt::Choice {
            message: message.into(),
            options,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardView {
    pub step: Step,
    pub prompts: Vec<Prompt>,
    pub actions: Vec<ActionKind>,
    pub pending: bool,
    pub notice: Option<Notice>,
    pub total: Money,
    pub auto_close_after: Option<Duration>,
}

impl WizardView {
    pub fn allows(&self, kind: ActionKind) -> bool {
        self.actions.contains(&kind)
    }
}

#[derive(Debug, Clone)]
pub struct WizardSettings {
    pub auto_close_after: Duration,
}

impl Default for WizardSettings {
    fn default() -> Self {
        Self {
            auto_close_after: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelIntent {
    /// Discard the selection and go back to the mode choice.
    Restart,
    /// Discard the selection and leave the wizard.
    Close,
}

#[derive(Debug, Clone, Default)]
struct Loaded {
    quotes: Vec<Quote>,
    quote_catalog: Vec<Vaccine>,
    vaccines: Vec<Vaccine>,
    units: Vec<UnitOption>,
    served: BTreeSet<Weekday>,
    slots: Vec<Slot>,
    payment_methods: Vec<PaymentMethod>,
}

pub struct WizardSession {
    step: Step,
    user: Option<UserId>,
    selection: SelectionState,
    loaded: Loaded,
    request_only: Option<Vaccine>,
    contact_unit: Option<Unit>,
    outcome: Option<CommitOutcome>,
    notice: Option<Notice>,
    pending: Option<Effect>,
    failed: Option<Command>,
    cancel_prompt: Option<CancelIntent>,
    epoch: u64,
    seq: u64,
    clock: Arc<dyn Clock>,
    settings: WizardSettings,
}

impl WizardSession {
    pub fn new(clock: Arc<dyn Clock>, settings: WizardSettings) -> Self {
        Self {
            step: Step::Start,
            user: None,
            selection: SelectionState::new(),
            loaded: Loaded::default(),
            request_only: None,
            contact_unit: None,
            outcome: None,
            notice: None,
            pending: None,
            failed: None,
            cancel_prompt: None,
            epoch: 0,
            seq: 0,
            clock,
            settings,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn served_weekdays(&self) -> &BTreeSet<Weekday> {
        &self.loaded.served
    }

    pub fn slots(&self) -> &[Slot] {
        &self.loaded.slots
    }

    pub fn outcome(&self) -> Option<&CommitOutcome> {
        self.outcome.as_ref()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_confirming_cancel(&self) -> bool {
        self.cancel_prompt.is_some()
    }

    pub fn legal_actions(&self) -> Vec<ActionKind> {
        use ActionKind::*;

        if self.cancel_prompt.is_some() {
            return vec![ConfirmAbandon, Resume];
        }
        if self.pending.is_some() {
            return vec![Cancel, Close];
        }

        let mut actions = match self.step {
            Step::Start | Step::Unauthenticated | Step::Cancelled | Step::Closed => vec![Start],
            Step::ModeChoice => vec![UseQuote, GoDirect, Close],
            Step::QuoteListing if self.loaded.quotes.is_empty() => {
                vec![CreateQuote, GoDirect, Back, Cancel, Close]
            }
            Step::QuoteListing => vec![SelectQuote, Back, Cancel, Close],
            Step::VaccineListing => {
                let mut actions = vec![ToggleVaccine];
                if self.selection.has_vaccines() {
                    actions.push(ContinueToUnits);
                }
                actions.extend([Back, Cancel, Close]);
                actions
            }
            Step::RequestOnly => vec![SubmitFollowUp, Back, Cancel, Close],
            Step::UnitChoice => vec![SelectUnit, Back, Cancel, Close],
            Step::DateChoice => vec![EnterDate, Back, Cancel, Close],
            Step::TimeChoice => vec![SelectTime, ChangeDate, Back, Cancel, Close],
            Step::PaymentChoice => vec![SelectPaymentMethod, Back, Cancel, Close],
            Step::Confirmation => vec![Confirm, ChangeDate, ChangeTime, Back, Cancel, Close],
            Step::QuoteRedirect | Step::RequestSubmitted | Step::ContactUnit | Step::Committed => {
                vec![Start, Close]
            }
        };

        if self.step == Step::Unauthenticated {
            actions.push(Close);
        }
        if self.failed.is_some() {
            actions.insert(0, Retry);
        }
        actions
    }

    /// Applies a user action. Returns the remote work the step now needs,
    /// if any. Refused actions leave the session untouched.
    pub fn handle(&mut self, action: Action) -> Result<Option<Effect>> {
        if self.pending.is_some()
            && self.cancel_prompt.is_none()
            && !matches!(action, Action::Cancel | Action::Close)
        {
            return Err(BookingError::StepBusy {
                step: self.step.name().to_string(),
            });
        }
        if !self.legal_actions().contains(&action.kind()) {
            return Err(BookingError::IllegalAction {
                step: self.step.name().to_string(),
                action: format!("{:?}", action.kind()),
            });
        }

        tracing::debug!("🧭 {} <- {:?}", self.step, action);
        self.notice = None;
        if action != Action::Retry {
            self.failed = None;
        }

        match action {
            Action::Start => {
                self.reset_session();
                self.step = Step::Start;
                Ok(Some(self.issue(Command::LoadUser)))
            }
            Action::UseQuote => {
                let user = self.require_user()?;
                self.selection.choose_mode(BookingMode::Quote);
                Ok(Some(self.issue(Command::LoadQuotes { user })))
            }
            Action::GoDirect => {
                self.selection.choose_mode(BookingMode::Direct);
                Ok(Some(self.issue(Command::LoadVaccines)))
            }
            Action::CreateQuote => {
                self.selection.reset();
                self.step = Step::QuoteRedirect;
                Ok(None)
            }
            Action::SelectQuote(id) => self.select_quote(&id),
            Action::ToggleVaccine(id) => self.toggle_vaccine(&id),
            Action::ContinueToUnits => {
                if !self.selection.has_vaccines() {
                    return self.reject(BookingError::validation(
                        "vaccines",
                        "select at least one vaccine",
                    ));
                }
                let user = self.require_user()?;
                Ok(Some(self.issue(Command::LoadUnits { user })))
            }
            Action::SubmitFollowUp => self.submit_follow_up(),
            Action::SelectUnit(id) => self.select_unit(&id),
            Action::EnterDate(input) => self.enter_date(&input),
            Action::SelectTime(start) => self.select_time(&start),
            Action::SelectPaymentMethod(id) => self.select_payment_method(&id),
            Action::Confirm => {
                let user = self.require_user()?;
                match CommitRequest::from_selection(&user, &self.selection) {
                    Ok(request) => Ok(Some(self.issue(Command::Commit(request)))),
                    Err(e) => self.reject(e),
                }
            }
            Action::ChangeDate => {
                self.selection.clear_date();
                self.step = Step::DateChoice;
                Ok(None)
            }
            Action::ChangeTime => {
                self.selection.clear_slot();
                self.step = Step::TimeChoice;
                Ok(None)
            }
            Action::Back => {
                self.back();
                Ok(None)
            }
            Action::Retry => match self.failed.take() {
                Some(command) => Ok(Some(self.issue(command))),
                None => Ok(None),
            },
            Action::Cancel => {
                self.request_cancel(CancelIntent::Restart);
                Ok(None)
            }
            Action::Close => {
                self.request_cancel(CancelIntent::Close);
                Ok(None)
            }
            Action::ConfirmAbandon => {
                if let Some(intent) = self.cancel_prompt.take() {
                    self.abandon(intent);
                }
                Ok(None)
            }
            Action::Resume => {
                self.cancel_prompt = None;
                Ok(None)
            }
        }
    }

    /// Feeds back the result of an effect. Results for a ticket that is no
    /// longer outstanding are ignored.
    pub fn apply(&mut self, ticket: &Ticket, result: Result<Response>) -> Applied {
        let expected = match &self.pending {
            Some(effect) => effect.ticket,
            None => {
                tracing::debug!("🗑️ Dropping response for {} (nothing pending)", ticket.step);
                return Applied::Stale;
            }
        };
        if *ticket != expected || ticket.epoch != self.epoch || ticket.step != self.step {
            tracing::debug!("🗑️ Dropping stale response for {}", ticket.step);
            return Applied::Stale;
        }
        let Some(effect) = self.pending.take() else {
            return Applied::Stale;
        };

        match result {
            Ok(response) => self.on_response(response),
            Err(e) => self.on_failure(effect.command, e),
        }
        Applied::Accepted
    }

    pub fn view(&self) -> WizardView {
        let mut prompts = self.render();
        if let Some(intent) = self.cancel_prompt {
            let question = match intent {
                CancelIntent::Restart => "Discard this booking and start over?",
                CancelIntent::Close => "Discard this booking and close?",
            };
            prompts.push(Prompt::choice(
                question,
                vec![
                    ChoiceOption::new("Yes, discard it", Action::ConfirmAbandon),
                    ChoiceOption::new("No, keep going", Action::Resume),
                ],
            ));
        }

        WizardView {
            step: self.step,
            prompts,
            actions: self.legal_actions(),
            pending: self.pending.is_some(),
            notice: self.notice.clone(),
            total: self.selection.total(),
            auto_close_after: (self.step == Step::Committed).then_some(self.settings.auto_close_after),
        }
    }

    fn issue(&mut self, command: Command) -> Effect {
        self.seq += 1;
        let effect = Effect {
            ticket: Ticket {
                epoch: self.epoch,
                seq: self.seq,
                step: self.step,
            },
            command,
        };
        tracing::debug!("📡 {} issues {:?}", self.step, effect.command);
        self.pending = Some(effect.clone());
        effect
    }

    fn reject(&mut self, error: BookingError) -> Result<Option<Effect>> {
        tracing::info!("⚠️ {} rejected: {}", self.step, error);
        self.notice = Some(Notice::from_error(&error));
        Ok(None)
    }

    fn require_user(&self) -> Result<UserId> {
        self.user.clone().ok_or(BookingError::Unauthenticated)
    }

    fn reset_session(&mut self) {
        self.epoch += 1;
        self.pending = None;
        self.failed = None;
        self.cancel_prompt = None;
        self.selection.reset();
        self.loaded = Loaded::default();
        self.request_only = None;
        self.contact_unit = None;
        self.outcome = None;
    }

    fn select_quote(&mut self, id: &QuoteId) -> Result<Option<Effect>> {
        let Some(quote) = self.loaded.quotes.iter().find(|q| &q.id == id).cloned() else {
            return self.reject(BookingError::validation("quote", format!("{} is not one of your quotes", id)));
        };
        if quote.vaccine_ids.is_empty() {
            return self.reject(BookingError::validation("quote", "this quote has no vaccines"));
        }
        let request_only = quote
            .vaccine_ids
            .iter()
            .filter_map(|id| self.loaded.quote_catalog.iter().find(|v| &v.id == id))
            .find(|v| v.is_request_only())
            .cloned();
        if let Some(vaccine) = request_only {
            tracing::info!("📨 Quote {} includes request-only {}", quote.id, vaccine.name);
            self.request_only = Some(vaccine);
            self.step = Step::RequestOnly;
            return Ok(None);
        }
        self.selection.set_quote(quote, &self.loaded.quote_catalog);
        let user = self.require_user()?;
        Ok(Some(self.issue(Command::LoadUnits { user })))
    }

    fn toggle_vaccine(&mut self, id: &VaccineId) -> Result<Option<Effect>> {
        let Some(vaccine) = self.loaded.vaccines.iter().find(|v| &v.id == id).cloned() else {
            return self.reject(BookingError::validation("vaccine", format!("{} is not available", id)));
        };
        if vaccine.is_request_only() {
            self.request_only = Some(vaccine);
            self.step = Step::RequestOnly;
            return Ok(None);
        }
        let selected = self.selection.toggle_vaccine(&vaccine);
        tracing::debug!(
            "💉 {} {} (total {})",
            if selected { "Added" } else { "Removed" },
            vaccine.name,
            self.selection.total()
        );
        Ok(None)
    }

    fn submit_follow_up(&mut self) -> Result<Option<Effect>> {
        let user = self.require_user()?;
        let Some(vaccine) = self.request_only.clone() else {
            return self.reject(BookingError::validation("vaccine", "nothing to request"));
        };
        let request = FollowUpRequest {
            user_id: user,
            vaccine_ids: vec![vaccine.id.clone()],
            note: format!("Manual scheduling requested for {}", vaccine.name),
        };
        Ok(Some(self.issue(Command::SubmitFollowUp(request))))
    }

    fn select_unit(&mut self, id: &UnitId) -> Result<Option<Effect>> {
        let Some(option) = self.loaded.units.iter().find(|o| &o.unit.id == id).cloned() else {
            return self.reject(BookingError::validation("unit", format!("{} is not offered", id)));
        };
        if !option.reachable {
            return self.reject(BookingError::ReachabilityRejected {
                unit: option.unit.name.clone(),
            });
        }
        if !option.app_booking {
            self.notice = Some(Notice::from_error(&BookingError::UnsupportedChannel {
                unit: option.unit.name.clone(),
            }));
            self.contact_unit = Some(option.unit);
            self.selection.reset();
            self.step = Step::ContactUnit;
            return Ok(None);
        }

        let unit = option.unit.id.clone();
        self.selection.set_unit(option.unit);
        Ok(Some(self.issue(Command::LoadServedWeekdays { unit })))
    }

    fn enter_date(&mut self, input: &str) -> Result<Option<Effect>> {
        let date = match parse_date("date", input) {
            Ok(date) => date,
            Err(e) => {
                self.selection.clear_date();
                return self.reject(e);
            }
        };
        if let Err(e) = validate_not_past("date", date, self.clock.today()) {
            self.selection.clear_date();
            return self.reject(e);
        }
        let weekday = Weekday::of(date);
        if !self.loaded.served.contains(&weekday) {
            self.selection.clear_date();
            return self.reject(BookingError::validation(
                "date",
                format!(
                    "{} is a {}; this unit only serves {}",
                    date.format("%Y-%m-%d"),
                    weekday,
                    describe_weekdays(&self.loaded.served)
                ),
            ));
        }

        let Some(unit) = self.selection.unit().cloned() else {
            return self.reject(BookingError::validation("unit", "is required"));
        };
        self.selection.set_date(date);
        Ok(Some(self.issue(Command::LoadSlots { unit, date })))
    }

    fn select_time(&mut self, start: &str) -> Result<Option<Effect>> {
        let wanted = format_time(start);
        let Some(slot) = self
            .loaded
            .slots
            .iter()
            .find(|s| s.start_time == start || format_time(&s.start_time) == wanted)
            .cloned()
        else {
            return self.reject(BookingError::validation("time", format!("{} is not an available slot", start)));
        };
        self.selection.set_slot(ChosenSlot {
            start_time: slot.start_time,
            label: slot.label,
        });
        Ok(Some(self.issue(Command::LoadPaymentMethods)))
    }

    fn select_payment_method(&mut self, id: &PaymentMethodId) -> Result<Option<Effect>> {
        let Some(method) = self.loaded.payment_methods.iter().find(|m| &m.id == id).cloned() else {
            return self.reject(BookingError::validation(
                "payment_method",
                format!("{} is not accepted", id),
            ));
        };
        self.selection.set_payment_method(method);
        self.step = Step::Confirmation;
        Ok(None)
    }

    fn back(&mut self) {
        self.step = match self.step {
            Step::QuoteListing | Step::VaccineListing => {
                self.selection.clear_mode();
                Step::ModeChoice
            }
            Step::RequestOnly => {
                self.request_only = None;
                match self.selection.mode() {
                    Some(BookingMode::Quote) => Step::QuoteListing,
                    _ => Step::VaccineListing,
                }
            }
            Step::UnitChoice => match self.selection.mode() {
                Some(BookingMode::Quote) => {
                    self.selection.clear_quote();
                    Step::QuoteListing
                }
                _ => {
                    self.selection.clear_unit();
                    Step::VaccineListing
                }
            },
            Step::DateChoice => {
                self.selection.clear_unit();
                Step::UnitChoice
            }
            Step::TimeChoice => {
                self.selection.clear_date();
                Step::DateChoice
            }
            Step::PaymentChoice => {
                self.selection.clear_slot();
                Step::TimeChoice
            }
            Step::Confirmation => {
                self.selection.clear_payment_method();
                Step::PaymentChoice
            }
            other => other,
        };
    }

    fn request_cancel(&mut self, intent: CancelIntent) {
        let in_flow = !self.step.is_terminal() && self.step != Step::Start;
        if in_flow && self.selection.has_progress() {
            self.cancel_prompt = Some(intent);
        } else {
            self.abandon(intent);
        }
    }

    fn abandon(&mut self, intent: CancelIntent) {
        let finished = self.step.is_terminal();
        let user = self.user.clone();
        self.reset_session();
        self.user = user;
        self.step = match intent {
            CancelIntent::Restart => Step::ModeChoice,
            CancelIntent::Close if finished => Step::Closed,
            CancelIntent::Close => Step::Cancelled,
        };
        tracing::info!("🚪 Booking abandoned, now at {}", self.step);
    }

    fn on_response(&mut self, response: Response) {
        match response {
            Response::User(Some(user)) => {
                tracing::info!("👤 Booking session for {}", user);
                self.user = Some(user);
                self.step = Step::ModeChoice;
            }
            Response::User(None) => {
                self.user = None;
                self.notice = Some(Notice::from_error(&BookingError::Unauthenticated));
                self.step = Step::Unauthenticated;
            }
            Response::Quotes { quotes, vaccines } => {
                self.loaded.quotes = quotes;
                self.loaded.quote_catalog = vaccines;
                self.step = Step::QuoteListing;
            }
            Response::Vaccines(vaccines) => {
                self.loaded.vaccines = vaccines.into_iter().filter(|v| v.is_listable()).collect();
                self.step = Step::VaccineListing;
            }
            Response::Units(units) => {
                self.loaded.units = units.into_iter().filter(|o| o.unit.is_active()).collect();
                self.step = Step::UnitChoice;
            }
            Response::ServedWeekdays(days) => {
                if days.is_empty() {
                    let name = self
                        .selection
                        .unit()
                        .map(|u| u.name.clone())
                        .unwrap_or_default();
                    self.selection.clear_unit();
                    self.notice = Some(Notice {
                        level: NoticeLevel::Error,
                        kind: Some(ErrorKind::AvailabilityEmpty),
                        message: format!("{} has no open days right now. Please choose another unit.", name),
                    });
                } else {
                    self.loaded.served = days;
                    self.step = Step::DateChoice;
                }
            }
            Response::Slots(slots) => {
                if slots.is_empty() {
                    let error = match self.selection.date() {
                        Some(date) => BookingError::AvailabilityEmpty { date },
                        None => BookingError::validation("date", "is required"),
                    };
                    self.selection.clear_date();
                    self.notice = Some(Notice::from_error(&error));
                } else {
                    self.loaded.slots = slots;
                    self.step = Step::TimeChoice;
                }
            }
            Response::PaymentMethods(methods) => {
                if methods.is_empty() {
                    self.selection.clear_slot();
                    self.notice = Some(Notice::warning("No payment methods are available right now."));
                    self.failed = Some(Command::LoadPaymentMethods);
                } else {
                    self.loaded.payment_methods = methods;
                    self.step = Step::PaymentChoice;
                }
            }
            Response::Committed(outcome) => {
                self.notice = Some(if outcome.is_partial() {
                    Notice::warning(outcome.message())
                } else {
                    Notice::info(outcome.message())
                });
                self.selection.reset();
                self.outcome = Some(outcome);
                self.step = Step::Committed;
            }
            Response::FollowUpRecorded => {
                self.notice = Some(Notice::info(
                    "Your request was sent. The unit will contact you to schedule.",
                ));
                self.selection.reset();
                self.step = Step::RequestSubmitted;
            }
        }
        tracing::debug!("🧭 now at {}", self.step);
    }

    fn on_failure(&mut self, command: Command, error: BookingError) {
        tracing::warn!("❌ {} failed: {}", self.step, error);
        self.notice = Some(Notice::from_error(&error));
        match error.kind() {
            ErrorKind::CapacityExceeded => {
                self.selection.clear_date();
                self.step = Step::DateChoice;
            }
            ErrorKind::Unauthenticated => {
                self.user = None;
                self.step = Step::Unauthenticated;
            }
            ErrorKind::Conflict | ErrorKind::Validation | ErrorKind::AvailabilityEmpty => {}
            _ => {
                self.failed = Some(command);
            }
        }
    }

    fn render(&self) -> Vec<Prompt> {
        match self.step {
            Step::Start => vec![Prompt::text("Welcome! Let's book your vaccination.")],
            Step::Unauthenticated => vec![Prompt::text(
                "You need to sign in before booking. Please sign in and start again.",
            )],
            Step::ModeChoice => vec![Prompt::choice(
                "How would you like to book?",
                vec![
                    ChoiceOption::new("Use one of my quotes", Action::UseQuote),
                    ChoiceOption::new("Choose vaccines now", Action::GoDirect),
                ],
            )],
            Step::QuoteListing => self.render_quotes(),
            Step::QuoteRedirect => vec![Prompt::text(
                "Create a quote on the quotes page, then come back to book it.",
            )],
            Step::VaccineListing => self.render_vaccines(),
            Step::RequestOnly => {
                let name = self
                    .request_only
                    .as_ref()
                    .map(|v| v.name.as_str())
                    .unwrap_or("This vaccine");
                vec![Prompt::choice(
                    format!(
                        "{} has no insurance pricing and cannot be booked online. \
                         We can ask the unit to contact you.",
                        name
                    ),
                    vec![
                        ChoiceOption::new("Send request", Action::SubmitFollowUp),
                        ChoiceOption::new("Back to vaccines", Action::Back),
                    ],
                )]
            }
            Step::RequestSubmitted => vec![Prompt::text("Request sent. You will be contacted soon.")],
            Step::UnitChoice => self.render_units(),
            Step::ContactUnit => {
                let name = self
                    .contact_unit
                    .as_ref()
                    .map(|u| u.name.as_str())
                    .unwrap_or("This unit");
                vec![Prompt::text(format!(
                    "{} does not take online bookings. Please contact the unit directly.",
                    name
                ))]
            }
            Step::DateChoice => vec![
                Prompt::text(format!(
                    "This unit serves: {}.",
                    describe_weekdays(&self.loaded.served)
                )),
                Prompt::Input {
                    message: "Which date would you like?".to_string(),
                    placeholder: "YYYY-MM-DD".to_string(),
                    submit: ActionKind::EnterDate,
                },
            ],
            Step::TimeChoice => vec![Prompt::choice(
                "Pick a time:",
                self.loaded
                    .slots
                    .iter()
                    .map(|s| ChoiceOption::new(s.display(), Action::SelectTime(s.start_time.clone())))
                    .collect(),
            )],
            Step::PaymentChoice => vec![Prompt::choice(
                "How will you pay?",
                self.loaded
                    .payment_methods
                    .iter()
                    .map(|m| ChoiceOption::new(m.name.clone(), Action::SelectPaymentMethod(m.id.clone())))
                    .collect(),
            )],
            Step::Confirmation => vec![
                Prompt::text(self.selection.summary().render()),
                Prompt::choice(
                    "Confirm this appointment?",
                    vec![
                        ChoiceOption::new("Confirm", Action::Confirm),
                        ChoiceOption::new("Change date", Action::ChangeDate),
                        ChoiceOption::new("Change time", Action::ChangeTime),
                    ],
                ),
            ],
            Step::Committed => vec![Prompt::text(
                self.outcome
                    .as_ref()
                    .map(|o| o.message())
                    .unwrap_or_else(|| "Appointment booked.".to_string()),
            )],
            Step::Cancelled => vec![Prompt::text("Booking cancelled.")],
            Step::Closed => vec![Prompt::text("See you soon!")],
        }
    }

    fn render_quotes(&self) -> Vec<Prompt> {
        if self.loaded.quotes.is_empty() {
            return vec![Prompt::choice(
                "You have no saved quotes.",
                vec![
                    ChoiceOption::new("Create a quote", Action::CreateQuote),
                    ChoiceOption::new("Choose vaccines now", Action::GoDirect),
                ],
            )];
        }
        vec![Prompt::choice(
            "Which quote would you like to book?",
            self.loaded
                .quotes
                .iter()
                .map(|q| {
                    ChoiceOption::new(
                        format!("Quote {} - {} vaccine(s) - {}", q.id, q.vaccine_ids.len(), q.total),
                        Action::SelectQuote(q.id.clone()),
                    )
                })
                .collect(),
        )]
    }

    fn render_vaccines(&self) -> Vec<Prompt> {
        let options = self
            .loaded
            .vaccines
            .iter()
            .map(|v| {
                let mark = if self.selection.is_vaccine_selected(&v.id) { "[x]" } else { "[ ]" };
                let mut label = format!("{} {} - {}", mark, v.name, v.price);
                if let Some(insured) = v.insurance_price {
                    label.push_str(&format!(" (insurance {})", insured));
                }
                if v.is_request_only() {
                    label.push_str(" (by request)");
                }
                ChoiceOption::new(label, Action::ToggleVaccine(v.id.clone()))
            })
            .collect();

        let summary = self.selection.summary();
        vec![
            Prompt::choice("Select the vaccines you want:", options),
            Prompt::text(format!(
                "{} selected - total {}",
                summary.vaccines.len(),
                summary.total
            )),
            Prompt::choice(
                "",
                vec![ChoiceOption::new("Continue", Action::ContinueToUnits)
                    .enabled(self.selection.has_vaccines())],
            ),
        ]
    }

    fn render_units(&self) -> Vec<Prompt> {
        let options = self
            .loaded
            .units
            .iter()
            .map(|o| {
                let mut label = o.unit.name.clone();
                if !o.reachable {
                    label.push_str(" (does not serve your address)");
                } else if !o.app_booking {
                    label.push_str(" (contact the unit to book)");
                }
                ChoiceOption::new(label, Action::SelectUnit(o.unit.id.clone())).enabled(o.reachable)
            })
            .collect();
        vec![Prompt::choice("Where would you like to be vaccinated?", options)]
    }
}
