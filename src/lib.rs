pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliCommand, CliConfig};

pub use adapters::{Fixture, InMemoryBackend, RestBackend};
pub use config::BookingConfig;
pub use core::{
    availability::AvailabilityResolver,
    committer::{CommitOutcome, CommitRequest, ReservationCommitter},
    controller::WizardController,
    form::{DirectScheduler, ScheduleForm},
    wizard::{Action, ActionKind, Prompt, Step, WizardSession, WizardSettings, WizardView},
};
pub use utils::error::{BookingError, Result};
