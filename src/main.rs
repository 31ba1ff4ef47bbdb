use clap::Parser;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use vaccine_booking::adapters::{Fixture, InMemoryBackend, RestBackend};
use vaccine_booking::config::{BookingConfig, CliCommand, CliConfig};
use vaccine_booking::core::availability::{describe_weekdays, AvailabilityResolver};
use vaccine_booking::core::committer::ReservationCommitter;
use vaccine_booking::core::controller::WizardController;
use vaccine_booking::core::form::{DirectScheduler, ScheduleForm};
use vaccine_booking::core::wizard::{
    Action, ActionKind, ChoiceOption, NoticeLevel, Prompt, Step, WizardView,
};
use vaccine_booking::domain::model::ReservationId;
use vaccine_booking::domain::ports::{BookingBackend, Clock, SystemClock};
use vaccine_booking::utils::error::{BookingError, ErrorSeverity, Result};
use vaccine_booking::utils::logger;
use vaccine_booking::utils::validation::{parse_date, Validate};

/// Single-key commands available next to the numbered options.
const SHORTCUTS: [(&str, ActionKind, &str); 7] = [
    ("r", ActionKind::Retry, "r = retry"),
    ("d", ActionKind::ChangeDate, "d = change date"),
    ("t", ActionKind::ChangeTime, "t = change time"),
    ("b", ActionKind::Back, "b = back"),
    ("s", ActionKind::Start, "s = start over"),
    ("c", ActionKind::Cancel, "c = cancel"),
    ("q", ActionKind::Close, "q = close"),
];

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(
            "❌ Booking failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        std::process::exit(exit_code(&e));
    }
}

/// Any failure exits non-zero; severity only picks which code.
fn exit_code(error: &BookingError) -> i32 {
    match error.severity() {
        ErrorSeverity::Low | ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::Critical => 3,
    }
}

async fn run(cli: CliConfig) -> Result<()> {
    let config = load_config(&cli)?;
    if cli.json_logs || config.json_logs() {
        logger::init_json_logger(if cli.verbose { "debug" } else { config.log_level() });
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }
    config.validate()?;

    let backend: Arc<dyn BookingBackend> = match &cli.fixture {
        Some(path) => {
            tracing::info!("🧪 Using fixture {}", path.display());
            Arc::new(InMemoryBackend::from_fixture(Fixture::from_file(path)?))
        }
        None => Arc::new(RestBackend::new(config.service()?)?),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command() {
        CliCommand::Book => book(backend, clock, &config).await,
        CliCommand::Slots { unit, date } => show_slots(backend, clock, &unit, &date).await,
        CliCommand::Schedule { form } => schedule(backend, clock, &form).await,
        CliCommand::Cancel { reservation } => cancel(backend, &reservation).await,
    }
}

fn load_config(cli: &CliConfig) -> Result<BookingConfig> {
    if cli.config.exists() {
        BookingConfig::from_file(&cli.config)
    } else if cli.fixture.is_some() {
        Ok(BookingConfig::default())
    } else {
        Err(BookingError::ConfigError {
            message: format!("{} not found", cli.config.display()),
        })
    }
}

async fn book(
    backend: Arc<dyn BookingBackend>,
    clock: Arc<dyn Clock>,
    config: &BookingConfig,
) -> Result<()> {
    let mut controller = WizardController::new(backend, clock, config.wizard_settings());
    let mut view = controller.start().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        render(&view);
        if view.step == Step::Closed {
            break;
        }
        if let Some(delay) = view.auto_close_after {
            tokio::time::sleep(delay).await;
            view = controller.dispatch(Action::Close).await?;
            continue;
        }

        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.eq_ignore_ascii_case("q") && !view.allows(ActionKind::Close) {
            break;
        }

        match parse_input(&view, input) {
            Ok(action) => match controller.dispatch(action).await {
                Ok(next) => view = next,
                Err(e) => println!("⚠️ {}", e.user_friendly_message()),
            },
            Err(hint) => println!("{}", hint),
        }
    }
    Ok(())
}

fn choices(view: &WizardView) -> Vec<&ChoiceOption> {
    view.prompts
        .iter()
        .flat_map(|prompt| match prompt {
            Prompt::Choice { options, .. } => options.iter().collect(),
            _ => Vec::new(),
        })
        .collect()
}

fn render(view: &WizardView) {
    println!();
    if let Some(notice) = &view.notice {
        let icon = match notice.level {
            NoticeLevel::Info => "ℹ️",
            NoticeLevel::Warning => "⚠️",
            NoticeLevel::Error => "❌",
        };
        println!("{} {}", icon, notice.message);
    }

    let mut number = 0;
    for prompt in &view.prompts {
        match prompt {
            Prompt::Text { message } => println!("{}", message),
            Prompt::Choice { message, options } => {
                println!("{}", message);
                for option in options {
                    number += 1;
                    if option.enabled {
                        println!("  {}) {}", number, option.label);
                    } else {
                        println!("  {}) {} [unavailable]", number, option.label);
                    }
                }
            }
            Prompt::Input {
                message,
                placeholder,
                ..
            } => println!("{} ({})", message, placeholder),
        }
    }

    if view.pending {
        println!("⏳ Loading...");
    }
    if view.total.is_positive() && !view.step.is_terminal() {
        println!("Total so far: {}", view.total);
    }
    let hints: Vec<&str> = SHORTCUTS
        .iter()
        .filter(|(_, kind, _)| view.allows(*kind))
        .map(|(_, _, hint)| *hint)
        .collect();
    if !hints.is_empty() {
        println!("[{}]", hints.join(", "));
    }
}

fn parse_input(view: &WizardView, input: &str) -> std::result::Result<Action, String> {
    if input.is_empty() {
        return Err("Please choose one of the options.".to_string());
    }

    if let Ok(number) = input.parse::<usize>() {
        let options = choices(view);
        return match number.checked_sub(1).and_then(|i| options.get(i)) {
            Some(option) if option.enabled => Ok(option.action.clone()),
            Some(option) => Err(format!("{} is not available.", option.label)),
            None => Err(format!("Choose a number between 1 and {}.", options.len())),
        };
    }

    let lowered = input.to_ascii_lowercase();
    if let Some((_, kind, _)) = SHORTCUTS
        .iter()
        .find(|(key, kind, _)| *key == lowered && view.allows(*kind))
    {
        return Ok(shortcut_action(*kind));
    }

    let submit = view.prompts.iter().find_map(|prompt| match prompt {
        Prompt::Input { submit, .. } => Some(*submit),
        _ => None,
    });
    match submit {
        Some(ActionKind::EnterDate) => Ok(Action::EnterDate(input.to_string())),
        Some(ActionKind::SelectTime) => Ok(Action::SelectTime(input.to_string())),
        _ => Err("Please choose one of the options.".to_string()),
    }
}

fn shortcut_action(kind: ActionKind) -> Action {
    match kind {
        ActionKind::Retry => Action::Retry,
        ActionKind::ChangeDate => Action::ChangeDate,
        ActionKind::ChangeTime => Action::ChangeTime,
        ActionKind::Back => Action::Back,
        ActionKind::Start => Action::Start,
        ActionKind::Cancel => Action::Cancel,
        _ => Action::Close,
    }
}

async fn show_slots(
    backend: Arc<dyn BookingBackend>,
    clock: Arc<dyn Clock>,
    unit: &str,
    date: &str,
) -> Result<()> {
    let date = parse_date("date", date)?;
    let unit = backend
        .list_units(false)
        .await?
        .into_iter()
        .find(|u| u.id.as_str() == unit || u.name.eq_ignore_ascii_case(unit))
        .ok_or_else(|| BookingError::validation("unit", format!("{} is not a known unit", unit)))?;

    let resolver = AvailabilityResolver::new(backend);
    let days = resolver.served_weekdays(&unit.id).await?;
    println!("🏥 {}", unit.name);
    println!("📅 Serves: {}", describe_weekdays(&days));

    let slots = resolver.slots_for(&unit, date, clock.today()).await?;
    if slots.is_empty() {
        println!("No open slots on {}", date.format("%d/%m/%Y"));
    }
    for slot in slots {
        println!("  {}", slot.display());
    }
    Ok(())
}

async fn schedule(
    backend: Arc<dyn BookingBackend>,
    clock: Arc<dyn Clock>,
    path: &Path,
) -> Result<()> {
    let form: ScheduleForm = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let committer = ReservationCommitter::new(Arc::clone(&backend));
    let scheduler = DirectScheduler::new(backend, committer, clock);

    let outcome = scheduler.submit(&form).await?;
    println!("✅ {}", outcome.message());
    Ok(())
}

async fn cancel(backend: Arc<dyn BookingBackend>, reservation: &str) -> Result<()> {
    ReservationCommitter::new(backend)
        .cancel(&ReservationId::from(reservation))
        .await?;
    println!("✅ Reservation {} cancelled", reservation);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use vaccine_booking::utils::error::ConflictKind;

    #[test]
    fn test_rejected_bookings_exit_non_zero() {
        let rejected = [
            BookingError::validation("date", "2020-01-06 is in the past"),
            BookingError::Unauthenticated,
            BookingError::ConflictError {
                kind: ConflictKind::UserAlreadyBooked,
            },
            BookingError::CapacityExceeded {
                existing_reservations: 2,
                reservation_ceiling: 2,
                existing_vaccines: 2,
                vaccine_ceiling: 4,
                requested_vaccines: 1,
            },
            BookingError::AvailabilityEmpty {
                date: NaiveDate::from_ymd_opt(2026, 10, 23).unwrap(),
            },
            BookingError::ConfigError {
                message: "booking.toml not found".to_string(),
            },
        ];
        for error in &rejected {
            assert_ne!(exit_code(error), 0, "{:?} exited with success", error);
        }
    }
}
