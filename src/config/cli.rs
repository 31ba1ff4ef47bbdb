use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "vaccine-booking")]
#[command(about = "Book vaccination appointments from the terminal")]
pub struct CliConfig {
    /// TOML file with the `[service]`, `[wizard]` and `[logging]` sections
    #[arg(long, short, default_value = "booking.toml")]
    pub config: PathBuf,

    /// Run against a local JSON fixture instead of the remote service
    #[arg(long)]
    pub fixture: Option<PathBuf>,

    #[arg(long, short, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Walk through the booking wizard (default)
    Book,
    /// Show served weekdays and open slots of a unit
    Slots { unit: String, date: String },
    /// Book in one step from a JSON scheduling form
    Schedule { form: PathBuf },
    /// Cancel a reservation
    Cancel { reservation: String },
}

impl CliConfig {
    pub fn command(&self) -> CliCommand {
        self.command.clone().unwrap_or(CliCommand::Book)
    }
}
