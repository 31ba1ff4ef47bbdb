use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("No signed-in user")]
    Unauthenticated,

    #[error("Invalid {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("Unit '{unit}' does not serve your postal code")]
    ReachabilityRejected { unit: String },

    #[error("Unit '{unit}' does not accept online booking")]
    UnsupportedChannel { unit: String },

    #[error("No availability on {date}")]
    AvailabilityEmpty { date: NaiveDate },

    #[error(
        "Slot is full: {existing_reservations}/{reservation_ceiling} reservations, \
         {existing_vaccines}+{requested_vaccines}/{vaccine_ceiling} vaccines"
    )]
    CapacityExceeded {
        existing_reservations: u32,
        reservation_ceiling: u32,
        existing_vaccines: u32,
        vaccine_ceiling: u32,
        requested_vaccines: u32,
    },

    #[error("Booking conflict: {kind}")]
    ConflictError { kind: ConflictKind },

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Remote service error: {message}")]
    RemoteFailure { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid configuration value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Step '{step}' is still waiting for a response")]
    StepBusy { step: String },

    #[error("Action '{action}' is not available at step '{step}'")]
    IllegalAction { step: String, action: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The user already holds a non-cancelled reservation on that date.
    UserAlreadyBooked,
    /// The (unit, date, time) tuple was taken by someone else at write time.
    SlotTaken,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::UserAlreadyBooked => write!(f, "you already have an appointment on this date"),
            ConflictKind::SlotTaken => write!(f, "this time slot was just taken"),
        }
    }
}

/// Cloneable discriminant of [`BookingError`], carried by wizard views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    Validation,
    ReachabilityRejected,
    UnsupportedChannel,
    AvailabilityEmpty,
    CapacityExceeded,
    Conflict,
    RemoteFailure,
    Configuration,
    Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    User,
    Availability,
    Network,
    Configuration,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BookingError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        BookingError::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        BookingError::RemoteFailure {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Unauthenticated => ErrorKind::Unauthenticated,
            BookingError::ValidationError { .. } => ErrorKind::Validation,
            BookingError::ReachabilityRejected { .. } => ErrorKind::ReachabilityRejected,
            BookingError::UnsupportedChannel { .. } => ErrorKind::UnsupportedChannel,
            BookingError::AvailabilityEmpty { .. } => ErrorKind::AvailabilityEmpty,
            BookingError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            BookingError::ConflictError { .. } => ErrorKind::Conflict,
            BookingError::ApiError(_)
            | BookingError::RemoteFailure { .. }
            | BookingError::IoError(_)
            | BookingError::SerializationError(_) => ErrorKind::RemoteFailure,
            BookingError::ConfigError { .. }
            | BookingError::InvalidConfigValueError { .. }
            | BookingError::MissingConfigError { .. } => ErrorKind::Configuration,
            BookingError::StepBusy { .. } | BookingError::IllegalAction { .. } => {
                ErrorKind::Protocol
            }
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.kind() {
            ErrorKind::Unauthenticated
            | ErrorKind::Validation
            | ErrorKind::ReachabilityRejected
            | ErrorKind::UnsupportedChannel => ErrorCategory::User,
            ErrorKind::AvailabilityEmpty | ErrorKind::CapacityExceeded | ErrorKind::Conflict => {
                ErrorCategory::Availability
            }
            ErrorKind::RemoteFailure => ErrorCategory::Network,
            ErrorKind::Configuration => ErrorCategory::Configuration,
            ErrorKind::Protocol => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::User | ErrorCategory::Availability => ErrorSeverity::Low,
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Internal => ErrorSeverity::High,
            ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// Short message shown to the person booking.
    pub fn user_friendly_message(&self) -> String {
        match self {
            BookingError::Unauthenticated => "Please sign in to book an appointment.".to_string(),
            BookingError::ValidationError { field, message } => {
                format!("Please check the {}: {}", field.replace('_', " "), message)
            }
            BookingError::ReachabilityRejected { unit } => {
                format!("{} does not serve your address. Please choose another unit.", unit)
            }
            BookingError::UnsupportedChannel { unit } => format!(
                "{} does not take online bookings. Please contact the unit directly.",
                unit
            ),
            BookingError::AvailabilityEmpty { date } => format!(
                "There is no availability on {}. Please choose another day.",
                date.format("%Y-%m-%d")
            ),
            BookingError::CapacityExceeded {
                existing_reservations,
                reservation_ceiling,
                existing_vaccines,
                vaccine_ceiling,
                requested_vaccines,
            } => {
                if existing_reservations >= reservation_ceiling {
                    format!(
                        "This slot is fully booked ({} of {} reservations). Please pick another date or time.",
                        existing_reservations, reservation_ceiling
                    )
                } else {
                    format!(
                        "This slot cannot take {} more vaccine(s) ({} of {} already booked). Please pick another date or time.",
                        requested_vaccines, existing_vaccines, vaccine_ceiling
                    )
                }
            }
            BookingError::ConflictError { kind } => format!("Could not book: {}.", kind),
            BookingError::StepBusy { .. } => "Please wait, still loading.".to_string(),
            BookingError::IllegalAction { .. } => "That option is not available right now.".to_string(),
            BookingError::ConfigError { .. }
            | BookingError::InvalidConfigValueError { .. }
            | BookingError::MissingConfigError { .. } => format!("Configuration problem: {}", self),
            BookingError::ApiError(_)
            | BookingError::RemoteFailure { .. }
            | BookingError::IoError(_)
            | BookingError::SerializationError(_) => {
                "Something went wrong talking to the booking service.".to_string()
            }
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Unauthenticated => "Sign in and start the booking again",
            ErrorKind::Validation => "Correct the highlighted field and try again",
            ErrorKind::ReachabilityRejected => "Pick a unit that serves your postal code",
            ErrorKind::UnsupportedChannel => "Call or visit the unit to schedule",
            ErrorKind::AvailabilityEmpty => "Choose a different day",
            ErrorKind::CapacityExceeded => "Go back and choose another date or time",
            ErrorKind::Conflict => "Review your existing appointments or pick another slot",
            ErrorKind::RemoteFailure => "Retry in a moment",
            ErrorKind::Configuration => "Check the configuration file and environment variables",
            ErrorKind::Protocol => "Wait for the current step to finish",
        }
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
