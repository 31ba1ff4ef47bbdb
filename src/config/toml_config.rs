use crate::core::wizard::WizardSettings;
use crate::utils::error::{BookingError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_range, validate_required_field,
    validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_AUTO_CLOSE_MS: u64 = 3000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Absent when the app runs against a local fixture.
    pub service: Option<ServiceConfig>,
    pub wizard: Option<WizardConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: String,
    pub access_token: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardConfig {
    pub auto_close_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub json: Option<bool>,
}

impl ServiceConfig {
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }

    /// The signed-in user's token. An unset `${VAR}` placeholder counts as
    /// signed out.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && !is_placeholder(t))
    }
}

fn is_placeholder(value: &str) -> bool {
    value.starts_with("${") && value.ends_with('}')
}

impl BookingConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;

        toml::from_str(&processed).map_err(|e| BookingError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value. Unset variables are
    /// left as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| BookingError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn service(&self) -> Result<&ServiceConfig> {
        validate_required_field("service", &self.service)
    }

    pub fn auto_close_ms(&self) -> u64 {
        self.wizard
            .as_ref()
            .and_then(|w| w.auto_close_ms)
            .unwrap_or(DEFAULT_AUTO_CLOSE_MS)
    }

    pub fn wizard_settings(&self) -> WizardSettings {
        WizardSettings {
            auto_close_after: Duration::from_millis(self.auto_close_ms()),
        }
    }

    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or("info")
    }

    pub fn json_logs(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.json).unwrap_or(false)
    }
}

impl Validate for ServiceConfig {
    fn validate(&self) -> Result<()> {
        validate_url("service.base_url", &self.base_url)?;
        validate_non_empty_string("service.api_key", &self.api_key)?;
        if is_placeholder(self.api_key.trim()) {
            return Err(BookingError::InvalidConfigValueError {
                field: "service.api_key".to_string(),
                value: self.api_key.clone(),
                reason: "environment variable is not set".to_string(),
            });
        }
        if let Some(timeout) = self.timeout_seconds {
            validate_positive_number("service.timeout_seconds", timeout, 1)?;
        }
        Ok(())
    }
}

impl Validate for BookingConfig {
    fn validate(&self) -> Result<()> {
        if let Some(service) = &self.service {
            service.validate()?;
        }
        validate_range("wizard.auto_close_ms", self.auto_close_ms(), 0, 60_000)?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level = self.log_level();
        if !valid_levels.contains(&level) {
            return Err(BookingError::InvalidConfigValueError {
                field: "logging.level".to_string(),
                value: level.to_string(),
                reason: format!("Valid levels: {}", valid_levels.join(", ")),
            });
        }
        Ok(())
    }
}
