use chrono_tz::Tz;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::driver::Timing;
use crate::error::{Error, Result};
use crate::policy::PolicyConfig;
use crate::window::TimeWindow;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_GRACE_MINUTES: u64 = 15;

/// Longest grace window accepted for a one-shot start or stop
pub const MAX_GRACE_MINUTES: u64 = 3 * 24 * 60;

/// Upper bound for RETRY_INTERVAL_SECS and CONFIRM_DELAY_SECS
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Account credentials for the vehicle cloud
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &crate::redact::email(&self.login))
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,

    // Vehicle to supervise; only `scan` works without it
    pub vin: Option<String>,

    // Base URL of the vehicle bridge API
    pub api_url: String,

    // Daily charging periods, interpreted in `timezone`
    pub windows: Vec<TimeWindow>,
    pub timezone: Tz,

    pub policy: PolicyConfig,
    pub timing: Timing,

    // Grace window for one-shot start/stop
    pub grace: Duration,

    // Append log lines to this file as well as stdout
    pub log_file: Option<String>,

    // Health check HTTP server port (optional, disabled if not set)
    pub health_port: Option<u16>,
}

fn parse_json<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::config(format!("{} is malformed: {}", key, e)))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::config(format!("{} must be a number, got '{}'", key, raw)))
}

impl Config {
    /// Load from the process environment, after reading `env_file` (or `.env` if present)
    pub fn from_env(env_file: Option<&Path>) -> Result<Self> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| {
                    Error::config(format!("cannot read env file '{}': {}", path.display(), e))
                })?;
            }
            None => {
                dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
            }
        }
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| get(key).ok_or_else(|| Error::config(format!("{} not set", key)));

        let windows = match get("CHARGING_WINDOWS") {
            Some(raw) if !raw.trim().is_empty() => parse_json("CHARGING_WINDOWS", &raw)?,
            _ => Vec::new(),
        };

        let ignore_temperatures = match get("IGNORE_TEMPERATURES") {
            Some(raw) if !raw.trim().is_empty() => parse_json("IGNORE_TEMPERATURES", &raw)?,
            _ => Vec::new(),
        };

        let ignore_min_power_kw = match get("IGNORE_MIN_POWER_KW") {
            Some(raw) => parse_number::<f64>("IGNORE_MIN_POWER_KW", &raw)?,
            None => 0.0,
        };

        let timezone = match get("TIMEZONE") {
            Some(raw) => raw
                .trim()
                .parse::<Tz>()
                .map_err(|_| Error::config(format!("TIMEZONE '{}' is not a known IANA zone", raw)))?,
            None => Tz::UTC,
        };

        let defaults = Timing::default();
        let timing = Timing {
            confirm_delay: match get("CONFIRM_DELAY_SECS") {
                Some(raw) => Duration::from_secs(parse_number("CONFIRM_DELAY_SECS", &raw)?),
                None => defaults.confirm_delay,
            },
            retry_interval: match get("RETRY_INTERVAL_SECS") {
                Some(raw) => Duration::from_secs(parse_number("RETRY_INTERVAL_SECS", &raw)?),
                None => defaults.retry_interval,
            },
        };

        let grace_minutes: u64 = match get("GRACE_MINUTES") {
            Some(raw) => parse_number("GRACE_MINUTES", &raw)?,
            None => DEFAULT_GRACE_MINUTES,
        };

        Ok(Config {
            credentials: Credentials {
                login: required("WECONNECT_LOGIN")?,
                password: required("WECONNECT_PASSWORD")?,
            },
            vin: get("VEHICLE_VIN").map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
            api_url: get("DEVICE_API_URL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            windows,
            timezone,
            policy: PolicyConfig {
                ignore_temperatures,
                ignore_min_power_kw,
            },
            timing,
            grace: Duration::from_secs(grace_minutes.saturating_mul(60)),
            log_file: get("LOG_FILE").filter(|s| !s.is_empty()),
            health_port: match get("HEALTH_PORT") {
                Some(raw) => Some(parse_number("HEALTH_PORT", &raw)?),
                None => None,
            },
        })
    }

    /// Create config from a HashMap (convenience for testing)
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// The configured vehicle, required by every command except `scan`
    pub fn require_vin(&self) -> Result<&str> {
        self.vin
            .as_deref()
            .ok_or_else(|| Error::config("VEHICLE_VIN not set"))
    }

    /// Validate configuration values for continuous operation.
    /// Returns Ok(()) if all validations pass, or Err listing everything that failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.vin.is_none() {
            errors.push("VEHICLE_VIN not set.".to_string());
        }

        if self.windows.is_empty() {
            errors.push("CHARGING_WINDOWS must define at least one window.".to_string());
        }

        for window in &self.windows {
            if window.start == window.stop {
                errors.push(format!(
                    "CHARGING_WINDOWS entry {} starts and stops at the same time.",
                    window
                ));
            }
        }

        if !self.policy.ignore_min_power_kw.is_finite() || self.policy.ignore_min_power_kw < 0.0 {
            errors.push(format!(
                "IGNORE_MIN_POWER_KW={} must be a non-negative number.",
                self.policy.ignore_min_power_kw
            ));
        }

        if self.policy.ignore_temperatures.iter().any(|t| !t.is_finite()) {
            errors.push("IGNORE_TEMPERATURES must contain only finite numbers.".to_string());
        }

        if self.timing.retry_interval.is_zero() {
            errors.push("RETRY_INTERVAL_SECS must be greater than 0.".to_string());
        }

        if self.timing.retry_interval.as_secs() > MAX_INTERVAL_SECS {
            errors.push(format!(
                "RETRY_INTERVAL_SECS={} exceeds the maximum of {}.",
                self.timing.retry_interval.as_secs(),
                MAX_INTERVAL_SECS
            ));
        }

        if self.timing.confirm_delay.as_secs() > MAX_INTERVAL_SECS {
            errors.push(format!(
                "CONFIRM_DELAY_SECS={} exceeds the maximum of {}.",
                self.timing.confirm_delay.as_secs(),
                MAX_INTERVAL_SECS
            ));
        }

        if self.timing.confirm_delay >= self.timing.retry_interval {
            errors.push(format!(
                "CONFIRM_DELAY_SECS={} should be shorter than RETRY_INTERVAL_SECS={}.",
                self.timing.confirm_delay.as_secs(),
                self.timing.retry_interval.as_secs()
            ));
        }

        if self.grace.is_zero() {
            errors.push("GRACE_MINUTES must be greater than 0.".to_string());
        }

        if self.grace.as_secs() / 60 > MAX_GRACE_MINUTES {
            errors.push(format!(
                "GRACE_MINUTES={} exceeds the maximum of {}.",
                self.grace.as_secs() / 60,
                MAX_GRACE_MINUTES
            ));
        }

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            errors.push(format!("DEVICE_API_URL '{}' must be an http(s) URL.", self.api_url));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}
