//! Error taxonomy for the charge scheduler
//!
//! Device collaborator failures are reported as [`DeviceError`]. Core
//! operations return [`Error`], which separates fatal configuration and
//! lookup problems from retryable connectivity failures.

use thiserror::Error;

/// Failure reported by a [`crate::device::ChargeDevice`] implementation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    /// Login rejected by the vehicle cloud
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Transport failure or server-side error
    #[error("network error: {0}")]
    Network(String),
    /// Vehicle identifier absent from the account
    #[error("vehicle {0} not found on account")]
    NotFound(String),
    /// Response could not be understood
    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// Errors surfaced by scheduling operations
#[derive(Debug, Error)]
pub enum Error {
    /// No windows, malformed time-of-day or thresholds. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Auth or network failure. Recoverable with a retry.
    #[error("connectivity error: {0}")]
    Connectivity(DeviceError),
    /// Configured vehicle is not on the account. Fatal.
    #[error("vehicle {0} not found on account")]
    DeviceNotFound(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Whether the operation may succeed if attempted again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connectivity(_))
    }
}

impl From<DeviceError> for Error {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NotFound(vin) => Error::DeviceNotFound(vin),
            other => Error::Connectivity(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
