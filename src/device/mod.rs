//! Vehicle telemetry model and the device collaborator seam
//!
//! [`ChargeDevice`] is the boundary to the vehicle cloud. [`VehicleLink`] owns
//! the session for one vehicle and is handed by `&mut` to whoever drives it.

pub mod http;

use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::error::{DeviceError, Error, Result};
use crate::redact;

pub use http::HttpDevice;

/// Direction of a charge transition, also the command sent to the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Start,
    Stop,
}

impl TransitionKind {
    pub fn opposite(self) -> Self {
        match self {
            TransitionKind::Start => TransitionKind::Stop,
            TransitionKind::Stop => TransitionKind::Start,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Start => "start",
            TransitionKind::Stop => "stop",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlugState {
    Connected,
    Disconnected,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChargingState {
    Off,
    ReadyForCharging,
    NotReadyForCharging,
    Conservation,
    Charging,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChargeType {
    Ac,
    Dc,
    Off,
    #[serde(other)]
    Unknown,
}

/// Point-in-time read of the telemetry the scheduler decides on.
/// Field names on the wire follow the vehicle cloud's naming.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(rename = "targetTemperature_C")]
    pub target_temperature_c: f64,
    #[serde(rename = "plugConnectionState")]
    pub plug: PlugState,
    #[serde(rename = "chargingState")]
    pub charging: ChargingState,
    #[serde(rename = "currentSOC_pct")]
    pub current_soc_pct: u8,
    #[serde(rename = "targetSOC_pct")]
    pub target_soc_pct: u8,
    #[serde(rename = "chargeType")]
    pub charge_type: ChargeType,
    #[serde(rename = "chargePower_kW")]
    pub charge_power_kw: f64,
}

impl DeviceSnapshot {
    pub fn is_charging(&self) -> bool {
        self.charging == ChargingState::Charging
    }

    /// Whether the vehicle is in the state a completed transition leaves it in
    pub fn satisfies(&self, kind: TransitionKind) -> bool {
        match kind {
            TransitionKind::Start => self.is_charging(),
            TransitionKind::Stop => !self.is_charging(),
        }
    }
}

/// A vehicle visible on the account
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VehicleSummary {
    pub vin: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Operations the scheduler needs from the vehicle cloud
#[allow(async_fn_in_trait)]
pub trait ChargeDevice {
    type Session;

    async fn connect(&self, credentials: &Credentials) -> std::result::Result<Self::Session, DeviceError>;

    async fn list_vehicles(
        &self,
        session: &Self::Session,
    ) -> std::result::Result<Vec<VehicleSummary>, DeviceError>;

    async fn fetch_snapshot(
        &self,
        session: &Self::Session,
        vin: &str,
    ) -> std::result::Result<DeviceSnapshot, DeviceError>;

    async fn send_command(
        &self,
        session: &Self::Session,
        vin: &str,
        action: TransitionKind,
    ) -> std::result::Result<(), DeviceError>;
}

/// Connection state for a single vehicle
pub struct VehicleLink<D: ChargeDevice> {
    device: D,
    credentials: Credentials,
    vin: String,
    session: Option<D::Session>,
}

impl<D: ChargeDevice> VehicleLink<D> {
    pub fn new(device: D, credentials: Credentials, vin: impl Into<String>) -> Self {
        Self {
            device,
            credentials,
            vin: vin.into(),
            session: None,
        }
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Log in again, replacing any existing session
    pub async fn refresh(&mut self) -> Result<()> {
        self.session = None;
        debug!("Connecting as {}", redact::email(&self.credentials.login));
        let session = self.device.connect(&self.credentials).await?;
        self.session = Some(session);
        Ok(())
    }

    async fn ensure_session(&mut self) -> Result<()> {
        if self.session.is_none() {
            self.refresh().await?;
        }
        Ok(())
    }

    pub async fn snapshot(&mut self) -> Result<DeviceSnapshot> {
        self.ensure_session().await?;
        let result = match &self.session {
            Some(session) => self.device.fetch_snapshot(session, &self.vin).await,
            None => return Err(no_session()),
        };
        self.settle(result)
    }

    pub async fn send(&mut self, action: TransitionKind) -> Result<()> {
        self.ensure_session().await?;
        let result = match &self.session {
            Some(session) => self.device.send_command(session, &self.vin, action).await,
            None => return Err(no_session()),
        };
        self.settle(result)
    }

    pub async fn list_vehicles(&mut self) -> Result<Vec<VehicleSummary>> {
        self.ensure_session().await?;
        let result = match &self.session {
            Some(session) => self.device.list_vehicles(session).await,
            None => return Err(no_session()),
        };
        self.settle(result)
    }

    /// Drop the session after a connectivity failure so the next call logs in again
    fn settle<T>(&mut self, result: std::result::Result<T, DeviceError>) -> Result<T> {
        result.map_err(|e| {
            if matches!(e, DeviceError::Auth(_) | DeviceError::Network(_)) {
                warn!("Dropping session for {}: {}", redact::vin(&self.vin), e);
                self.session = None;
            }
            Error::from(e)
        })
    }
}

fn no_session() -> Error {
    Error::Connectivity(DeviceError::Network("no session".to_string()))
}
