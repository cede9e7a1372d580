/// JSON-over-HTTP vehicle bridge
///
/// Logs in once per session and sends the bearer token on every request.
/// Status codes are mapped onto [`DeviceError`] so the driver can tell
/// retryable failures from a missing vehicle.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ChargeDevice, DeviceSnapshot, TransitionKind, VehicleSummary};
use crate::config::Credentials;
use crate::error::{DeviceError, Error, Result};
use crate::redact;

/// Per-request timeout; a hung bridge must not stall the scheduler
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// Authenticated bridge session
#[derive(Clone)]
pub struct HttpSession {
    token: String,
}

impl std::fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSession").field("token", &"***").finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpDevice {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDevice {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn vehicle_url(&self, vin: &str, rest: &str) -> String {
        format!("{}/vehicles/{}/{}", self.base_url, urlencoding::encode(vin), rest)
    }
}

/// Map a non-success status to the matching device error
fn classify_status(status: StatusCode, what: &str) -> DeviceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DeviceError::Auth(format!("{} rejected: HTTP {}", what, status))
        }
        StatusCode::NOT_FOUND => DeviceError::NotFound(what.to_string()),
        _ => DeviceError::Network(format!("{} failed: HTTP {}", what, status)),
    }
}

fn transport(e: reqwest::Error) -> DeviceError {
    DeviceError::Network(e.to_string())
}

/// Check the status, then decode the JSON body
async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> std::result::Result<T, DeviceError> {
    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(status, what));
    }
    let body = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&body)
        .map_err(|e| DeviceError::Protocol(format!("malformed {} response: {}", what, e)))
}

impl ChargeDevice for HttpDevice {
    type Session = HttpSession;

    async fn connect(&self, credentials: &Credentials) -> std::result::Result<HttpSession, DeviceError> {
        debug!("Logging in to {} as {}", self.base_url, redact::email(&credentials.login));
        let response = self
            .client
            .post(format!("{}/login", self.base_url))
            .json(&LoginRequest {
                username: &credentials.login,
                password: &credentials.password,
            })
            .send()
            .await
            .map_err(transport)?;

        // A missing login endpoint means a misconfigured URL, not a missing vehicle
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DeviceError::Protocol(format!(
                "no login endpoint at {}",
                self.base_url
            )));
        }

        let login: LoginResponse = read_json(response, "login").await?;
        Ok(HttpSession { token: login.token })
    }

    async fn list_vehicles(
        &self,
        session: &HttpSession,
    ) -> std::result::Result<Vec<VehicleSummary>, DeviceError> {
        let response = self
            .client
            .get(format!("{}/vehicles", self.base_url))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(transport)?;
        read_json(response, "vehicle list").await
    }

    async fn fetch_snapshot(
        &self,
        session: &HttpSession,
        vin: &str,
    ) -> std::result::Result<DeviceSnapshot, DeviceError> {
        let response = self
            .client
            .get(self.vehicle_url(vin, "status"))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DeviceError::NotFound(vin.to_string()));
        }
        read_json(response, "vehicle status").await
    }

    async fn send_command(
        &self,
        session: &HttpSession,
        vin: &str,
        action: TransitionKind,
    ) -> std::result::Result<(), DeviceError> {
        let response = self
            .client
            .post(self.vehicle_url(vin, &format!("charging/{}", action)))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(DeviceError::NotFound(vin.to_string())),
            status => Err(classify_status(status, &format!("charging {}", action))),
        }
    }
}
