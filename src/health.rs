/// Health check HTTP endpoint
/// Provides /health, /ready and /metrics for monitoring systems

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::driver::Outcome;

/// Timeout for reading an HTTP request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status of the scheduler
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Transitions confirmed by the vehicle (or already in effect)
    pub transitions_succeeded: u64,
    /// Transitions the policy decided against
    pub transitions_skipped: u64,
    /// Transitions abandoned at their deadline
    pub transitions_missed: u64,
    /// Timestamp of last outcome (Unix epoch seconds)
    pub last_outcome_time: u64,
    /// Whether the last transition ended without missing its deadline
    pub last_outcome_ok: bool,
    /// Whether the last connectivity probe reached the vehicle
    pub device_reachable: bool,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            transitions_succeeded: 0,
            transitions_skipped: 0,
            transitions_missed: 0,
            last_outcome_time: 0,
            last_outcome_ok: true, // Assume healthy until proven otherwise
            device_reachable: true,
        }
    }
}

/// Shared health metrics that can be updated from the scheduler loop
#[derive(Debug)]
pub struct HealthMetrics {
    transitions_succeeded: AtomicU64,
    transitions_skipped: AtomicU64,
    transitions_missed: AtomicU64,
    last_outcome_time: AtomicU64,
    last_outcome_ok: AtomicBool,
    device_reachable: AtomicBool,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            transitions_succeeded: AtomicU64::new(0),
            transitions_skipped: AtomicU64::new(0),
            transitions_missed: AtomicU64::new(0),
            last_outcome_time: AtomicU64::new(0),
            last_outcome_ok: AtomicBool::new(true),
            device_reachable: AtomicBool::new(true),
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl HealthMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how a transition ended
    pub fn record_outcome(&self, outcome: &Outcome) {
        let (counter, ok) = match outcome {
            Outcome::Succeeded => (&self.transitions_succeeded, true),
            Outcome::SkippedByPolicy(_) => (&self.transitions_skipped, true),
            Outcome::DeadlinePassed => (&self.transitions_missed, false),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.last_outcome_time.store(unix_now(), Ordering::Relaxed);
        self.last_outcome_ok.store(ok, Ordering::Relaxed);
        if matches!(outcome, Outcome::Succeeded) {
            self.device_reachable.store(true, Ordering::Relaxed);
        }
    }

    /// Record whether a connectivity probe reached the vehicle
    pub fn record_probe(&self, reachable: bool) {
        self.device_reachable.store(reachable, Ordering::Relaxed);
    }

    /// Get current health status
    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            transitions_succeeded: self.transitions_succeeded.load(Ordering::Relaxed),
            transitions_skipped: self.transitions_skipped.load(Ordering::Relaxed),
            transitions_missed: self.transitions_missed.load(Ordering::Relaxed),
            last_outcome_time: self.last_outcome_time.load(Ordering::Relaxed),
            last_outcome_ok: self.last_outcome_ok.load(Ordering::Relaxed),
            device_reachable: self.device_reachable.load(Ordering::Relaxed),
        }
    }
}

impl HealthStatus {
    /// Ready while the vehicle answers and the last transition was not missed
    pub fn is_ready(&self) -> bool {
        self.device_reachable && (self.last_outcome_ok || self.last_outcome_time == 0)
    }
}

/// Run the health check HTTP server
pub async fn run_health_server(
    port: u16,
    metrics: Arc<HealthMetrics>,
    cancel_token: CancellationToken,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind health check server on port {}: {}", port, e);
            return;
        }
    };

    info!("Health endpoint listening on port {} (/health, /ready, /metrics)", port);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((mut socket, peer_addr)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_request(&mut socket, &metrics).await {
                                debug!("Error handling request from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Health check server shutting down");
                break;
            }
        }
    }
}

async fn handle_request(
    socket: &mut tokio::net::TcpStream,
    metrics: &HealthMetrics,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];

    // Slow clients are dropped after REQUEST_TIMEOUT
    let n = match timeout(REQUEST_TIMEOUT, socket.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("Request timeout after {:?}", REQUEST_TIMEOUT);
            return Ok(());
        }
    };

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]);
    let response = route(&request, &metrics.status());

    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;

    Ok(())
}

/// Pick the response for a raw request; only the request line matters
fn route(request: &str, status: &HealthStatus) -> String {
    let mut request_line = request.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let path = request_line.next().unwrap_or("/");
    // Ignore query strings from probes that add cache busters
    let path = path.split('?').next().unwrap_or(path);

    if method != "GET" && method != "HEAD" {
        return build_not_found_response();
    }

    match path.trim_end_matches('/') {
        "/health" | "/healthz" => build_health_response(status),
        "/ready" | "/readyz" => build_ready_response(status.is_ready()),
        "/metrics" => build_metrics_response(status),
        _ => build_not_found_response(),
    }
}

fn build_health_response(status: &HealthStatus) -> String {
    let body = format!(
        r#"{{"status":"healthy","transitions_succeeded":{},"transitions_skipped":{},"transitions_missed":{},"last_outcome_time":{},"last_outcome_ok":{},"device_reachable":{}}}"#,
        status.transitions_succeeded,
        status.transitions_skipped,
        status.transitions_missed,
        status.last_outcome_time,
        status.last_outcome_ok,
        status.device_reachable
    );

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn build_ready_response(ready: bool) -> String {
    let (status_code, status_text, body) = if ready {
        (200, "OK", r#"{"ready":true}"#)
    } else {
        (503, "Service Unavailable", r#"{"ready":false}"#)
    };

    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        body.len(),
        body
    )
}

fn build_metrics_response(status: &HealthStatus) -> String {
    // Prometheus-compatible metrics format
    let body = format!(
        "# HELP peakcharge_transitions_total Charging transitions by outcome\n\
         # TYPE peakcharge_transitions_total counter\n\
         peakcharge_transitions_total{{outcome=\"succeeded\"}} {}\n\
         peakcharge_transitions_total{{outcome=\"skipped\"}} {}\n\
         peakcharge_transitions_total{{outcome=\"missed\"}} {}\n\
         # HELP peakcharge_last_outcome_timestamp Unix timestamp of the last transition outcome\n\
         # TYPE peakcharge_last_outcome_timestamp gauge\n\
         peakcharge_last_outcome_timestamp {}\n\
         # HELP peakcharge_device_reachable Whether the vehicle answered the last probe (1) or not (0)\n\
         # TYPE peakcharge_device_reachable gauge\n\
         peakcharge_device_reachable {}\n",
        status.transitions_succeeded,
        status.transitions_skipped,
        status.transitions_missed,
        status.last_outcome_time,
        if status.device_reachable { 1 } else { 0 }
    );

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn build_not_found_response() -> String {
    let body = r#"{"error":"Not Found"}"#;
    format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}
