//! Transition driver
//!
//! Runs one scheduled start or stop: waits until it is due, then attempts it
//! with a fixed retry interval until it is confirmed, skipped by policy, or the
//! opposite transition becomes due.

#[cfg(test)]
mod model;

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::clock::{after, sleep_until, Clock};
use crate::device::{ChargeDevice, DeviceSnapshot, TransitionKind, VehicleLink};
use crate::error::Result;
use crate::policy::{should_skip, PolicyConfig, SkipReason};
use crate::scheduler::format_duration;

/// Time given to the vehicle to apply a command before checking it
pub const CONFIRMATION_DELAY: Duration = Duration::from_secs(30);

/// Wait between failed attempts
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub confirm_delay: Duration,
    pub retry_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            confirm_delay: CONFIRMATION_DELAY,
            retry_interval: RETRY_INTERVAL,
        }
    }
}

/// A start or stop to perform between `due_at` and `deadline_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransition {
    pub kind: TransitionKind,
    pub due_at: DateTime<Utc>,
    /// When the opposite transition becomes due; no attempt is made at or after it
    pub deadline_at: DateTime<Utc>,
}

impl PendingTransition {
    /// Due right away, retried for at most `grace`
    pub fn immediate(kind: TransitionKind, now: DateTime<Utc>, grace: Duration) -> Self {
        Self {
            kind,
            due_at: now,
            deadline_at: after(now, grace),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded,
    SkippedByPolicy(SkipReason),
    DeadlinePassed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::SkippedByPolicy(reason) => write!(f, "skipped: {}", reason),
            Outcome::DeadlinePassed => write!(f, "deadline passed"),
        }
    }
}

/// Result of a single pass through the retry loop
enum Attempt {
    Done(Outcome),
    /// Command not sent or not confirmed; wait and try again
    Retry,
    /// Deadline reached before the command could be sent
    Expired,
}

/// Run `transition` to completion.
///
/// Only a missing vehicle is an error; connectivity failures are retried
/// until the deadline.
pub async fn execute<D: ChargeDevice, C: Clock>(
    transition: &PendingTransition,
    link: &mut VehicleLink<D>,
    policy: &PolicyConfig,
    timing: &Timing,
    clock: &C,
) -> Result<Outcome> {
    let kind = transition.kind;

    if let Some(wait) = crate::clock::remaining(clock.now(), transition.due_at) {
        info!("Next {} in {}", kind, format_duration(wait));
        sleep_until(clock, transition.due_at).await;
    }

    let mut attempt = 0u32;
    while clock.now() < transition.deadline_at {
        attempt += 1;
        info!("Attempt {} to {} charging", attempt, kind);

        match attempt_once(kind, transition.deadline_at, link, policy, timing, clock).await? {
            Attempt::Done(outcome) => return Ok(outcome),
            Attempt::Expired => break,
            Attempt::Retry => {
                let resume_at = retry_at(clock.now(), timing.retry_interval, transition.deadline_at);
                if resume_at < transition.deadline_at {
                    info!(
                        "Retrying {} in {}",
                        kind,
                        format_duration(timing.retry_interval)
                    );
                }
                sleep_until(clock, resume_at).await;
            }
        }
    }

    warn!(
        "Missed {}: deadline {} reached after {} attempt(s)",
        kind, transition.deadline_at, attempt
    );
    Ok(Outcome::DeadlinePassed)
}

/// Next retry instant, never later than the deadline
fn retry_at(now: DateTime<Utc>, interval: Duration, deadline: DateTime<Utc>) -> DateTime<Utc> {
    after(now, interval).min(deadline)
}

/// Fatal errors propagate; anything retryable is logged and turned into `or`
fn recover<T>(result: Result<T>, what: &str, or: T) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_retryable() => {
            error!("{} failed: {}", what, e);
            Ok(or)
        }
        Err(e) => Err(e),
    }
}

async fn attempt_once<D: ChargeDevice, C: Clock>(
    kind: TransitionKind,
    deadline: DateTime<Utc>,
    link: &mut VehicleLink<D>,
    policy: &PolicyConfig,
    timing: &Timing,
    clock: &C,
) -> Result<Attempt> {
    if !recover(link.refresh().await.map(|_| true), "Connection refresh", false)? {
        return Ok(Attempt::Retry);
    }

    let snapshot = recover(link.snapshot().await.map(Some), "Status fetch", None)?;

    if kind == TransitionKind::Start && snapshot.as_ref().is_some_and(DeviceSnapshot::is_charging) {
        info!("Vehicle is already charging; start is a no-op");
        return Ok(Attempt::Done(Outcome::Succeeded));
    }

    if let Some(reason) = should_skip(kind, snapshot.as_ref(), policy) {
        info!("Skipping {}: {}", kind, reason);
        return Ok(Attempt::Done(Outcome::SkippedByPolicy(reason)));
    }

    if clock.now() >= deadline {
        return Ok(Attempt::Expired);
    }

    info!("Sending {} command", kind);
    if !recover(link.send(kind).await.map(|_| true), "Command", false)? {
        return Ok(Attempt::Retry);
    }

    sleep_until(clock, after(clock.now(), timing.confirm_delay)).await;

    match recover(link.snapshot().await.map(Some), "Confirmation fetch", None)? {
        Some(confirmed) if confirmed.satisfies(kind) => {
            info!("Confirmed {} (state {:?})", kind, confirmed.charging);
            Ok(Attempt::Done(Outcome::Succeeded))
        }
        Some(confirmed) => {
            warn!("{} not confirmed, vehicle reports {:?}", kind, confirmed.charging);
            Ok(Attempt::Retry)
        }
        None => Ok(Attempt::Retry),
    }
}
