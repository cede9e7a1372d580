/// Peak-hour charge scheduler
/// Alternates between the next start and next stop drawn from the daily windows, forever

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clock::{after, sleep_until, Clock};
use crate::device::{ChargeDevice, DeviceSnapshot, TransitionKind, VehicleLink};
use crate::driver::{execute, Outcome, PendingTransition, Timing};
use crate::error::{Error, Result};
use crate::health::HealthMetrics;
use crate::policy::PolicyConfig;
use crate::redact;
use crate::window::{next_start, next_stop, TimeWindow};

/// Minimum gap between the due instants of consecutive cycles
pub const CYCLE_SETTLE_SECS: i64 = 1;

/// Pick whichever of next start / next stop comes first.
/// The later one becomes the deadline. Ties go to Stop.
pub fn plan_next_transition<Z: TimeZone>(
    now: &DateTime<Z>,
    windows: &[TimeWindow],
) -> Result<PendingTransition> {
    let start = next_start(now, windows)?.with_timezone(&Utc);
    let stop = next_stop(now, windows)?.with_timezone(&Utc);

    Ok(if start < stop {
        PendingTransition {
            kind: TransitionKind::Start,
            due_at: start,
            deadline_at: stop,
        }
    } else {
        PendingTransition {
            kind: TransitionKind::Stop,
            due_at: stop,
            deadline_at: start,
        }
    })
}

/// Format duration for logging
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

/// What the scheduler is driving and how
#[derive(Debug, Clone)]
pub struct Schedule {
    pub windows: Vec<TimeWindow>,
    pub timezone: Tz,
    pub policy: PolicyConfig,
    pub timing: Timing,
}

impl Schedule {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            windows: config.windows.clone(),
            timezone: config.timezone,
            policy: config.policy.clone(),
            timing: config.timing,
        }
    }
}

/// Owns the vehicle session for the lifetime of the process
pub struct Scheduler<D: ChargeDevice, C: Clock> {
    link: VehicleLink<D>,
    clock: C,
    schedule: Schedule,
    metrics: Arc<HealthMetrics>,
}

impl<D: ChargeDevice, C: Clock> Scheduler<D, C> {
    pub fn new(link: VehicleLink<D>, clock: C, schedule: Schedule) -> Self {
        Self {
            link,
            clock,
            schedule,
            metrics: Arc::new(HealthMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<HealthMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn link(&self) -> &VehicleLink<D> {
        &self.link
    }

    /// Next transition as seen from the current time
    pub fn plan(&self) -> Result<PendingTransition> {
        let now = self.clock.now().with_timezone(&self.schedule.timezone);
        plan_next_transition(&now, &self.schedule.windows)
    }

    /// Retry until one snapshot comes back, so scheduling never starts blind
    pub async fn wait_for_device(&mut self) -> Result<DeviceSnapshot> {
        let vin = redact::vin(self.link.vin());
        loop {
            let probe = match self.link.refresh().await {
                Ok(()) => self.link.snapshot().await,
                Err(e) => Err(e),
            };
            match probe {
                Ok(snapshot) => {
                    info!("Vehicle {} reachable", vin);
                    self.metrics.record_probe(true);
                    return Ok(snapshot);
                }
                Err(e) if e.is_retryable() => {
                    error!(
                        "Vehicle {} unreachable: {}. Retrying in {}",
                        vin,
                        e,
                        format_duration(self.schedule.timing.retry_interval)
                    );
                    self.metrics.record_probe(false);
                    let resume_at = after(self.clock.now(), self.schedule.timing.retry_interval);
                    sleep_until(&self.clock, resume_at).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Plan, execute and log one transition
    pub async fn run_cycle(&mut self) -> Result<Outcome> {
        let transition = self.plan()?;
        info!(
            "Next transition: {} at {}, deadline {}",
            transition.kind,
            transition.due_at.with_timezone(&self.schedule.timezone),
            transition.deadline_at.with_timezone(&self.schedule.timezone)
        );

        let outcome = execute(
            &transition,
            &mut self.link,
            &self.schedule.policy,
            &self.schedule.timing,
            &self.clock,
        )
        .await?;

        self.log_outcome(transition.kind, &outcome);

        // Ensure the next plan cannot resolve to the same instant again
        sleep_until(&self.clock, transition.due_at + TimeDelta::seconds(CYCLE_SETTLE_SECS)).await;

        Ok(outcome)
    }

    /// One-shot transition, due now and retried for at most `grace`
    pub async fn run_once(&mut self, kind: TransitionKind, grace: Duration) -> Result<Outcome> {
        let transition = PendingTransition::immediate(kind, self.clock.now(), grace);
        info!(
            "Manual {} with {} grace window",
            kind,
            format_duration(grace)
        );
        let outcome = execute(
            &transition,
            &mut self.link,
            &self.schedule.policy,
            &self.schedule.timing,
            &self.clock,
        )
        .await?;
        self.log_outcome(kind, &outcome);
        Ok(outcome)
    }

    /// Probe the vehicle, then schedule until cancelled or a fatal error occurs
    pub async fn run_forever(&mut self, cancel: CancellationToken) -> Result<()> {
        if self.schedule.windows.is_empty() {
            return Err(Error::config("no charging windows defined"));
        }

        info!(
            "Scheduler started ({} window(s), {})",
            self.schedule.windows.len(),
            self.schedule.timezone
        );

        tokio::select! {
            result = self.run_loop() => result,
            _ = cancel.cancelled() => {
                info!("Scheduler shutting down");
                Ok(())
            }
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        self.wait_for_device().await?;
        loop {
            self.run_cycle().await?;
        }
    }

    fn log_outcome(&self, kind: TransitionKind, outcome: &Outcome) {
        match outcome {
            Outcome::Succeeded => info!("Charging {} succeeded", kind),
            Outcome::SkippedByPolicy(reason) => info!("Charging {} skipped: {}", kind, reason),
            Outcome::DeadlinePassed => error!("Charging {} missed: deadline passed", kind),
        }
        self.metrics.record_outcome(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::driver::testing::FakeVehicle;
    use crate::error::DeviceError;
    use crate::policy::fixtures::{charging_snapshot, policy, ready_snapshot};
    use chrono::NaiveTime;

    fn utc(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, h, m, 0).unwrap()
    }

    fn overnight() -> Vec<TimeWindow> {
        vec![TimeWindow::parse("22:00", "06:00").unwrap()]
    }

    fn schedule(windows: Vec<TimeWindow>) -> Schedule {
        Schedule {
            windows,
            timezone: Tz::UTC,
            policy: policy(&[], 11.0),
            timing: Timing::default(),
        }
    }

    // === format_duration tests ===

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h 0m");
        assert_eq!(format_duration(Duration::from_secs(3660)), "1h 1m");
        assert_eq!(format_duration(Duration::from_secs(1800)), "30m");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m");
    }

    #[test]
    fn test_format_duration_edge_cases() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h 0m");
    }

    // === plan_next_transition tests ===

    #[test]
    fn test_plan_inside_overnight_window_picks_stop() {
        // 23:00 is inside 22:00-06:00: stop tomorrow 06:00 comes before start tomorrow 22:00
        let plan = plan_next_transition(&utc(10, 23, 0), &overnight()).unwrap();
        assert_eq!(plan.kind, TransitionKind::Stop);
        assert_eq!(plan.due_at, utc(11, 6, 0));
        assert_eq!(plan.deadline_at, utc(11, 22, 0));
    }

    #[test]
    fn test_plan_outside_window_picks_start() {
        let plan = plan_next_transition(&utc(10, 12, 0), &overnight()).unwrap();
        assert_eq!(plan.kind, TransitionKind::Start);
        assert_eq!(plan.due_at, utc(10, 22, 0));
        assert_eq!(plan.deadline_at, utc(11, 6, 0));
    }

    #[test]
    fn test_plan_tie_goes_to_stop() {
        // One window stops when another starts
        let windows = vec![
            TimeWindow::parse("08:00", "12:00").unwrap(),
            TimeWindow::parse("12:00", "13:00").unwrap(),
        ];
        let plan = plan_next_transition(&utc(10, 11, 0), &windows).unwrap();
        assert_eq!(plan.kind, TransitionKind::Stop);
        assert_eq!(plan.due_at, utc(10, 12, 0));
        assert_eq!(plan.deadline_at, utc(10, 12, 0));
    }

    #[test]
    fn test_plan_empty_windows_fails() {
        assert!(matches!(
            plan_next_transition(&utc(10, 12, 0), &[]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_plan_deadline_is_other_kind_due() {
        let windows = vec![
            TimeWindow::new(NaiveTime::from_hms_opt(1, 0, 0).unwrap(), NaiveTime::from_hms_opt(5, 0, 0).unwrap()),
            TimeWindow::new(NaiveTime::from_hms_opt(13, 0, 0).unwrap(), NaiveTime::from_hms_opt(15, 0, 0).unwrap()),
        ];
        let now = utc(10, 6, 0);
        let plan = plan_next_transition(&now, &windows).unwrap();
        assert_eq!(plan.kind, TransitionKind::Start);
        assert_eq!(plan.due_at, next_start(&now, &windows).unwrap());
        assert_eq!(plan.deadline_at, next_stop(&now, &windows).unwrap());
    }

    // === Scheduler tests ===

    #[tokio::test]
    async fn test_wait_for_device_retries_until_reachable() {
        let clock = Arc::new(ManualClock::new(utc(10, 12, 0)));
        let vehicle = FakeVehicle::new(ready_snapshot(), clock.clone());
        {
            let mut state = vehicle.state.lock().unwrap();
            state.connect_failures.push_back(DeviceError::Network("down".to_string()));
            state.fetch_failures.push_back(DeviceError::Network("502".to_string()));
        }
        let metrics = Arc::new(HealthMetrics::new());
        let mut scheduler = Scheduler::new(vehicle.link(), clock.clone(), schedule(overnight()))
            .with_metrics(metrics.clone());

        let snapshot = scheduler.wait_for_device().await.unwrap();

        assert_eq!(snapshot, ready_snapshot());
        assert_eq!(clock.now(), utc(10, 12, 10));
        assert!(metrics.status().device_reachable);
    }

    #[tokio::test]
    async fn test_wait_for_device_missing_vehicle_is_fatal() {
        let clock = Arc::new(ManualClock::new(utc(10, 12, 0)));
        let vehicle = FakeVehicle::new(ready_snapshot(), clock.clone());
        vehicle.state.lock().unwrap().snapshot = None;
        let mut scheduler = Scheduler::new(vehicle.link(), clock.clone(), schedule(overnight()));

        let err = scheduler.wait_for_device().await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_run_cycle_starts_at_window_open() {
        let clock = Arc::new(ManualClock::new(utc(10, 12, 0)));
        let vehicle = FakeVehicle::new(ready_snapshot(), clock.clone());
        let mut scheduler = Scheduler::new(vehicle.link(), clock.clone(), schedule(overnight()));

        let outcome = scheduler.run_cycle().await.unwrap();
        assert_eq!(outcome, Outcome::Succeeded);
        assert_eq!(vehicle.commands(), vec![(TransitionKind::Start, utc(10, 22, 0))]);

        let outcome = scheduler.run_cycle().await.unwrap();
        assert_eq!(outcome, Outcome::Succeeded);
        assert_eq!(vehicle.commands()[1], (TransitionKind::Stop, utc(11, 6, 0)));
    }

    #[tokio::test]
    async fn test_run_cycle_tie_does_not_spin() {
        let windows = vec![
            TimeWindow::parse("08:00", "12:00").unwrap(),
            TimeWindow::parse("12:00", "13:00").unwrap(),
        ];
        let clock = Arc::new(ManualClock::new(utc(10, 11, 0)));
        let vehicle = FakeVehicle::new(ready_snapshot(), clock.clone());
        let mut scheduler = Scheduler::new(vehicle.link(), clock.clone(), schedule(windows));

        let first = scheduler.run_cycle().await.unwrap();
        assert_eq!(first, Outcome::DeadlinePassed);
        assert!(clock.now() > utc(10, 12, 0));

        // Next plan has moved on to the 13:00 stop
        let plan = scheduler.plan().unwrap();
        assert_eq!(plan.kind, TransitionKind::Stop);
        assert_eq!(plan.due_at, utc(10, 13, 0));
        assert!(vehicle.commands().is_empty());
    }

    #[tokio::test]
    async fn test_run_once_grace_window() {
        let clock = Arc::new(ManualClock::new(utc(10, 12, 0)));
        let vehicle = FakeVehicle::new(ready_snapshot(), clock.clone());
        vehicle.state.lock().unwrap().obey_commands = false;
        let mut scheduler = Scheduler::new(vehicle.link(), clock.clone(), schedule(overnight()));

        let outcome = scheduler
            .run_once(TransitionKind::Start, Duration::from_secs(15 * 60))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::DeadlinePassed);
        assert!(vehicle
            .commands()
            .iter()
            .all(|(_, at)| *at < utc(10, 12, 15)));
    }

    #[tokio::test]
    async fn test_run_once_start_while_charging_is_idempotent() {
        let clock = Arc::new(ManualClock::new(utc(10, 12, 0)));
        let vehicle = FakeVehicle::new(charging_snapshot(), clock.clone());
        let mut scheduler = Scheduler::new(vehicle.link(), clock.clone(), schedule(overnight()));

        for _ in 0..2 {
            let outcome = scheduler
                .run_once(TransitionKind::Start, Duration::from_secs(15 * 60))
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::Succeeded);
        }

        assert!(vehicle.commands().is_empty());
        assert_eq!(clock.now(), utc(10, 12, 0));
    }

    #[tokio::test]
    async fn test_run_once_huge_grace_does_not_overflow() {
        let clock = Arc::new(ManualClock::new(utc(10, 12, 0)));
        let vehicle = FakeVehicle::new(ready_snapshot(), clock.clone());
        let mut scheduler = Scheduler::new(vehicle.link(), clock.clone(), schedule(overnight()));

        let outcome = scheduler
            .run_once(TransitionKind::Start, Duration::from_secs(u64::MAX))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Succeeded);
        assert_eq!(vehicle.commands(), vec![(TransitionKind::Start, utc(10, 12, 0))]);
    }

    #[tokio::test]
    async fn test_run_forever_rejects_empty_schedule() {
        let clock = Arc::new(ManualClock::new(utc(10, 12, 0)));
        let vehicle = FakeVehicle::new(ready_snapshot(), clock.clone());
        let mut scheduler = Scheduler::new(vehicle.link(), clock.clone(), schedule(Vec::new()));

        let err = scheduler.run_forever(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(vehicle.state.lock().unwrap().connects, 0);
    }

    #[tokio::test]
    async fn test_run_forever_stops_when_cancelled() {
        let clock = Arc::new(ManualClock::new(utc(10, 12, 0)));
        let vehicle = FakeVehicle::new(ready_snapshot(), clock.clone());
        let mut scheduler = Scheduler::new(vehicle.link(), clock.clone(), schedule(overnight()));

        let cancel = CancellationToken::new();
        cancel.cancel();
        scheduler.run_forever(cancel).await.unwrap();
    }
}
