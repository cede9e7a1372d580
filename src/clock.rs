/// Wall-clock access and re-evaluating waits
///
/// Waits never sleep once for the full interval. Each slice recomputes the time
/// remaining against the wall clock, so DST changes and clock adjustments are
/// picked up within one slice.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Longest single sleep before the remaining time is recomputed
pub const MAX_SLEEP_SLICE: Duration = Duration::from_secs(15 * 60);

#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Real time: `Utc::now` and tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Time left until `target`, or None if it has been reached
pub fn remaining(now: DateTime<Utc>, target: DateTime<Utc>) -> Option<Duration> {
    if now >= target {
        return None;
    }
    (target - now).to_std().ok().filter(|d| !d.is_zero())
}

/// `now + by`, saturating at the latest representable instant
pub fn after(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Suspend until the clock reads `target` or later
pub async fn sleep_until<C: Clock>(clock: &C, target: DateTime<Utc>) {
    while let Some(left) = remaining(clock.now(), target) {
        let slice = left.min(MAX_SLEEP_SLICE);
        debug!("Sleeping {:?} ({:?} remaining)", slice, left);
        clock.sleep(slice).await;
    }
}

/// Clock that only moves when slept on or advanced explicitly
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    slept: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            slept: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now = after(*now, by);
        }
    }

    /// Move the clock to an arbitrary instant, backwards included
    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    /// Total time spent in `sleep`
    pub fn slept(&self) -> Duration {
        self.slept.lock().map(|s| *s).unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        if let Ok(mut slept) = self.slept.lock() {
            *slept += duration;
        }
        tokio::task::yield_now().await;
    }
}

impl<C: Clock> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}

impl<C: Clock> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}
