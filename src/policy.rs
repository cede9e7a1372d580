//! Skip rules for scheduled transitions
//!
//! A transition is skipped when any rule matches. The first matching rule,
//! in the fixed order below, is the reason reported.
//!
//! Start is skipped when the target temperature is on the ignore list, the
//! plug is not connected, the car is not ready for charging, or the battery
//! is already at its target charge.
//!
//! Stop is skipped when the target temperature is on the ignore list, the
//! plug is not connected, the car is not charging, the charge is not AC, or
//! the charge power exceeds the configured minimum (a fast charge is never
//! interrupted).

use std::fmt;

use crate::device::{ChargeType, ChargingState, DeviceSnapshot, PlugState, TransitionKind};

/// Thresholds read from configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyConfig {
    /// Exact-match target temperatures that disable scheduling
    pub ignore_temperatures: Vec<f64>,
    /// Charge power above which a running charge is left alone
    pub ignore_min_power_kw: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    SnapshotUnavailable,
    IgnoredTemperature(f64),
    PlugNotConnected(PlugState),
    NotReadyForCharging(ChargingState),
    TargetSocReached { current: u8, target: u8 },
    NotCharging(ChargingState),
    NotAcCharge(ChargeType),
    PowerAboveThreshold { power_kw: f64, threshold_kw: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SnapshotUnavailable => write!(f, "snapshot unavailable"),
            SkipReason::IgnoredTemperature(t) => {
                write!(f, "target temperature {}°C is on the ignore list", t)
            }
            SkipReason::PlugNotConnected(state) => write!(f, "plug not connected ({:?})", state),
            SkipReason::NotReadyForCharging(state) => {
                write!(f, "not ready for charging ({:?})", state)
            }
            SkipReason::TargetSocReached { current, target } => {
                write!(f, "battery at {}% already reached target {}%", current, target)
            }
            SkipReason::NotCharging(state) => write!(f, "not charging ({:?})", state),
            SkipReason::NotAcCharge(kind) => write!(f, "charge type is {:?}, not AC", kind),
            SkipReason::PowerAboveThreshold {
                power_kw,
                threshold_kw,
            } => write!(
                f,
                "charge power {} kW exceeds {} kW threshold",
                power_kw, threshold_kw
            ),
        }
    }
}

fn temperature_ignored(snapshot: &DeviceSnapshot, policy: &PolicyConfig) -> Option<SkipReason> {
    policy
        .ignore_temperatures
        .iter()
        .any(|t| *t == snapshot.target_temperature_c)
        .then_some(SkipReason::IgnoredTemperature(snapshot.target_temperature_c))
}

fn plug_disconnected(snapshot: &DeviceSnapshot) -> Option<SkipReason> {
    (snapshot.plug != PlugState::Connected).then_some(SkipReason::PlugNotConnected(snapshot.plug))
}

/// Battery is at or above its target charge
#[inline]
pub fn target_reached(current_pct: u8, target_pct: u8) -> bool {
    current_pct >= target_pct
}

/// Power strictly above the threshold; equality does not count
#[inline]
pub fn exceeds_threshold(power_kw: f64, threshold_kw: f64) -> bool {
    power_kw > threshold_kw
}

pub fn should_skip_start(snapshot: Option<&DeviceSnapshot>, policy: &PolicyConfig) -> Option<SkipReason> {
    let Some(snapshot) = snapshot else {
        return Some(SkipReason::SnapshotUnavailable);
    };

    temperature_ignored(snapshot, policy)
        .or_else(|| plug_disconnected(snapshot))
        .or_else(|| {
            (snapshot.charging != ChargingState::ReadyForCharging)
                .then_some(SkipReason::NotReadyForCharging(snapshot.charging))
        })
        .or_else(|| {
            target_reached(snapshot.current_soc_pct, snapshot.target_soc_pct).then_some(
                SkipReason::TargetSocReached {
                    current: snapshot.current_soc_pct,
                    target: snapshot.target_soc_pct,
                },
            )
        })
}

pub fn should_skip_stop(snapshot: Option<&DeviceSnapshot>, policy: &PolicyConfig) -> Option<SkipReason> {
    let Some(snapshot) = snapshot else {
        return Some(SkipReason::SnapshotUnavailable);
    };

    temperature_ignored(snapshot, policy)
        .or_else(|| plug_disconnected(snapshot))
        .or_else(|| {
            (!snapshot.is_charging()).then_some(SkipReason::NotCharging(snapshot.charging))
        })
        .or_else(|| {
            (snapshot.charge_type != ChargeType::Ac)
                .then_some(SkipReason::NotAcCharge(snapshot.charge_type))
        })
        .or_else(|| {
            exceeds_threshold(snapshot.charge_power_kw, policy.ignore_min_power_kw).then_some(
                SkipReason::PowerAboveThreshold {
                    power_kw: snapshot.charge_power_kw,
                    threshold_kw: policy.ignore_min_power_kw,
                },
            )
        })
}

pub fn should_skip(
    kind: TransitionKind,
    snapshot: Option<&DeviceSnapshot>,
    policy: &PolicyConfig,
) -> Option<SkipReason> {
    match kind {
        TransitionKind::Start => should_skip_start(snapshot, policy),
        TransitionKind::Stop => should_skip_stop(snapshot, policy),
    }
}




/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    /// Proves: equal state of charge counts as reached
    #[kani::proof]
    fn soc_equal_is_reached() {
        let pct: u8 = kani::any();
        kani::assert(target_reached(pct, pct), "equal SoC must count as reached");
    }

    /// Proves: below target is never reached
    #[kani::proof]
    fn soc_below_target_not_reached() {
        let current: u8 = kani::any();
        let target: u8 = kani::any();
        kani::assume(current < target);
        kani::assert(!target_reached(current, target), "below target must not count");
    }

    /// Proves: power equal to the threshold never exceeds it
    #[kani::proof]
    fn power_equal_not_exceeding() {
        let power: f64 = kani::any();
        kani::assume(power.is_finite());
        kani::assert(!exceeds_threshold(power, power), "equality must not exceed");
    }
}
