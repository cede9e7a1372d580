//! Read-only status and scan reports

use chrono::{DateTime, TimeZone, Utc};
use std::fmt::Write;

use crate::device::{ChargeDevice, DeviceSnapshot, TransitionKind, VehicleLink, VehicleSummary};
use crate::error::Result;
use crate::policy::{should_skip, PolicyConfig};
use crate::redact;
use crate::window::{next_start, next_stop, TimeWindow};

/// Fetch a fresh snapshot; never schedules or sends commands
pub async fn query_status<D: ChargeDevice>(link: &mut VehicleLink<D>) -> Result<DeviceSnapshot> {
    link.refresh().await?;
    link.snapshot().await
}

/// Vehicles visible on the account
pub async fn scan<D: ChargeDevice>(link: &mut VehicleLink<D>) -> Result<Vec<VehicleSummary>> {
    link.refresh().await?;
    link.list_vehicles().await
}

fn decision(kind: TransitionKind, snapshot: &DeviceSnapshot, policy: &PolicyConfig) -> String {
    if kind == TransitionKind::Start && snapshot.is_charging() {
        return "already charging".to_string();
    }
    match should_skip(kind, Some(snapshot), policy) {
        Some(reason) => format!("skip ({})", reason),
        None => "allowed".to_string(),
    }
}

/// Human-readable report of a snapshot, what each transition would do now,
/// and when the next ones are due
pub fn format_status<Z: TimeZone>(
    vin: &str,
    snapshot: &DeviceSnapshot,
    policy: &PolicyConfig,
    windows: &[TimeWindow],
    now: &DateTime<Z>,
) -> String
where
    Z::Offset: std::fmt::Display,
{
    let mut out = String::new();
    let _ = writeln!(out, "Vehicle:            {}", redact::vin(vin));
    let _ = writeln!(out, "Plug:               {:?}", snapshot.plug);
    let _ = writeln!(out, "Charging state:     {:?}", snapshot.charging);
    let _ = writeln!(out, "Charge type:        {:?}", snapshot.charge_type);
    let _ = writeln!(out, "Charge power:       {:.1} kW", snapshot.charge_power_kw);
    let _ = writeln!(
        out,
        "State of charge:    {}% (target {}%)",
        snapshot.current_soc_pct, snapshot.target_soc_pct
    );
    let _ = writeln!(out, "Target temperature: {:.1} °C", snapshot.target_temperature_c);
    let _ = writeln!(
        out,
        "Start now:          {}",
        decision(TransitionKind::Start, snapshot, policy)
    );
    let _ = writeln!(
        out,
        "Stop now:           {}",
        decision(TransitionKind::Stop, snapshot, policy)
    );

    if windows.is_empty() {
        let _ = writeln!(out, "Windows:            none configured");
        return out;
    }

    let list: Vec<String> = windows.iter().map(ToString::to_string).collect();
    let _ = writeln!(out, "Windows:            {}", list.join(", "));
    if let (Ok(start), Ok(stop)) = (next_start(now, windows), next_stop(now, windows)) {
        let _ = writeln!(out, "Next start:         {}", start.format("%Y-%m-%d %H:%M %Z"));
        let _ = writeln!(out, "Next stop:          {}", stop.format("%Y-%m-%d %H:%M %Z"));
    }
    out
}

/// One line per vehicle, for `scan`
pub fn format_vehicles(vehicles: &[VehicleSummary]) -> String {
    if vehicles.is_empty() {
        return "No vehicles on this account\n".to_string();
    }
    let mut out = String::new();
    for vehicle in vehicles {
        let _ = write!(out, "{}", vehicle.vin);
        if let Some(nickname) = &vehicle.nickname {
            let _ = write!(out, "  {}", nickname);
        }
        if let Some(model) = &vehicle.model {
            let _ = write!(out, "  ({})", model);
        }
        out.push('\n');
    }
    out
}

/// Timestamp shown in the status header
pub fn format_as_of(now: DateTime<Utc>, tz: &chrono_tz::Tz) -> String {
    now.with_timezone(tz).format("%Y-%m-%d %H:%M:%S %Z").to_string()
}
