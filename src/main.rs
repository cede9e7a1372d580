use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use peakcharge::cli::{self, Command};
use peakcharge::clock::{Clock, SystemClock};
use peakcharge::config::Config;
use peakcharge::device::{HttpDevice, TransitionKind, VehicleLink};
use peakcharge::health::{self, HealthMetrics};
use peakcharge::redact;
use peakcharge::scheduler::{Schedule, Scheduler};
use peakcharge::status;

/// Stdout always; a plain-text copy to `log_file` when configured
fn init_logging(log_file: Option<&str>) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("peakcharge=info".parse()?);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file '{}'", path))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Log a fatal error and exit non-zero
fn fail(e: impl std::fmt::Display) -> ! {
    error!("{}", e);
    std::process::exit(1);
}

fn vehicle_link(config: &Config) -> peakcharge::error::Result<VehicleLink<HttpDevice>> {
    let vin = config.require_vin()?;
    let device = HttpDevice::new(&config.api_url)?;
    Ok(VehicleLink::new(device, config.credentials.clone(), vin))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}\n", e);
            cli::print_help();
            std::process::exit(2);
        }
    };

    if args.help {
        cli::print_help();
        return Ok(());
    }

    let config = Config::from_env(args.env_file.as_deref());
    init_logging(config.as_ref().ok().and_then(|c| c.log_file.as_deref()))?;

    info!("peakcharge v{}", env!("CARGO_PKG_VERSION"));

    let config = config.unwrap_or_else(|e| fail(e));
    info!("Configuration loaded");
    info!("  Account: {}", redact::email(&config.credentials.login));
    if let Some(vin) = &config.vin {
        info!("  Vehicle: {}", redact::vin(vin));
    }
    info!("  Bridge: {}", config.api_url);
    info!("  Time zone: {}", config.timezone);
    for window in &config.windows {
        info!("  Charging window: {}", window);
    }

    // Handle --validate mode
    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => fail(e),
        }
    }

    match args.command {
        Command::Run => run(config).await,
        Command::Status => show_status(&config).await,
        Command::Scan => scan(&config).await,
        Command::Start => run_once(&config, TransitionKind::Start, args.grace).await,
        Command::Stop => run_once(&config, TransitionKind::Stop, args.grace).await,
    }
}

async fn run(config: Config) -> Result<()> {
    if let Err(e) = config.validate() {
        fail(e);
    }
    let link = vehicle_link(&config).unwrap_or_else(|e| fail(e));

    let health_metrics = Arc::new(HealthMetrics::new());
    let cancel = CancellationToken::new();

    // Start health check server if configured
    if let Some(port) = config.health_port {
        let metrics = health_metrics.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            health::run_health_server(port, metrics, cancel).await;
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                cancel.cancel();
            }
        });
    }

    let mut scheduler = Scheduler::new(link, SystemClock, Schedule::from_config(&config))
        .with_metrics(health_metrics);
    let result = scheduler.run_forever(cancel.clone()).await;
    cancel.cancel();

    if let Err(e) = result {
        fail(e);
    }
    info!("Scheduler stopped");
    Ok(())
}

async fn show_status(config: &Config) -> Result<()> {
    let mut link = vehicle_link(config).unwrap_or_else(|e| fail(e));
    let snapshot = match status::query_status(&mut link).await {
        Ok(snapshot) => snapshot,
        Err(e) => fail(e),
    };

    let now = SystemClock.now();
    println!("As of {}", status::format_as_of(now, &config.timezone));
    print!(
        "{}",
        status::format_status(
            link.vin(),
            &snapshot,
            &config.policy,
            &config.windows,
            &now.with_timezone(&config.timezone),
        )
    );
    Ok(())
}

async fn scan(config: &Config) -> Result<()> {
    let device = HttpDevice::new(&config.api_url).unwrap_or_else(|e| fail(e));
    // Scanning needs no vehicle; the link's VIN is never used
    let mut link = VehicleLink::new(
        device,
        config.credentials.clone(),
        config.vin.clone().unwrap_or_default(),
    );
    match status::scan(&mut link).await {
        Ok(vehicles) => {
            info!("Found {} vehicle(s)", vehicles.len());
            print!("{}", status::format_vehicles(&vehicles));
            Ok(())
        }
        Err(e) => fail(e),
    }
}

async fn run_once(
    config: &Config,
    kind: TransitionKind,
    grace: Option<std::time::Duration>,
) -> Result<()> {
    let link = vehicle_link(config).unwrap_or_else(|e| fail(e));
    let mut scheduler = Scheduler::new(link, SystemClock, Schedule::from_config(config));

    match scheduler.run_once(kind, grace.unwrap_or(config.grace)).await {
        Ok(outcome) => {
            println!("{}: {}", kind, outcome);
            Ok(())
        }
        Err(e) => fail(e),
    }
}
