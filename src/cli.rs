//! Command-line argument parsing for peakcharge

use std::path::PathBuf;
use std::time::Duration;

use crate::config::MAX_GRACE_MINUTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    /// Schedule charging forever
    #[default]
    Run,
    /// Print the current vehicle state
    Status,
    /// List vehicles on the account
    Scan,
    /// Start charging now
    Start,
    /// Stop charging now
    Stop,
}

/// Parse command line arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub command: Command,
    pub validate: bool,
    pub help: bool,
    /// Overrides GRACE_MINUTES for start/stop
    pub grace: Option<Duration>,
    pub env_file: Option<PathBuf>,
}

pub fn parse_args() -> Result<Args, String> {
    parse_args_from(std::env::args().skip(1))
}

pub fn parse_args_from<I, S>(args: I) -> Result<Args, String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut result = Args::default();
    let mut command: Option<Command> = None;
    let mut args = args.into_iter().map(Into::into);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            "--grace" => {
                let value = args.next().ok_or("--grace requires a number of minutes")?;
                let minutes: u64 = value
                    .parse()
                    .map_err(|_| format!("--grace must be a whole number of minutes, got '{}'", value))?;
                if minutes == 0 {
                    return Err("--grace must be at least 1 minute".to_string());
                }
                if minutes > MAX_GRACE_MINUTES {
                    return Err(format!(
                        "--grace must be at most {} minutes, got {}",
                        MAX_GRACE_MINUTES, minutes
                    ));
                }
                result.grace = Some(Duration::from_secs(minutes * 60));
            }
            "--env-file" => {
                let path = args.next().ok_or("--env-file requires a path")?;
                result.env_file = Some(PathBuf::from(path));
            }
            other if other.starts_with('-') => return Err(format!("unknown option '{}'", other)),
            other => {
                if command.is_some() {
                    return Err(format!("unexpected argument '{}'", other));
                }
                command = Some(match other {
                    "run" => Command::Run,
                    "status" => Command::Status,
                    "scan" => Command::Scan,
                    "start" => Command::Start,
                    "stop" => Command::Stop,
                    _ => return Err(format!("unknown command '{}'", other)),
                });
            }
        }
    }

    result.command = command.unwrap_or_default();
    if result.grace.is_some() && !matches!(result.command, Command::Start | Command::Stop) {
        return Err("--grace only applies to start and stop".to_string());
    }
    Ok(result)
}

pub fn print_help() {
    println!("peakcharge - Off-peak EV charging scheduler\n");
    println!("USAGE:");
    println!("    peakcharge [COMMAND] [OPTIONS]\n");
    println!("COMMANDS:");
    println!("    run                     Start and stop charging on schedule (default)");
    println!("    status                  Show the vehicle's charging state and exit");
    println!("    scan                    List vehicles on the account and exit");
    println!("    start                   Start charging now, retrying within the grace window");
    println!("    stop                    Stop charging now, retrying within the grace window\n");
    println!("OPTIONS:");
    println!("    --grace MINUTES         Grace window for start/stop (default: GRACE_MINUTES or 15)");
    println!("    --env-file PATH         Read configuration from PATH instead of .env");
    println!("    --validate              Validate configuration and exit");
    println!("    --help, -h              Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    See .env.example for required configuration variables");
}
