use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crondog::pidfile::{self, PidFile};
use crondog::{
    group_services, shutdown, Crontab, CrondogConfig, CrondogError, Result, SupervisionState,
    Supervisor, TransitionEvent,
};

#[derive(Parser)]
#[command(
    name = "crondog",
    version,
    about = "Supervise services that crontab starts and stops"
)]
struct Cli {
    /// Path to the HCL config file
    #[arg(short, long, default_value = "crondog.hcl")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise services until interrupted
    Run {
        /// Supervise only these services
        #[arg(short, long = "service")]
        services: Vec<String>,
        /// Read this crontab-format file instead of the configured source
        #[arg(long)]
        crontab: Option<PathBuf>,
        /// Run as background daemon (detach from terminal)
        #[arg(short, long)]
        detach: bool,
    },
    /// Evaluate every service once and print its state
    Check {
        /// Check only these services
        #[arg(short, long = "service")]
        services: Vec<String>,
        #[arg(long)]
        crontab: Option<PathBuf>,
        /// Print transition events as JSON
        #[arg(long)]
        json: bool,
    },
    /// List crontab jobs with their next occurrence
    List {
        #[arg(long)]
        crontab: Option<PathBuf>,
    },
    /// Stop a running supervisor
    Stop,
    /// Validate the config file without supervising anything
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = CrondogConfig::load(&cli.config);

    // Only the long-running command logs at the configured level
    let (log_level, log_dir) = match (&cli.command, &cfg) {
        (Commands::Run { detach: false, .. }, Ok(cfg)) => (
            cfg.supervisor.log_level.clone(),
            cfg.supervisor.log_dir(),
        ),
        _ => ("warn".to_string(), None),
    };
    if let Err(e) = init_tracing(&log_level, log_dir.as_deref()) {
        eprintln!("{} cannot set up logging: {e}", "[crondog]".red().bold());
    }

    let result = match cfg {
        Ok(cfg) => run(cli, cfg).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        eprintln!("{} {e}", "[crondog]".red().bold());
        std::process::exit(1);
    }
}

/// Console logging, plus a plain-text `<log_dir>/crondog.log` when configured
fn init_tracing(level: &str, log_dir: Option<&Path>) -> Result<()> {
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, "crondog.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = GUARD.set(guard);
            Some(fmt::layer().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    Ok(())
}

async fn run(cli: Cli, cfg: CrondogConfig) -> Result<()> {
    match &cli.command {
        Commands::Run {
            services,
            crontab,
            detach,
        } => {
            if *detach {
                // Re-launch self as background daemon, dropping --detach flag
                let exe = std::env::current_exe()
                    .map_err(|e| CrondogError::Config(format!("cannot find self: {e}")))?;
                let mut args: Vec<String> =
                    vec!["--config".into(), cli.config.display().to_string(), "run".into()];
                for name in services {
                    args.push("--service".into());
                    args.push(name.clone());
                }
                if let Some(path) = crontab {
                    args.push("--crontab".into());
                    args.push(path.display().to_string());
                }

                background_command(&exe, &args)
                    .spawn()
                    .map_err(|e| CrondogError::Config(format!("failed to daemonize: {e}")))?;

                println!("{} crondog started in background", "✓".green());
                println!("  run {} to check services", "crondog check".cyan());
                println!("  run {} to stop", "crondog stop".cyan());
                return Ok(());
            }

            let working_dir = cfg.supervisor.working_dir();
            let lock = PidFile::acquire(&working_dir)?;
            let (mut sup, _) = Supervisor::from_config(&cfg, crontab.as_deref(), services)?;

            println!(
                "{} supervising every {:?} (pid file {})",
                "→".cyan(),
                sup.poll_interval(),
                lock.path().display()
            );
            sup.run(shutdown::shutdown_signal()).await;
            println!("{} stopped", "✓".green());
        }

        Commands::Check {
            services,
            crontab,
            json,
        } => {
            let (mut sup, _) = Supervisor::from_config(&cfg, crontab.as_deref(), services)?;
            let now = cfg.supervisor.clock.now();
            let events = sup.tick_at(now).await;

            if *json {
                let out = serde_json::to_string_pretty(&events)
                    .map_err(|e| CrondogError::Config(format!("cannot encode events: {e}")))?;
                println!("{out}");
                return Ok(());
            }

            let source = cfg.supervisor.crontab_source(crontab.as_deref());
            let schedules = group_services(Crontab::load(source.as_ref()).await?.jobs());

            println!(
                "{:<16} {:<12} {:<10} {:<8} {:<9} {:<17} {}",
                "SERVICE".bold(),
                "STATE".bold(),
                "SHOULD".bold(),
                "ALIVE".bold(),
                "STARTING".bold(),
                "NEXT START".bold(),
                "NEXT STOP".bold(),
            );
            println!("{}", "─".repeat(88).dimmed());
            for (name, state) in sup.states() {
                let event = events.iter().find(|e| &e.service == name);
                let flag = |f: fn(&TransitionEvent) -> bool| {
                    event
                        .map(|e| if f(e) { "yes" } else { "no" })
                        .unwrap_or("-")
                };
                let (next_start, next_stop) = match schedules.get(name) {
                    Some(s) => (
                        format_next(s.next_start(now).ok()),
                        format_next(s.next_stop(now).ok()),
                    ),
                    None => ("-".to_string(), "-".to_string()),
                };
                println!(
                    "{:<16} {:<20} {:<10} {:<8} {:<9} {:<17} {}",
                    name,
                    colored_state(*state, event.is_some()),
                    flag(|e| e.should_run),
                    flag(|e| e.is_running),
                    flag(|e| e.is_starting),
                    next_start,
                    next_stop,
                );
            }
        }

        Commands::List { crontab } => {
            let source = cfg.supervisor.crontab_source(crontab.as_deref());
            let tab = Crontab::load(source.as_ref()).await?;
            let now = cfg.supervisor.clock.now();

            println!("{} {}", "crontab".bold(), source.describe().dimmed());
            for job in tab.jobs() {
                let next = format_next(job.next_occurrence(now).ok());
                println!(
                    "  {:<16} {:<13} {:<16} {}",
                    job.expression().as_str(),
                    job.name().unwrap_or("-").cyan(),
                    job.role().label(),
                    next,
                );
                println!("    {}", job.expression().describe().dimmed());
            }
            for bad in tab.rejected() {
                println!(
                    "  {} line {}: {} ({})",
                    "✗".red(),
                    bad.line_number,
                    bad.text,
                    bad.error
                );
            }
        }

        Commands::Stop => {
            let pid = pidfile::signal_stop(&cfg.supervisor.working_dir())?;
            println!("{} sent stop to crondog (pid {pid})", "✓".green());
        }

        Commands::Validate => {
            let cfg = CrondogConfig::from_file(&cli.config)?;
            let s = &cfg.supervisor;
            println!(
                "{} {} is valid ({} services)",
                "✓".green(),
                cli.config.display(),
                cfg.service.len()
            );
            println!(
                "  poll {:?}, grace {:?}, probe timeout {:?}, lookback {:?}",
                s.poll_interval, s.grace_period, s.probe_timeout, s.lookback
            );
            println!("  crontab: {}", s.crontab.dimmed());
            for name in cfg.service.keys() {
                println!("  {} probe={:?}", name.cyan(), cfg.probe_for(name));
            }
        }
    }

    Ok(())
}

/// `program` with no stdio, leading its own process group so a terminal
/// hangup does not reach it
fn background_command(program: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd
}

fn colored_state(state: SupervisionState, evaluated: bool) -> String {
    if !evaluated {
        return format!("{state}?").dimmed().to_string();
    }
    let label = state.label();
    match state {
        SupervisionState::Running => label.green().to_string(),
        SupervisionState::Starting => label.yellow().to_string(),
        SupervisionState::Down | SupervisionState::Undefined => label.red().to_string(),
        SupervisionState::Stopped => label.dimmed().to_string(),
    }
}

fn format_next(at: Option<NaiveDateTime>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".into())
}
