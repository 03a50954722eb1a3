//! lmapd - LMAP measurement agent daemon
//!
//! Loads the declarative LMAP configuration, arms the event timers and
//! runs the scheduler loop until told to stop. The control surface is
//! host signals plus the pid and status files in the run directory; the
//! companion `lmapctl` tool wraps both.

use anyhow::{bail, Context, Result};
use clap::Parser;
use lmap_lib::model::{Capability, Lmap};
use lmap_lib::runner::{disable_pipelined_schedules, Runner, SchedulerRequest};
use lmap_lib::{dispatch, pidfile, signals, validate, xmlio, Workspace};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const LMAPD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// LMAP measurement agent daemon
#[derive(Parser)]
#[command(name = "lmapd", about = "LMAP measurement agent daemon", disable_version_flag = true)]
struct Cli {
    /// Fork into the background (daemonise)
    #[arg(short = 'f')]
    daemonize: bool,

    /// Parse the configuration, render it as config XML and exit
    #[arg(short = 'n')]
    noop: bool,

    /// Parse the configuration, render it as state XML and exit
    #[arg(short = 's')]
    state: bool,

    /// Wipe the queue workspace before starting
    #[arg(short = 'z')]
    zap: bool,

    /// Path to the queue directory
    #[arg(short = 'q', value_name = "DIR")]
    queue: Option<PathBuf>,

    /// Path to the configuration file or directory
    #[arg(short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to the run directory (pid file and status file)
    #[arg(short = 'r', value_name = "DIR")]
    run: Option<PathBuf>,

    /// Show version information and exit
    #[arg(short = 'v')]
    version: bool,
}

fn software_magic() -> String {
    format!("lmapd {LMAPD_VERSION}")
}

/// Reads and validates the configuration, stamping the capabilities and
/// the agent start time. On any failure the partial tree is discarded.
fn read_config(config_path: &std::path::Path) -> Result<Lmap> {
    let mut lmap = Lmap::new();
    xmlio::parse_config_path(&mut lmap, config_path)?;

    let capability = lmap.capabilities.get_or_insert_with(Capability::default);
    capability.version = Some(format!("lmapd version {LMAPD_VERSION}"));
    capability.add_system_tags();

    if let Some(agent) = lmap.agent.as_mut() {
        agent.last_started = Some(chrono_now());
    }

    validate::validate(&lmap)?;
    disable_pipelined_schedules(&mut lmap);
    Ok(lmap)
}

fn chrono_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Re-executes the daemon as a detached child and leaves the foreground
/// process. The child inherits every flag except `-f`.
fn daemonize() -> Result<()> {
    let exe = std::env::current_exe().context("cannot resolve own executable")?;
    let args: Vec<String> = std::env::args().skip(1).filter(|a| a != "-f").collect();
    std::process::Command::new(exe)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to fork into the background")?;
    std::process::exit(0);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("lmapd version {LMAPD_VERSION}");
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let defaults = config::DaemonConfig::load()?;
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(&defaults.config_path));
    let queue_path = cli
        .queue
        .unwrap_or_else(|| PathBuf::from(&defaults.queue_path));
    let run_path = cli.run.unwrap_or_else(|| PathBuf::from(&defaults.run_path));

    if cli.noop || cli.state {
        let lmap = read_config(&config_path)?;
        if cli.noop {
            print!("{}", xmlio::render_config(&lmap)?);
        }
        if cli.state {
            print!("{}", xmlio::render_state(&lmap)?);
        }
        return Ok(());
    }

    let workspace = Workspace::new(&queue_path, software_magic());
    if cli.zap {
        if let Err(e) = workspace.clean_all() {
            warn!(error = %e, "workspace wipe failed");
        }
    }

    if cli.daemonize {
        daemonize()?;
    }

    signals::ignore_sigpipe();

    if let Some(pid) = pidfile::read(&run_path) {
        bail!("lmapd already running (pid {pid})?");
    }
    pidfile::write(&run_path)?;
    info!(version = LMAPD_VERSION, "starting lmapd");

    let exit = run_daemon(&config_path, &workspace, &run_path).await;

    if pidfile::check(&run_path) {
        let _ = pidfile::remove(&run_path);
    }
    exit
}

/// The run/reload shell around the scheduler loop.
async fn run_daemon(
    config_path: &std::path::Path,
    workspace: &Workspace,
    run_path: &std::path::Path,
) -> Result<()> {
    loop {
        let mut lmap = read_config(config_path).context("configuration is invalid")?;
        if let Err(e) = workspace.init(&mut lmap) {
            warn!(error = %e, "workspace initialisation incomplete");
        }

        let (fire_tx, fire_rx) = mpsc::channel(64);
        let (req_tx, req_rx) = mpsc::channel::<SchedulerRequest>(16);

        let timer_handles = dispatch::arm_events(&lmap, &fire_tx);
        let signal_handle = signals::spawn_signal_frontend(req_tx)?;

        let runner = Runner::new(lmap, workspace.clone(), run_path, fire_rx, req_rx);
        let outcome = runner.run().await;

        for handle in timer_handles {
            handle.abort();
        }
        signal_handle.abort();

        if !outcome.restart {
            info!("lmapd shutting down");
            return Ok(());
        }

        // pause briefly so a broken configuration cannot spin the reload
        info!("reloading configuration");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
