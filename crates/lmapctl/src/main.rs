//! lmapctl - control tool for the LMAP measurement agent daemon
//!
//! Talks to a running daemon exclusively through signals and the files in
//! its run directory, and renders configuration and report documents from
//! the same sources the daemon uses.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{control, report, status};
use output::{print_error, ReportFormat};
use std::path::PathBuf;

const LMAPCTL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Control tool for the LMAP measurement agent daemon
#[derive(Parser)]
#[command(name = "lmapctl", about = "Control tool for the LMAP measurement agent daemon", disable_version_flag = true)]
struct Cli {
    /// Path to the configuration file or directory
    #[arg(short = 'c', value_name = "PATH", default_value = "/etc/lmapd")]
    config: PathBuf,

    /// Path to the run directory (pid file and status file)
    #[arg(short = 'r', value_name = "DIR", default_value = "/var/run/lmapd")]
    run: PathBuf,

    /// Change into this directory before executing the command
    #[arg(short = 'C', value_name = "DIR")]
    chdir: Option<PathBuf>,

    /// Use JSON format when generating output
    #[arg(short = 'j')]
    json: bool,

    /// Use XML format when generating output (default)
    #[arg(short = 'x')]
    xml: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean the workspace (be careful!)
    Clean,
    /// Validate and render the lmap configuration
    Config,
    /// Reload the lmap configuration
    Reload,
    /// Report collected measurement data
    Report,
    /// Test if the lmap daemon is running
    Running,
    /// Shutdown the lmap daemon
    Shutdown,
    /// Show status information
    Status,
    /// Validate the lmap configuration
    Validate,
    /// Show version information
    Version,
}

fn run(cli: Cli) -> Result<()> {
    if let Some(dir) = &cli.chdir {
        std::env::set_current_dir(dir)?;
    }
    let format = if cli.xml {
        ReportFormat::Xml
    } else if cli.json {
        ReportFormat::Json
    } else {
        ReportFormat::Xml
    };

    match cli.command {
        Commands::Clean => control::clean(&cli.run),
        Commands::Config => report::config(&cli.config, format),
        Commands::Reload => control::reload(&cli.run),
        Commands::Report => report::report(&cli.config, format),
        Commands::Running => {
            if !control::running(&cli.run) {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Shutdown => control::shutdown(&cli.run),
        Commands::Status => status::status(&cli.run),
        Commands::Validate => report::validate_config(&cli.config),
        Commands::Version => {
            println!("lmapctl version {LMAPCTL_VERSION}");
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
