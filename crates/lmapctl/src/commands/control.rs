//! Commands that drive the daemon through signals
//!
//! The daemon's entire control surface is the pid file plus host signals,
//! so these commands stay deliberately small: resolve the pid, deliver
//! the signal, report the outcome.

use anyhow::{bail, Context, Result};
use lmap_lib::pidfile;
use std::path::Path;

fn signal_name(signal: i32) -> &'static str {
    match signal {
        libc::SIGTERM => "SIGTERM",
        libc::SIGHUP => "SIGHUP",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGUSR2 => "SIGUSR2",
        _ => "signal",
    }
}

/// Resolves the daemon pid and delivers one signal to it.
pub fn signal_daemon(run_path: &Path, signal: i32) -> Result<u32> {
    let pid = pidfile::read(run_path).context("failed to obtain PID of lmapd")?;
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc != 0 {
        bail!(
            "failed to send {} to process {pid}",
            signal_name(signal)
        );
    }
    Ok(pid)
}

/// `clean`: ask the daemon to wipe and re-initialise its workspace.
pub fn clean(run_path: &Path) -> Result<()> {
    signal_daemon(run_path, libc::SIGUSR2)?;
    Ok(())
}

/// `reload`: ask the daemon to reload its configuration.
pub fn reload(run_path: &Path) -> Result<()> {
    signal_daemon(run_path, libc::SIGHUP)?;
    Ok(())
}

/// `shutdown`: ask the daemon to terminate.
pub fn shutdown(run_path: &Path) -> Result<()> {
    signal_daemon(run_path, libc::SIGTERM)?;
    Ok(())
}

/// `running`: success iff a daemon owns the pid file.
pub fn running(run_path: &Path) -> bool {
    pidfile::read(run_path).is_some()
}
