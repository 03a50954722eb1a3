//! Signal frontend
//!
//! Translates host signals into scheduler requests. The handlers do no
//! work themselves: each delivery is forwarded as a message and the
//! scheduler loop performs the actual rendering or filesystem work.
//!
//! | Signal            | Request                                        |
//! |-------------------|------------------------------------------------|
//! | SIGINT / SIGTERM  | stop                                           |
//! | SIGHUP            | restart (reload configuration)                 |
//! | SIGUSR1           | status dump to `<run>/status`                  |
//! | SIGUSR2           | workspace wipe and re-init                     |
//!
//! Child completions need no SIGCHLD handler here: the runtime reaps
//! children through their wait futures and the runner's supervisor tasks
//! report the results.

use crate::runner::SchedulerRequest;
use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Ignores SIGPIPE so that a dying child never takes the daemon with it.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// Installs the daemon's signal streams and forwards each delivery as a
/// scheduler request. Returns the forwarding task handle.
pub fn spawn_signal_frontend(
    req_tx: mpsc::Sender<SchedulerRequest>,
) -> Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut sigusr1 =
        signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
    let mut sigusr2 =
        signal(SignalKind::user_defined2()).context("failed to install SIGUSR2 handler")?;

    let handle = tokio::spawn(async move {
        loop {
            let request = tokio::select! {
                _ = sigint.recv() => SchedulerRequest::Stop,
                _ = sigterm.recv() => SchedulerRequest::Stop,
                _ = sighup.recv() => SchedulerRequest::Restart,
                _ = sigusr1.recv() => SchedulerRequest::StatusDump,
                _ = sigusr2.recv() => SchedulerRequest::WorkspaceWipe,
            };
            debug!(?request, "signal received");
            if req_tx.send(request).await.is_err() {
                return;
            }
        }
    });
    Ok(handle)
}
