//! Pid file handling
//!
//! The daemon records its pid as an ASCII decimal followed by a newline in
//! `<run>/pid`. Reads are strict: the content is trimmed, parsed and the
//! process probed for liveness, so a stale file from a crashed daemon does
//! not block a restart.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the pid file below the run directory.
pub const PID_FILE: &str = "pid";

fn pid_path(run_path: &Path) -> PathBuf {
    run_path.join(PID_FILE)
}

fn pid_is_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Reads the pid of a live daemon, if any.
///
/// Returns `None` when the file is missing, unparsable, or names a process
/// that no longer exists.
pub fn read(run_path: &Path) -> Option<u32> {
    let content = fs::read_to_string(pid_path(run_path)).ok()?;
    let pid: u32 = content.trim().parse().ok()?;
    if pid == 0 || pid > i32::MAX as u32 || !pid_is_alive(pid) {
        return None;
    }
    Some(pid)
}

/// Writes the current pid into the run directory.
pub fn write(run_path: &Path) -> Result<()> {
    let path = pid_path(run_path);
    fs::write(&path, format!("{}\n", std::process::id()))
        .with_context(|| format!("failed to create pid file '{}'", path.display()))
}

/// Whether the pid file still names the current process.
pub fn check(run_path: &Path) -> bool {
    read(run_path) == Some(std::process::id())
}

/// Removes the pid file.
pub fn remove(run_path: &Path) -> Result<()> {
    let path = pid_path(run_path);
    fs::remove_file(&path)
        .with_context(|| format!("failed to remove pid file '{}'", path.display()))
}
