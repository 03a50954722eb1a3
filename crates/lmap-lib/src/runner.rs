//! Scheduler and action runner
//!
//! The central state machine of the daemon. A single loop owns the
//! configuration tree and reacts to event fires from the dispatcher, child
//! completions from per-child supervisor tasks, duration expiries and
//! signal-frontend requests. All runtime-field mutation happens here;
//! measurement children share nothing with the daemon beyond their exit
//! status and the `.data` file their stdout is redirected to.

use crate::dispatch::EventFire;
use crate::model::{Action, EntityState, ExecutionMode, Lmap, Schedule, ScheduleEnd, Task};
use crate::workspace::Workspace;
use crate::{suppress, xmlio};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Maximum number of argv entries for a measurement child.
pub const MAX_ARGS: usize = 252;

/// Name of the state dump file below the run directory.
pub const STATUS_FILE: &str = "status";

/// Requests translated from host signals by the signal frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerRequest {
    /// Terminate running actions and leave the loop.
    Stop,
    /// Terminate running actions and leave the loop for a config reload.
    Restart,
    /// Refresh storage accounting and write the state file.
    StatusDump,
    /// Wipe and re-initialise the queue workspace.
    WorkspaceWipe,
}

/// Completion notice of one measurement child.
#[derive(Debug, Clone, Copy)]
pub struct Reap {
    pub pid: u32,
    /// Exit code, or the negated signal number for a signalled child.
    pub status: i32,
}

/// What the loop left behind when it exited.
pub struct RunOutcome {
    pub lmap: Lmap,
    pub restart: bool,
}

/// Sends SIGTERM to a measurement child. A zero pid is ignored.
pub(crate) fn kill_term(pid: u32) {
    if pid == 0 {
        return;
    }
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Maps a child exit status to the recorded form: the exit code, or the
/// negated signal number when the child was killed by a signal.
fn reap_status(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code,
        None => -status.signal().unwrap_or(0),
    }
}

/// Builds the argument vector for one action: the program followed by the
/// task options and then the action options, in declaration order.
fn build_argv(task: &Task, action: &Action) -> Result<Vec<String>> {
    let program = task
        .program
        .clone()
        .with_context(|| format!("task '{}' has no program", task.name))?;

    let mut argv = vec![program];
    for option in task.options.iter().chain(action.options.iter()) {
        if let Some(name) = &option.name {
            argv.push(name.clone());
        }
        if let Some(value) = &option.value {
            argv.push(value.clone());
        }
        if argv.len() > MAX_ARGS {
            anyhow::bail!("action '{}' has too many arguments", action.name);
        }
    }
    Ok(argv)
}

/// The scheduler loop and its channels.
pub struct Runner {
    lmap: Lmap,
    workspace: Workspace,
    run_path: PathBuf,
    fire_rx: mpsc::Receiver<EventFire>,
    req_rx: mpsc::Receiver<SchedulerRequest>,
    reap_tx: mpsc::Sender<Reap>,
    reap_rx: mpsc::Receiver<Reap>,
    expiry_tx: mpsc::Sender<String>,
    expiry_rx: mpsc::Receiver<String>,
}

impl Runner {
    pub fn new(
        lmap: Lmap,
        workspace: Workspace,
        run_path: impl Into<PathBuf>,
        fire_rx: mpsc::Receiver<EventFire>,
        req_rx: mpsc::Receiver<SchedulerRequest>,
    ) -> Self {
        let (reap_tx, reap_rx) = mpsc::channel(64);
        let (expiry_tx, expiry_rx) = mpsc::channel(16);
        Self {
            lmap,
            workspace,
            run_path: run_path.into(),
            fire_rx,
            req_rx,
            reap_tx,
            reap_rx,
            expiry_tx,
            expiry_rx,
        }
    }

    /// Runs the loop until a stop or restart request arrives.
    pub async fn run(mut self) -> RunOutcome {
        debug!("event loop starting");
        let restart = loop {
            tokio::select! {
                Some(fire) = self.fire_rx.recv() => self.handle_fire(fire),
                Some(reap) = self.reap_rx.recv() => self.handle_reap(reap),
                Some(schedule) = self.expiry_rx.recv() => self.handle_expiry(&schedule),
                request = self.req_rx.recv() => {
                    match request {
                        Some(SchedulerRequest::Stop) | None => {
                            self.kill_all();
                            break false;
                        }
                        Some(SchedulerRequest::Restart) => {
                            self.kill_all();
                            break true;
                        }
                        Some(SchedulerRequest::StatusDump) => self.dump_status(),
                        Some(SchedulerRequest::WorkspaceWipe) => self.wipe_workspace(),
                    }
                }
            }
        };
        debug!("event loop finished");
        RunOutcome {
            lmap: self.lmap,
            restart,
        }
    }

    /// Reacts to one event fire: suppressions first, then schedules.
    fn handle_fire(&mut self, fire: EventFire) {
        debug!(event = %fire.name, kind = fire.kind, "event fired");
        suppress::on_event_fire(&mut self.lmap, &fire.name);

        let (one_shot, cycle_interval) = match self.lmap.find_event(&fire.name) {
            Some(event) => (event.kind.is_one_shot(), event.cycle_interval),
            None => return,
        };
        let now = unix_now();

        for si in 0..self.lmap.schedules.len() {
            let schedule = &mut self.lmap.schedules[si];
            let mut skip_start = schedule.state == EntityState::Disabled;

            if !skip_start && schedule.name.is_empty() {
                error!("disabling unnamed schedule");
                schedule.state = EntityState::Disabled;
                skip_start = true;
            }

            if !skip_start && schedule.start.as_deref() == Some(fire.name.as_str()) {
                if schedule.state == EntityState::Suppressed {
                    schedule.cnt_suppressions = schedule.cnt_suppressions.wrapping_add(1);
                } else if schedule.state == EntityState::Running {
                    warn!(schedule = %schedule.name, "schedule still running - skipping");
                    schedule.cnt_overlaps = schedule.cnt_overlaps.wrapping_add(1);
                } else {
                    schedule.cycle_number = match cycle_interval {
                        Some(interval) if interval != 0 => {
                            (now / i64::from(interval)) * i64::from(interval)
                        }
                        _ => 0,
                    };
                    if let Err(e) = self.workspace.schedule_move(&self.lmap.schedules[si]) {
                        warn!(error = %e, "incoming promotion failed");
                    }
                    self.schedule_exec(si, now);
                    if one_shot {
                        self.lmap.schedules[si].state = EntityState::Disabled;
                    }
                }
            }

            // the end event applies even to disabled schedules
            let schedule = &self.lmap.schedules[si];
            if schedule.end_event() == Some(fire.name.as_str()) {
                schedule_kill(schedule);
            }
        }
    }

    /// Launches the actions of one schedule according to its mode.
    fn schedule_exec(&mut self, si: usize, now: i64) {
        let mode = self.lmap.schedules[si].mode;
        match mode {
            ExecutionMode::Sequential => {
                let schedule = &mut self.lmap.schedules[si];
                schedule.last_invocation = Some(now);
                schedule.cnt_invocations = schedule.cnt_invocations.wrapping_add(1);
                schedule.state = EntityState::Running;
                let has_actions = !schedule.actions.is_empty();
                self.arm_duration(si);
                if has_actions {
                    self.action_exec(si, 0, now);
                }
            }
            ExecutionMode::Parallel => {
                let schedule = &mut self.lmap.schedules[si];
                schedule.last_invocation = Some(now);
                schedule.cnt_invocations = schedule.cnt_invocations.wrapping_add(1);
                schedule.state = EntityState::Running;
                let count = schedule.actions.len();
                self.arm_duration(si);
                for ai in 0..count {
                    self.action_exec(si, ai, now);
                }
            }
            ExecutionMode::Pipelined => {
                let schedule = &mut self.lmap.schedules[si];
                debug!(
                    schedule = %schedule.name,
                    "disabling schedule (pipelined not yet implemented)"
                );
                schedule.state = EntityState::Disabled;
            }
        }
    }

    /// Arms the one-shot expiry timer of a duration-bounded schedule; the
    /// expiry terminates the run like an end event would.
    fn arm_duration(&self, si: usize) {
        let schedule = &self.lmap.schedules[si];
        let Some(ScheduleEnd::Duration(seconds)) = schedule.end else {
            return;
        };
        let name = schedule.name.clone();
        let tx = self.expiry_tx.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(seconds)).await;
            let _ = tx.send(name).await;
        });
    }

    /// Launches one action if its preconditions hold.
    fn action_exec(&mut self, si: usize, ai: usize, now: i64) {
        {
            let schedule = &mut self.lmap.schedules[si];
            let action = &mut schedule.actions[ai];
            if action.name.is_empty()
                || action.task.is_none()
                || action.workspace.as_os_str().is_empty()
            {
                return;
            }
            if action.state == EntityState::Suppressed {
                action.cnt_suppressions = action.cnt_suppressions.wrapping_add(1);
                return;
            }
            if action.state == EntityState::Disabled {
                return;
            }
        }

        let task_name = self.lmap.schedules[si].actions[ai]
            .task
            .clone()
            .unwrap_or_default();
        let Some(task) = self.lmap.find_task(&task_name).cloned() else {
            error!(
                task = %task_name,
                action = %self.lmap.schedules[si].actions[ai].name,
                "task for action does not exist"
            );
            return;
        };
        let Some(program) = task.program.clone() else {
            error!(task = %task.name, "task has no program");
            return;
        };

        // never run a program that is not an announced capability
        let allowed = self
            .lmap
            .capabilities
            .as_ref()
            .map(|cap| cap.allows_program(&program))
            .unwrap_or(false);
        if !allowed {
            error!(task = %task.name, "task does not match capabilities");
            return;
        }

        {
            let action = &mut self.lmap.schedules[si].actions[ai];
            if action.pid != 0 {
                warn!(
                    action = %action.name,
                    pid = action.pid,
                    "action still running - skipping"
                );
                action.cnt_overlaps = action.cnt_overlaps.wrapping_add(1);
                return;
            }
            action.last_invocation = Some(now);
        }

        let argv = match build_argv(&task, &self.lmap.schedules[si].actions[ai]) {
            Ok(argv) => argv,
            Err(e) => {
                error!(error = %e, "failed to build argument vector");
                return;
            }
        };

        // the invocation-start record precedes the child so that a crash in
        // between leaves a recognisable orphan meta file
        let schedule = &self.lmap.schedules[si];
        let action = &schedule.actions[ai];
        if let Err(e) = self.workspace.meta_add_start(schedule, action, &task) {
            error!(action = %action.name, error = %e, "failed to write meta start record");
            return;
        }
        let data = match self.workspace.open_data(schedule, action, true) {
            Ok(file) => file,
            Err(e) => {
                error!(action = %action.name, error = %e, "failed to open data file");
                return;
            }
        };

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::from(data))
            .current_dir(&action.workspace);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(action = %action.name, error = %e, "failed to execute action");
                return;
            }
        };
        let pid = child.id().unwrap_or(0);

        {
            let action = &mut self.lmap.schedules[si].actions[ai];
            action.pid = pid;
            action.state = EntityState::Running;
            action.cnt_invocations = action.cnt_invocations.wrapping_add(1);
            info!(action = %action.name, pid, "action started");
        }

        let reap_tx = self.reap_tx.clone();
        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => reap_status(&status),
                Err(e) => {
                    warn!(pid, error = %e, "failed to await child");
                    1
                }
            };
            let _ = reap_tx.send(Reap { pid, status }).await;
        });
    }

    /// Bookkeeping for one completed child: records the status, seals the
    /// meta sidecar, moves artefacts to the destinations, chains the next
    /// sequential action and reconciles the schedule state.
    fn handle_reap(&mut self, reap: Reap) {
        let now = unix_now();
        let Some((si, ai)) = self.lmap.find_action_by_pid(reap.pid) else {
            debug!(pid = reap.pid, "ignoring unknown pid");
            return;
        };

        {
            let action = &mut self.lmap.schedules[si].actions[ai];
            action.pid = 0;
            action.state = if action.cnt_active_suppressions > 0 {
                EntityState::Suppressed
            } else {
                EntityState::Enabled
            };
            action.last_completion = Some(now);
            action.last_status = reap.status;
            if reap.status != 0 {
                action.last_failed_completion = action.last_completion;
                action.last_failed_status = reap.status;
                action.cnt_failures = action.cnt_failures.wrapping_add(1);
            }
            info!(
                action = %action.name,
                pid = reap.pid,
                status = reap.status,
                "action completed"
            );
        }

        {
            let schedule = &self.lmap.schedules[si];
            let action = &schedule.actions[ai];
            if let Err(e) = self.workspace.meta_add_end(schedule, action) {
                warn!(action = %action.name, error = %e, "failed to write meta end record");
            }

            if reap.status == 0 && !action.destinations.is_empty() {
                for destination in action.destinations.iter() {
                    let Some(di) = self.lmap.find_schedule(destination) else {
                        continue;
                    };
                    let dst = &self.lmap.schedules[di];
                    if let Err(e) = self.workspace.action_move(schedule, action, dst) {
                        warn!(
                            action = %action.name,
                            destination = %dst.name,
                            error = %e,
                            "failed to move artefacts"
                        );
                    }
                }
            }
            if let Err(e) = self.workspace.action_clean(action) {
                warn!(action = %action.name, error = %e, "failed to clean action workspace");
            }
        }

        // next action of a sequential schedule, unless suppressed meanwhile
        {
            let schedule = &self.lmap.schedules[si];
            if schedule.mode == ExecutionMode::Sequential
                && ai + 1 < schedule.actions.len()
                && schedule.state != EntityState::Suppressed
                && !schedule.stop_running
            {
                self.action_exec(si, ai + 1, now);
            }
        }

        if self.lmap.schedules[si].state == EntityState::Running {
            let schedule = &mut self.lmap.schedules[si];
            let mut state = if schedule.cnt_active_suppressions > 0 {
                EntityState::Suppressed
            } else {
                EntityState::Enabled
            };
            let mut failed = 0;
            let mut succeeded = 0;
            for action in &schedule.actions {
                if action.state == EntityState::Running {
                    state = EntityState::Running;
                }
                if action.last_status != 0 {
                    failed += 1;
                } else if action.last_completion.is_some() {
                    succeeded += 1;
                }
            }
            schedule.state = state;
            if state != EntityState::Running && failed > 0 {
                schedule.cnt_failures = schedule.cnt_failures.wrapping_add(1);
            }
            if state != EntityState::Running && failed == 0 && succeeded > 0 {
                // the whole run succeeded: consume the input queue
                if let Err(e) = self.workspace.schedule_clean(&self.lmap.schedules[si]) {
                    warn!(error = %e, "failed to clean schedule queue");
                }
            }
        }
    }

    /// A duration-bounded schedule ran out of time.
    fn handle_expiry(&mut self, name: &str) {
        if let Some(si) = self.lmap.find_schedule(name) {
            debug!(schedule = %name, "schedule duration expired");
            schedule_kill(&self.lmap.schedules[si]);
        }
    }

    /// Refreshes storage accounting and writes the state document.
    fn dump_status(&mut self) {
        if let Err(e) = self.workspace.update(&mut self.lmap) {
            warn!(error = %e, "storage accounting failed");
        }
        let xml = match xmlio::render_state(&self.lmap) {
            Ok(xml) => xml,
            Err(e) => {
                error!(error = %e, "failed to render state");
                return;
            }
        };
        let path = self.run_path.join(STATUS_FILE);
        let tmp = path.with_extension("tmp");
        let outcome = std::fs::write(&tmp, xml.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, &path));
        if let Err(e) = outcome {
            error!(path = %path.display(), error = %e, "failed to write status file");
        }
    }

    /// Wipes the queue workspace and rebuilds the directory tree.
    fn wipe_workspace(&mut self) {
        if self.workspace.clean_all().is_ok() {
            if let Err(e) = self.workspace.init(&mut self.lmap) {
                error!(error = %e, "failed to re-initialise workspace");
            }
        }
    }

    fn kill_all(&self) {
        for schedule in &self.lmap.schedules {
            schedule_kill(schedule);
        }
    }
}

/// Disables every pipelined schedule; the mode is not implemented and
/// such schedules must never launch.
pub fn disable_pipelined_schedules(lmap: &mut Lmap) {
    for schedule in &mut lmap.schedules {
        if schedule.mode == ExecutionMode::Pipelined && schedule.state != EntityState::Disabled {
            warn!(
                schedule = %schedule.name,
                "disabling schedule (pipelined not yet implemented)"
            );
            schedule.state = EntityState::Disabled;
        }
    }
}

fn action_kill(action: &Action) {
    if action.state == EntityState::Running {
        kill_term(action.pid);
    }
}

fn schedule_kill(schedule: &Schedule) {
    if schedule.name.is_empty() {
        return;
    }
    for action in &schedule.actions {
        action_kill(action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskOption;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    #[test]
    fn test_reap_status_translation() {
        // raw wait status: exit code in the high byte, signal in the low
        let exited = ExitStatus::from_raw(1 << 8);
        assert_eq!(reap_status(&exited), 1);
        let clean = ExitStatus::from_raw(0);
        assert_eq!(reap_status(&clean), 0);
        let signalled = ExitStatus::from_raw(libc::SIGTERM);
        assert_eq!(reap_status(&signalled), -15);
    }

    #[test]
    fn test_build_argv_order() {
        let mut task = Task::new("ping");
        task.program = Some("/usr/bin/ping".to_string());
        task.options.push(TaskOption {
            id: "count".to_string(),
            name: Some("-c".to_string()),
            value: Some("3".to_string()),
        });
        let mut action = Action::new("a");
        action.options.push(TaskOption {
            id: "target".to_string(),
            name: None,
            value: Some("example.net".to_string()),
        });

        let argv = build_argv(&task, &action).unwrap();
        assert_eq!(argv, vec!["/usr/bin/ping", "-c", "3", "example.net"]);
    }

    #[test]
    fn test_build_argv_caps_argument_count() {
        let mut task = Task::new("busy");
        task.program = Some("/bin/true".to_string());
        let mut action = Action::new("a");
        for i in 0..200 {
            action.options.push(TaskOption {
                id: format!("o{i}"),
                name: Some(format!("-x{i}")),
                value: Some("v".to_string()),
            });
        }
        assert!(build_argv(&task, &action).is_err());
    }

    #[test]
    fn test_build_argv_requires_program() {
        let task = Task::new("empty");
        let action = Action::new("a");
        assert!(build_argv(&task, &action).is_err());
    }

    #[test]
    fn test_kill_term_ignores_zero_pid() {
        // must not signal the whole process group
        kill_term(0);
    }
}
