//! On-disk queue workspace
//!
//! Owns the directory hierarchy under the queue root: one directory per
//! schedule (its processing queue), one private subdirectory per action and
//! an `_incoming` staging area per schedule. Result artefacts travel as
//! `<epoch>-<schedule>-<action>.data`/`.meta` pairs and cross schedule
//! boundaries only via hardlinks, so a consumer never observes a partially
//! written pair.
//!
//! Batch operations never abort on the first problem: each failure is
//! logged, the remainder is processed, and the worst outcome is returned.

use crate::csv::{self, RecordReader};
use crate::model::{
    Action, Lmap, MeasurementResult, ResultRow, ResultTable, Schedule, Task, TaskOption,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Maximum length of a sanitised file name.
const NAME_MAX: usize = 255;

/// Name of the per-schedule staging directory for inbound artefacts.
pub const INCOMING_DIR: &str = "_incoming";

const DATA_SUFFIX: &str = ".data";
const META_SUFFIX: &str = ".meta";

/// Creates a safe filesystem name.
///
/// Alphanumerics and `-._,` pass through; every other byte is %-encoded as
/// two hex nibbles. The first character must not open the `_` private
/// namespace or hide the entry, so a leading `.` or `_` is encoded as well.
/// The result is capped to NAME_MAX.
pub fn safe_name(name: &str) -> String {
    const SAFE: &[u8] = b"-.,_";
    const HEX: &[u8] = b"0123456789ABCDEF";

    let mut out = String::new();
    for (i, byte) in name.bytes().enumerate() {
        let pass = (byte.is_ascii_alphanumeric() || SAFE.contains(&byte))
            && !(i == 0 && (byte == b'.' || byte == b'_'));
        if pass {
            if out.len() + 1 > NAME_MAX {
                break;
            }
            out.push(byte as char);
        } else {
            if out.len() + 3 > NAME_MAX {
                break;
            }
            out.push('%');
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0x0f) as usize] as char);
        }
    }
    out
}

/// The artefact pair base name for the current invocation of an action.
fn artefact_base(schedule: &Schedule, action: &Action) -> String {
    format!(
        "{}-{}-{}",
        action.last_invocation.unwrap_or(0),
        safe_name(&schedule.name),
        safe_name(&action.name)
    )
}

/// Renders a cycle-number instant as an ISO date in UTC.
fn render_cycle_number(epoch: i64) -> String {
    match DateTime::<Utc>::from_timestamp(epoch, 0) {
        Some(dt) => dt.format("%Y%m%d.%H%M%S").to_string(),
        None => String::new(),
    }
}

/// Directory handle used for link operations that must stay anchored to the
/// directory even if an ancestor is renamed underneath us.
struct DirFd(File);

impl DirFd {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(path)
            .with_context(|| format!("failed to open directory '{}'", path.display()))?;
        Ok(Self(file))
    }

    fn link_into(&self, name: &str, dst: &DirFd) -> io::Result<()> {
        let cname = CString::new(name.as_bytes())?;
        let rc = unsafe {
            libc::linkat(
                self.0.as_raw_fd(),
                cname.as_ptr(),
                dst.0.as_raw_fd(),
                cname.as_ptr(),
                0,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn unlink(&self, name: &str) -> io::Result<()> {
        let cname = CString::new(name.as_bytes())?;
        let rc = unsafe { libc::unlinkat(self.0.as_raw_fd(), cname.as_ptr(), 0) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Owner of the queue directory hierarchy.
#[derive(Debug, Clone)]
pub struct Workspace {
    queue: PathBuf,
    /// Software identification written into the `magic` meta record.
    magic: String,
}

impl Workspace {
    pub fn new(queue: impl Into<PathBuf>, magic: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            magic: magic.into(),
        }
    }

    pub fn queue_path(&self) -> &Path {
        &self.queue
    }

    /// Creates the workspace directories for every schedule and action and
    /// records the resulting paths in the model. Existing directories are
    /// not an error.
    pub fn init(&self, lmap: &mut Lmap) -> Result<()> {
        let mut failed = false;

        for schedule in &mut lmap.schedules {
            if schedule.name.is_empty() {
                continue;
            }
            let sched_dir = self.queue.join(safe_name(&schedule.name));
            if let Err(e) = mkdir_0700(&sched_dir) {
                error!(dir = %sched_dir.display(), error = %e, "failed to mkdir");
                failed = true;
            }
            schedule.workspace = sched_dir.clone();

            let incoming = sched_dir.join(INCOMING_DIR);
            if let Err(e) = mkdir_0700(&incoming) {
                error!(dir = %incoming.display(), error = %e, "failed to mkdir");
                failed = true;
            }

            for action in &mut schedule.actions {
                if action.name.is_empty() {
                    continue;
                }
                let action_dir = sched_dir.join(safe_name(&action.name));
                if let Err(e) = mkdir_0700(&action_dir) {
                    error!(dir = %action_dir.display(), error = %e, "failed to mkdir");
                    failed = true;
                    continue;
                }
                action.workspace = action_dir;
            }
        }

        if failed {
            bail!("workspace initialisation failed");
        }
        Ok(())
    }

    /// Removes everything under the queue root. Partial failures are
    /// logged and the worst outcome is returned.
    pub fn clean_all(&self) -> Result<()> {
        let entries = fs::read_dir(&self.queue)
            .with_context(|| format!("failed to open queue directory '{}'", self.queue.display()))?;

        let mut failed = false;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to read queue directory entry");
                    failed = true;
                    continue;
                }
            };
            if let Err(e) = remove_all(&entry.path()) {
                error!(path = %entry.path().display(), error = %e, "failed to remove");
                failed = true;
            }
        }

        if failed {
            bail!("workspace clean failed");
        }
        Ok(())
    }

    /// Removes the regular files directly under the schedule directory,
    /// leaving subdirectories and `_`-prefixed entries alone. Used to
    /// consume the processing queue after a fully successful run.
    pub fn schedule_clean(&self, schedule: &Schedule) -> Result<()> {
        if schedule.workspace.as_os_str().is_empty() {
            return Ok(());
        }
        let entries = fs::read_dir(&schedule.workspace).with_context(|| {
            format!("failed to open '{}'", schedule.workspace.display())
        })?;

        let mut failed = false;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.as_bytes().first() == Some(&b'_') {
                continue;
            }
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                error!(path = %entry.path().display(), error = %e, "failed to remove");
                failed = true;
            }
        }

        if failed {
            bail!("schedule queue clean failed for '{}'", schedule.name);
        }
        Ok(())
    }

    /// Recursively removes everything under the action's private workspace.
    pub fn action_clean(&self, action: &Action) -> Result<()> {
        if action.workspace.as_os_str().is_empty() {
            return Ok(());
        }
        let entries = fs::read_dir(&action.workspace)
            .with_context(|| format!("failed to open '{}'", action.workspace.display()))?;

        let mut failed = false;
        for entry in entries.flatten() {
            if let Err(e) = remove_all(&entry.path()) {
                error!(path = %entry.path().display(), error = %e, "failed to remove");
                failed = true;
            }
        }

        if failed {
            bail!("action workspace clean failed for '{}'", action.name);
        }
        Ok(())
    }

    /// Promotes complete artefact pairs from the schedule's `_incoming`
    /// staging area into its processing queue.
    ///
    /// A pair is complete when both the `.meta` and the `.data` file exist
    /// as regular files; incomplete pairs stay behind for the next cycle.
    /// Promotion hardlinks both files into the queue and only then unlinks
    /// them from staging; when the second link fails the first is rolled
    /// back, so the queue never holds half a pair.
    pub fn schedule_move(&self, schedule: &Schedule) -> Result<()> {
        if schedule.workspace.as_os_str().is_empty() {
            return Ok(());
        }
        let incoming_path = schedule.workspace.join(INCOMING_DIR);
        let src = DirFd::open(&incoming_path)?;
        let dst = DirFd::open(&schedule.workspace)?;

        let mut failed = false;
        let entries = fs::read_dir(&incoming_path)
            .with_context(|| format!("failed to open '{}'", incoming_path.display()))?;
        for entry in entries.flatten() {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.starts_with('.') {
                continue;
            }
            let Some(base) = name.strip_suffix(META_SUFFIX) else {
                continue;
            };
            let meta_name = name.clone();
            let data_name = format!("{base}{DATA_SUFFIX}");

            if !is_regular_file(&incoming_path.join(&meta_name))
                || !is_regular_file(&incoming_path.join(&data_name))
            {
                debug!(pair = base, "incomplete artefact pair - skipping");
                continue;
            }

            if let Err(e) = src.link_into(&meta_name, &dst) {
                error!(file = meta_name, error = %e, "failed to promote meta file");
                failed = true;
                continue;
            }
            if let Err(e) = src.link_into(&data_name, &dst) {
                error!(file = data_name, error = %e, "failed to promote data file");
                if let Err(e) = dst.unlink(&meta_name) {
                    error!(file = meta_name, error = %e, "failed to roll back meta link");
                }
                failed = true;
                continue;
            }
            for name in [meta_name.as_str(), data_name.as_str()] {
                if let Err(e) = src.unlink(name) {
                    error!(file = name, error = %e, "failed to unlink staged file");
                    failed = true;
                }
            }
        }

        if failed {
            bail!("incoming promotion failed for '{}'", schedule.name);
        }
        Ok(())
    }

    /// Hardlinks every artefact of the action's workspace into the
    /// destination schedule's `_incoming` staging area.
    ///
    /// When the destination is the producing action's own schedule the
    /// files go directly into the processing queue, so the next action of a
    /// sequential schedule can read them immediately.
    pub fn action_move(
        &self,
        schedule: &Schedule,
        action: &Action,
        destination: &Schedule,
    ) -> Result<()> {
        if action.workspace.as_os_str().is_empty()
            || destination.workspace.as_os_str().is_empty()
        {
            return Ok(());
        }
        let target = if destination.name == schedule.name {
            destination.workspace.clone()
        } else {
            destination.workspace.join(INCOMING_DIR)
        };

        let mut failed = false;
        let entries = fs::read_dir(&action.workspace)
            .with_context(|| format!("failed to open '{}'", action.workspace.display()))?;
        for entry in entries.flatten() {
            let from = entry.path();
            let to = target.join(entry.file_name());
            if let Err(e) = fs::hard_link(&from, &to) {
                error!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %e,
                    "failed to move artefact"
                );
                failed = true;
            }
        }

        if failed {
            bail!(
                "artefact move failed from '{}' to '{}'",
                action.name,
                destination.name
            );
        }
        Ok(())
    }

    /// Opens the `.data` file for the action's current invocation.
    pub fn open_data(&self, schedule: &Schedule, action: &Action, truncate: bool) -> Result<File> {
        self.open_artefact(schedule, action, DATA_SUFFIX, truncate)
    }

    /// Opens the `.meta` file for the action's current invocation.
    pub fn open_meta(&self, schedule: &Schedule, action: &Action, truncate: bool) -> Result<File> {
        self.open_artefact(schedule, action, META_SUFFIX, truncate)
    }

    fn open_artefact(
        &self,
        schedule: &Schedule,
        action: &Action,
        suffix: &str,
        truncate: bool,
    ) -> Result<File> {
        let path = action
            .workspace
            .join(format!("{}{suffix}", artefact_base(schedule, action)));
        let mut options = OpenOptions::new();
        options.write(true).create(true).mode(0o600);
        if truncate {
            options.truncate(true);
        } else {
            options.append(true);
        }
        options
            .open(&path)
            .with_context(|| format!("failed to open '{}'", path.display()))
    }

    /// Writes the invocation-start meta records for the action.
    pub fn meta_add_start(
        &self,
        schedule: &Schedule,
        action: &Action,
        task: &Task,
    ) -> Result<()> {
        let file = self.open_meta(schedule, action, true)?;
        let mut out = BufWriter::new(file);

        csv::write_key_value(&mut out, "magic", &self.magic)?;
        csv::write_key_value(&mut out, "schedule", &schedule.name)?;
        csv::write_key_value(&mut out, "action", &action.name)?;
        csv::write_key_value(&mut out, "task", action.task.as_deref().unwrap_or(""))?;
        for option in task.options.iter().chain(action.options.iter()) {
            csv::write_record(
                &mut out,
                &[
                    "option",
                    &option.id,
                    option.name.as_deref().unwrap_or(""),
                    option.value.as_deref().unwrap_or(""),
                ],
            )?;
        }
        for tag in task
            .tags
            .iter()
            .chain(schedule.tags.iter())
            .chain(action.tags.iter())
        {
            csv::write_key_value(&mut out, "tag", tag)?;
        }
        csv::write_key_value(
            &mut out,
            "event",
            &schedule.last_invocation.unwrap_or(0).to_string(),
        )?;
        csv::write_key_value(
            &mut out,
            "start",
            &action.last_invocation.unwrap_or(0).to_string(),
        )?;
        if schedule.cycle_number != 0 {
            csv::write_key_value(
                &mut out,
                "cycle-number",
                &render_cycle_number(schedule.cycle_number),
            )?;
        }
        out.flush()
            .with_context(|| format!("failed to write meta file for action '{}'", action.name))
    }

    /// Appends the completion meta records for the action.
    pub fn meta_add_end(&self, schedule: &Schedule, action: &Action) -> Result<()> {
        let file = self.open_meta(schedule, action, false)?;
        let mut out = BufWriter::new(file);
        csv::write_key_value(
            &mut out,
            "end",
            &action.last_completion.unwrap_or(0).to_string(),
        )?;
        csv::write_key_value(&mut out, "status", &action.last_status.to_string())?;
        out.flush()
            .with_context(|| format!("failed to append meta file for action '{}'", action.name))
    }

    /// Recomputes the storage consumption of every schedule and action
    /// workspace (allocated blocks, 512 bytes each).
    pub fn update(&self, lmap: &mut Lmap) -> Result<()> {
        let mut failed = false;
        for schedule in &mut lmap.schedules {
            match disk_usage(&schedule.workspace) {
                Ok(storage) => schedule.storage = storage,
                Err(_) => failed = true,
            }
            for action in &mut schedule.actions {
                match disk_usage(&action.workspace) {
                    Ok(storage) => action.storage = storage,
                    Err(_) => failed = true,
                }
            }
        }
        if failed {
            bail!("storage accounting failed");
        }
        Ok(())
    }

    /// Reads every `.meta`/`.data` pair in the given directory (typically
    /// the current working directory of the report command) into results
    /// attached to the configuration.
    pub fn read_results(lmap: &mut Lmap, dir: &Path) -> Result<()> {
        let entries = fs::read_dir(dir)
            .map_err(|e| anyhow!("failed to open workspace directory '{}': {e}", dir.display()))?;

        for entry in entries.flatten() {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let Some(base) = name.strip_suffix(META_SUFFIX) else {
                continue;
            };

            let mut result = match read_meta(&dir.join(&name)) {
                Ok(result) => result,
                Err(e) => {
                    warn!(file = name, error = %e, "failed to read meta file");
                    continue;
                }
            };
            let data_name = format!("{base}{DATA_SUFFIX}");
            match read_table(&dir.join(&data_name)) {
                Ok(table) => result.tables.push(table),
                Err(e) => {
                    warn!(file = data_name, error = %e, "failed to read data file");
                }
            }
            lmap.results.push(result);
        }
        Ok(())
    }
}

fn mkdir_0700(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    match fs::DirBuilder::new().mode(0o700).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

/// Post-order removal of a file or directory tree, continuing past
/// individual failures.
fn remove_all(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("cannot stat '{}'", path.display()))?;
    if !meta.is_dir() {
        return fs::remove_file(path)
            .with_context(|| format!("cannot remove '{}'", path.display()));
    }

    let mut failed = false;
    for entry in fs::read_dir(path)
        .with_context(|| format!("cannot open '{}'", path.display()))?
        .flatten()
    {
        if remove_all(&entry.path()).is_err() {
            failed = true;
        }
    }
    if let Err(e) = fs::remove_dir(path) {
        error!(path = %path.display(), error = %e, "cannot remove");
        failed = true;
    }
    if failed {
        bail!("cannot remove '{}'", path.display());
    }
    Ok(())
}

/// Sums the allocated storage of all regular files below the path.
fn disk_usage(path: &Path) -> Result<u64> {
    if path.as_os_str().is_empty() {
        return Ok(0);
    }
    let mut blocks: u64 = 0;
    walk_blocks(path, &mut blocks)?;
    Ok(blocks * 512)
}

fn walk_blocks(path: &Path, blocks: &mut u64) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("cannot stat '{}'", path.display()))?;
    if meta.file_type().is_file() {
        *blocks += meta.blocks();
        return Ok(());
    }
    if meta.is_dir() {
        for entry in fs::read_dir(path)
            .with_context(|| format!("cannot open '{}'", path.display()))?
            .flatten()
        {
            walk_blocks(&entry.path(), blocks)?;
        }
    }
    Ok(())
}

/// Parses a `.meta` sidecar into a result skeleton.
fn read_meta(path: &Path) -> Result<MeasurementResult> {
    let file = File::open(path)
        .with_context(|| format!("failed to open meta file '{}'", path.display()))?;
    let mut reader = RecordReader::new(BufReader::new(file));
    let mut result = MeasurementResult::default();

    while let Some((key, values)) = reader.next_key_value()? {
        let first = values.first().map(String::as_str).unwrap_or("");
        match key.as_str() {
            "magic" => {
                debug!(magic = first, "meta file producer");
            }
            "schedule" => result.schedule = Some(first.to_string()),
            "action" => result.action = Some(first.to_string()),
            "task" => result.task = Some(first.to_string()),
            "option" => {
                let mut fields = values.into_iter();
                let id = fields.next().unwrap_or_default();
                let name = fields.next().filter(|s| !s.is_empty());
                let value = fields.next().filter(|s| !s.is_empty());
                result.options.push(TaskOption { id, name, value });
            }
            "tag" => {
                result.tags.insert(first);
            }
            "event" => result.event = first.parse().ok(),
            "start" => result.start = first.parse().ok(),
            "end" => result.end = first.parse().ok(),
            "cycle-number" => result.cycle_number = Some(first.to_string()),
            "status" => result.status = first.parse().ok(),
            other => {
                warn!(file = %path.display(), key = other, "unexpected key in meta file");
            }
        }
    }
    Ok(result)
}

/// Parses a `.data` file into a table of rows.
fn read_table(path: &Path) -> Result<ResultTable> {
    let file = File::open(path)
        .with_context(|| format!("failed to open data file '{}'", path.display()))?;
    let mut reader = RecordReader::new(BufReader::new(file));
    let mut table = ResultTable::default();
    while let Some(values) = reader.next_record()? {
        table.rows.push(ResultRow { values });
    }
    Ok(table)
}
