//! Core data model for the LMAP measurement agent
//!
//! A single [`Lmap`] aggregate owns every configured entity: the agent
//! identity, capabilities, tasks, schedules (with their actions),
//! suppressions and events. The tree is built once per configuration load,
//! validated as a whole, and mutated only by the scheduler loop thereafter.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Default controller timeout in seconds (one week).
pub const CONTROLLER_TIMEOUT_DEFAULT: u32 = 604_800;

/// Upper bound for the random-spread interval of an event.
pub const RANDOM_SPREAD_MAX: u32 = i32::MAX as u32;

/// An ordered, duplicate-free list of strings.
///
/// Insertion order is observable in rendered output, so tags are kept as a
/// sequence with uniqueness enforced on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagSet(Vec<String>);

impl TagSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Inserts a tag, returning false if it was already present.
    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.0.iter().any(|t| *t == tag) {
            return false;
        }
        self.0.push(tag);
        true
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

/// Runtime state shared by schedules and actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    Enabled,
    Disabled,
    Running,
    Suppressed,
}

impl EntityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityState::Enabled => "enabled",
            EntityState::Disabled => "disabled",
            EntityState::Running => "running",
            EntityState::Suppressed => "suppressed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "enabled" => Ok(EntityState::Enabled),
            "disabled" => Ok(EntityState::Disabled),
            "running" => Ok(EntityState::Running),
            "suppressed" => Ok(EntityState::Suppressed),
            other => bail!("illegal state '{other}'"),
        }
    }
}

/// Runtime state of a suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionState {
    Enabled,
    Disabled,
    Active,
}

impl SuppressionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionState::Enabled => "enabled",
            SuppressionState::Disabled => "disabled",
            SuppressionState::Active => "active",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "enabled" => Ok(SuppressionState::Enabled),
            "disabled" => Ok(SuppressionState::Disabled),
            "active" => Ok(SuppressionState::Active),
            other => bail!("illegal state '{other}'"),
        }
    }
}

/// Execution mode of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Pipelined,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Pipelined => "pipelined",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            "pipelined" => Ok(ExecutionMode::Pipelined),
            other => bail!("illegal execution mode '{other}'"),
        }
    }
}

/// The agent identity and reporting policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Agent {
    pub agent_id: Option<String>,
    pub group_id: Option<String>,
    pub measurement_point: Option<String>,
    pub report_agent_id: Option<bool>,
    pub report_group_id: Option<bool>,
    pub report_measurement_point: Option<bool>,
    pub controller_timeout: Option<u32>,
    /// Instant the daemon last (re)loaded this configuration.
    pub last_started: Option<i64>,
    /// Report generation instant, stamped by the report command.
    pub report_date: Option<i64>,
}

impl Agent {
    /// Sets the agent id after checking the value is a well-formed UUID.
    pub fn set_agent_id(&mut self, value: &str) -> Result<()> {
        let bytes = value.as_bytes();
        if bytes.len() != 36 {
            bail!("illegal uuid value '{value}'");
        }
        for (i, b) in bytes.iter().enumerate() {
            let ok = match i {
                8 | 13 | 18 | 23 => *b == b'-',
                _ => b.is_ascii_hexdigit(),
            };
            if !ok {
                bail!("illegal uuid value '{value}'");
            }
        }
        self.agent_id = Some(value.to_string());
        Ok(())
    }

    pub fn effective_controller_timeout(&self) -> u32 {
        self.controller_timeout.unwrap_or(CONTROLLER_TIMEOUT_DEFAULT)
    }
}

/// Calendar recurrence bitsets with an optional fixed timezone offset.
///
/// The all-ones sentinel on a component means "any value" and renders as
/// `*`. Day-of-month uses bits 1..=31; the remaining components are
/// zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSpec {
    pub months: u16,
    pub days_of_month: u32,
    pub days_of_week: u8,
    pub hours: u32,
    pub minutes: u64,
    pub seconds: u64,
    /// Signed offset from UTC in minutes.
    pub timezone_offset: Option<i32>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

pub const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Weekday names with Monday as bit 0.
pub const WEEKDAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

impl Default for CalendarSpec {
    fn default() -> Self {
        Self {
            months: 0,
            days_of_month: 0,
            days_of_week: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
            timezone_offset: None,
            start: None,
            end: None,
        }
    }
}

impl CalendarSpec {
    pub fn add_month(&mut self, value: &str) -> Result<()> {
        if value == "*" {
            self.months = u16::MAX;
            return Ok(());
        }
        match MONTH_NAMES.iter().position(|m| *m == value) {
            Some(bit) => {
                self.months |= 1 << bit;
                Ok(())
            }
            None => bail!("illegal month value '{value}'"),
        }
    }

    pub fn add_day_of_month(&mut self, value: &str) -> Result<()> {
        if value == "*" {
            self.days_of_month = u32::MAX;
            return Ok(());
        }
        let day: u32 = value
            .parse()
            .map_err(|_| anyhow!("illegal day of month value '{value}'"))?;
        if !(1..=31).contains(&day) {
            bail!("illegal day of month value '{value}'");
        }
        self.days_of_month |= 1 << day;
        Ok(())
    }

    pub fn add_day_of_week(&mut self, value: &str) -> Result<()> {
        if value == "*" {
            self.days_of_week = u8::MAX;
            return Ok(());
        }
        match WEEKDAY_NAMES.iter().position(|d| *d == value) {
            Some(bit) => {
                self.days_of_week |= 1 << bit;
                Ok(())
            }
            None => bail!("illegal day of week value '{value}'"),
        }
    }

    pub fn add_hour(&mut self, value: &str) -> Result<()> {
        if value == "*" {
            self.hours = u32::MAX;
            return Ok(());
        }
        let hour: u32 = value
            .parse()
            .map_err(|_| anyhow!("illegal hour value '{value}'"))?;
        if hour > 23 {
            bail!("illegal hour value '{value}'");
        }
        self.hours |= 1 << hour;
        Ok(())
    }

    pub fn add_minute(&mut self, value: &str) -> Result<()> {
        if value == "*" {
            self.minutes = u64::MAX;
            return Ok(());
        }
        let minute: u64 = value
            .parse()
            .map_err(|_| anyhow!("illegal minute value '{value}'"))?;
        if minute > 59 {
            bail!("illegal minute value '{value}'");
        }
        self.minutes |= 1 << minute;
        Ok(())
    }

    pub fn add_second(&mut self, value: &str) -> Result<()> {
        if value == "*" {
            self.seconds = u64::MAX;
            return Ok(());
        }
        let second: u64 = value
            .parse()
            .map_err(|_| anyhow!("illegal second value '{value}'"))?;
        if second > 59 {
            bail!("illegal second value '{value}'");
        }
        self.seconds |= 1 << second;
        Ok(())
    }

    /// Renders a component bitset back into its configured values.
    pub fn render_months(&self) -> Vec<String> {
        if self.months == u16::MAX {
            return vec!["*".to_string()];
        }
        MONTH_NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.months & (1 << bit) != 0)
            .map(|(_, name)| name.to_string())
            .collect()
    }

    pub fn render_days_of_month(&self) -> Vec<String> {
        if self.days_of_month == u32::MAX {
            return vec!["*".to_string()];
        }
        (1..32)
            .filter(|day| self.days_of_month & (1 << day) != 0)
            .map(|day| day.to_string())
            .collect()
    }

    pub fn render_days_of_week(&self) -> Vec<String> {
        if self.days_of_week == u8::MAX {
            return vec!["*".to_string()];
        }
        WEEKDAY_NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.days_of_week & (1 << bit) != 0)
            .map(|(_, name)| name.to_string())
            .collect()
    }

    pub fn render_hours(&self) -> Vec<String> {
        if self.hours == u32::MAX {
            return vec!["*".to_string()];
        }
        (0..24)
            .filter(|hour| self.hours & (1 << hour) != 0)
            .map(|hour| hour.to_string())
            .collect()
    }

    pub fn render_minutes(&self) -> Vec<String> {
        render_sixty(self.minutes)
    }

    pub fn render_seconds(&self) -> Vec<String> {
        render_sixty(self.seconds)
    }
}

fn render_sixty(bits: u64) -> Vec<String> {
    if bits == u64::MAX {
        return vec!["*".to_string()];
    }
    (0..60)
        .filter(|value| bits & (1u64 << value) != 0)
        .map(|value| value.to_string())
        .collect()
}

/// The trigger variant of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Periodic {
        interval: u32,
        start: Option<i64>,
        end: Option<i64>,
    },
    Calendar(CalendarSpec),
    OneOff {
        start: Option<i64>,
    },
    Immediate,
    Startup,
    ControllerLost,
    ControllerConnected,
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::Periodic { .. } => "periodic",
            EventKind::Calendar(_) => "calendar",
            EventKind::OneOff { .. } => "one-off",
            EventKind::Immediate => "immediate",
            EventKind::Startup => "startup",
            EventKind::ControllerLost => "controller-lost",
            EventKind::ControllerConnected => "controller-connected",
        }
    }

    /// One-off, immediate and startup events fire at most once; a schedule
    /// started by such an event is disabled after the fire.
    pub fn is_one_shot(&self) -> bool {
        matches!(
            self,
            EventKind::OneOff { .. } | EventKind::Immediate | EventKind::Startup
        )
    }
}

/// A named trigger referenced by schedules and suppressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub kind: EventKind,
    pub random_spread: Option<u32>,
    pub cycle_interval: Option<u32>,
}

impl Event {
    pub fn new(name: impl Into<String>, kind: EventKind) -> Self {
        Self {
            name: name.into(),
            kind,
            random_spread: None,
            cycle_interval: None,
        }
    }
}

/// One option of a task or action, passed on the command line in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskOption {
    pub id: String,
    pub name: Option<String>,
    pub value: Option<String>,
}

/// A function registry entry of a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    pub uri: String,
    pub roles: TagSet,
}

/// Definition of an invocable measurement program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Task {
    pub name: String,
    pub program: Option<String>,
    pub version: Option<String>,
    pub registries: Vec<Registry>,
    pub options: Vec<TaskOption>,
    pub tags: TagSet,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_registry(&mut self, registry: Registry) -> Result<()> {
        if registry.uri.is_empty() {
            bail!("unnamed registry");
        }
        if self.registries.iter().any(|r| r.uri == registry.uri) {
            bail!("duplicate registry '{}'", registry.uri);
        }
        self.registries.push(registry);
        Ok(())
    }

    pub fn add_option(&mut self, option: TaskOption) -> Result<()> {
        add_option(&mut self.options, option)
    }
}

fn add_option(options: &mut Vec<TaskOption>, option: TaskOption) -> Result<()> {
    if option.id.is_empty() {
        bail!("option requires an id");
    }
    if options.iter().any(|o| o.id == option.id) {
        bail!("duplicate option '{}'", option.id);
    }
    options.push(option);
    Ok(())
}

/// The leaf unit of execution: one program invocation bound to a task.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub name: String,
    pub task: Option<String>,
    pub destinations: TagSet,
    pub options: Vec<TaskOption>,
    pub tags: TagSet,
    pub suppression_tags: TagSet,

    pub state: EntityState,
    /// Pid of the running child, 0 when not running.
    pub pid: u32,
    pub storage: u64,
    pub cnt_invocations: u32,
    pub cnt_suppressions: u32,
    pub cnt_overlaps: u32,
    pub cnt_failures: u32,
    pub cnt_active_suppressions: u32,
    pub last_invocation: Option<i64>,
    pub last_completion: Option<i64>,
    pub last_status: i32,
    pub last_message: Option<String>,
    pub last_failed_completion: Option<i64>,
    pub last_failed_status: i32,
    pub last_failed_message: Option<String>,
    pub workspace: PathBuf,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: None,
            destinations: TagSet::new(),
            options: Vec::new(),
            tags: TagSet::new(),
            suppression_tags: TagSet::new(),
            state: EntityState::Enabled,
            pid: 0,
            storage: 0,
            cnt_invocations: 0,
            cnt_suppressions: 0,
            cnt_overlaps: 0,
            cnt_failures: 0,
            cnt_active_suppressions: 0,
            last_invocation: None,
            last_completion: None,
            last_status: 0,
            last_message: None,
            last_failed_completion: None,
            last_failed_status: 0,
            last_failed_message: None,
            workspace: PathBuf::new(),
        }
    }

    pub fn add_option(&mut self, option: TaskOption) -> Result<()> {
        add_option(&mut self.options, option)
    }
}

/// How a schedule is bounded: by an end event or by a fixed duration.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleEnd {
    Event(String),
    Duration(u64),
}

/// An ordered group of actions triggered by a start event.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub name: String,
    pub start: Option<String>,
    pub end: Option<ScheduleEnd>,
    pub mode: ExecutionMode,
    pub tags: TagSet,
    pub suppression_tags: TagSet,
    pub actions: Vec<Action>,

    pub state: EntityState,
    pub storage: u64,
    pub cnt_invocations: u32,
    pub cnt_suppressions: u32,
    pub cnt_overlaps: u32,
    pub cnt_failures: u32,
    pub cnt_active_suppressions: u32,
    pub last_invocation: Option<i64>,
    /// Wall-clock bucket stamp for the current run, 0 when unset.
    pub cycle_number: i64,
    pub stop_running: bool,
    pub workspace: PathBuf,
}

impl Schedule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            end: None,
            mode: ExecutionMode::Sequential,
            tags: TagSet::new(),
            suppression_tags: TagSet::new(),
            actions: Vec::new(),
            state: EntityState::Enabled,
            storage: 0,
            cnt_invocations: 0,
            cnt_suppressions: 0,
            cnt_overlaps: 0,
            cnt_failures: 0,
            cnt_active_suppressions: 0,
            last_invocation: None,
            cycle_number: 0,
            stop_running: false,
            workspace: PathBuf::new(),
        }
    }

    pub fn end_event(&self) -> Option<&str> {
        match &self.end {
            Some(ScheduleEnd::Event(name)) => Some(name),
            _ => None,
        }
    }

    pub fn duration(&self) -> Option<u64> {
        match &self.end {
            Some(ScheduleEnd::Duration(secs)) => Some(*secs),
            _ => None,
        }
    }
}

/// A glob-match over suppression tags that temporarily inhibits entities.
#[derive(Debug, Clone, PartialEq)]
pub struct Suppression {
    pub name: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub matches: TagSet,
    pub stop_running: Option<bool>,
    pub state: SuppressionState,
}

impl Suppression {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            end: None,
            matches: TagSet::new(),
            stop_running: None,
            state: SuppressionState::Enabled,
        }
    }
}

/// Self-description exposed in state dumps; carries the program allowlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capability {
    pub version: Option<String>,
    pub tags: TagSet,
    pub tasks: Vec<Task>,
}

impl Capability {
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if task.name.is_empty() {
            bail!("unnamed task");
        }
        if self.tasks.iter().any(|t| t.name == task.name) {
            bail!("duplicate task '{}'", task.name);
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Probes the host network stack and records the system tags.
    pub fn add_system_tags(&mut self) {
        if std::net::UdpSocket::bind(("127.0.0.1", 0)).is_ok() {
            self.tags.insert("system-ipv4-capable");
        }
        if std::net::UdpSocket::bind(("::1", 0)).is_ok() {
            self.tags.insert("system-ipv6-capable");
        }
    }

    /// Checks whether a program path is allow-listed.
    pub fn allows_program(&self, program: &str) -> bool {
        self.tasks
            .iter()
            .any(|t| t.program.as_deref() == Some(program))
    }
}

/// One row of values in a result table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultRow {
    pub values: Vec<String>,
}

/// A table of rows produced by one action invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultTable {
    pub rows: Vec<ResultRow>,
}

/// The in-memory form of one reported action invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementResult {
    pub schedule: Option<String>,
    pub action: Option<String>,
    pub task: Option<String>,
    pub options: Vec<TaskOption>,
    pub tags: TagSet,
    pub event: Option<i64>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub cycle_number: Option<String>,
    pub status: Option<i32>,
    pub tables: Vec<ResultTable>,
}

/// The root configuration aggregate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lmap {
    pub agent: Option<Agent>,
    pub capabilities: Option<Capability>,
    pub tasks: Vec<Task>,
    pub schedules: Vec<Schedule>,
    pub suppressions: Vec<Suppression>,
    pub events: Vec<Event>,
    pub results: Vec<MeasurementResult>,
}

impl Lmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_event(&self, name: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.name == name)
    }

    pub fn find_task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn find_schedule(&self, name: &str) -> Option<usize> {
        self.schedules.iter().position(|s| s.name == name)
    }

    pub fn add_event(&mut self, event: Event) -> Result<()> {
        if event.name.is_empty() {
            bail!("event requires a name");
        }
        if self.find_event(&event.name).is_some() {
            bail!("duplicate event '{}'", event.name);
        }
        self.events.push(event);
        Ok(())
    }

    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if task.name.is_empty() {
            bail!("task requires a name");
        }
        if self.find_task(&task.name).is_some() {
            bail!("duplicate task '{}'", task.name);
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn add_schedule(&mut self, schedule: Schedule) -> Result<()> {
        if schedule.name.is_empty() {
            bail!("schedule requires a name");
        }
        if self.find_schedule(&schedule.name).is_some() {
            bail!("duplicate schedule '{}'", schedule.name);
        }
        self.schedules.push(schedule);
        Ok(())
    }

    pub fn add_suppression(&mut self, suppression: Suppression) -> Result<()> {
        if suppression.name.is_empty() {
            bail!("suppression requires a name");
        }
        if self.suppressions.iter().any(|s| s.name == suppression.name) {
            bail!("duplicate suppression '{}'", suppression.name);
        }
        self.suppressions.push(suppression);
        Ok(())
    }

    /// Resolves a child pid back to its (schedule, action) index pair.
    pub fn find_action_by_pid(&self, pid: u32) -> Option<(usize, usize)> {
        for (si, schedule) in self.schedules.iter().enumerate() {
            for (ai, action) in schedule.actions.iter().enumerate() {
                if action.pid == pid {
                    return Some((si, ai));
                }
            }
        }
        None
    }

    /// Whether any schedule or suppression references the named event.
    pub fn event_is_referenced(&self, name: &str) -> bool {
        let by_schedule = self.schedules.iter().any(|s| {
            s.start.as_deref() == Some(name) || s.end_event() == Some(name)
        });
        let by_suppression = self
            .suppressions
            .iter()
            .any(|p| p.start.as_deref() == Some(name) || p.end.as_deref() == Some(name));
        by_schedule || by_suppression
    }
}

/// Parses an RFC-3339 timestamp into epoch seconds.
pub fn parse_datetime(value: &str) -> Result<i64> {
    let dt = DateTime::parse_from_rfc3339(value)
        .map_err(|e| anyhow!("illegal date-and-time value '{value}': {e}"))?;
    Ok(dt.timestamp())
}

/// Renders epoch seconds as an RFC-3339 timestamp with a numeric offset.
pub fn render_datetime(epoch: i64) -> String {
    match DateTime::<Utc>::from_timestamp(epoch, 0) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, false),
        None => String::new(),
    }
}

/// Parses a timezone offset of the form `Z`, `+HH:MM` or `-HH:MM` into
/// minutes east of UTC.
pub fn parse_timezone_offset(value: &str) -> Result<i32> {
    if value == "Z" || value == "z" {
        return Ok(0);
    }
    let bytes = value.as_bytes();
    if bytes.len() != 6 || bytes[3] != b':' {
        bail!("illegal timezone offset value '{value}'");
    }
    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => bail!("illegal timezone offset value '{value}'"),
    };
    let hours: i32 = value[1..3]
        .parse()
        .map_err(|_| anyhow!("illegal timezone offset value '{value}'"))?;
    let minutes: i32 = value[4..6]
        .parse()
        .map_err(|_| anyhow!("illegal timezone offset value '{value}'"))?;
    if hours > 23 || minutes > 59 {
        bail!("illegal timezone offset value '{value}'");
    }
    Ok(sign * (hours * 60 + minutes))
}

/// Renders a timezone offset in minutes as `±HH:MM`.
pub fn render_timezone_offset(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let abs = minutes.abs();
    format!("{}{:02}:{:02}", sign, abs / 60, abs % 60)
}

/// Breaks down an epoch instant in the given offset (minutes east of UTC).
pub fn localtime(epoch: i64, offset_minutes: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(offset_minutes * 60)?;
    DateTime::<Utc>::from_timestamp(epoch, 0).map(|dt| dt.with_timezone(&offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagset_preserves_order_and_uniqueness() {
        let mut tags = TagSet::new();
        assert!(tags.insert("red"));
        assert!(tags.insert("blue"));
        assert!(!tags.insert("red"));
        let collected: Vec<&str> = tags.iter().collect();
        assert_eq!(collected, vec!["red", "blue"]);
    }

    #[test]
    fn test_agent_id_validation() {
        let mut agent = Agent::default();
        assert!(agent
            .set_agent_id("550e8400-e29b-41d4-a716-446655440000")
            .is_ok());
        assert!(agent.set_agent_id("not-a-uuid").is_err());
        assert!(agent
            .set_agent_id("550e8400-e29b-41d4-a716-44665544000g")
            .is_err());
    }

    #[test]
    fn test_controller_timeout_default() {
        let mut agent = Agent::default();
        assert_eq!(agent.effective_controller_timeout(), 604_800);
        agent.controller_timeout = Some(60);
        assert_eq!(agent.effective_controller_timeout(), 60);
    }

    #[test]
    fn test_calendar_component_parsing() {
        let mut spec = CalendarSpec::default();
        spec.add_month("january").unwrap();
        spec.add_month("december").unwrap();
        assert_eq!(spec.months, (1 << 0) | (1 << 11));
        assert!(spec.add_month("januray").is_err());

        spec.add_day_of_month("1").unwrap();
        spec.add_day_of_month("31").unwrap();
        assert!(spec.add_day_of_month("0").is_err());
        assert!(spec.add_day_of_month("32").is_err());

        spec.add_day_of_week("monday").unwrap();
        assert_eq!(spec.days_of_week, 1);

        spec.add_hour("23").unwrap();
        assert!(spec.add_hour("24").is_err());
        spec.add_minute("59").unwrap();
        assert!(spec.add_minute("60").is_err());
        spec.add_second("0").unwrap();
    }

    #[test]
    fn test_calendar_wildcard_roundtrip() {
        let mut spec = CalendarSpec::default();
        spec.add_month("*").unwrap();
        spec.add_minute("5").unwrap();
        assert_eq!(spec.render_months(), vec!["*"]);
        assert_eq!(spec.render_minutes(), vec!["5"]);
    }

    #[test]
    fn test_option_id_unique_within_task() {
        let mut task = Task::new("ping");
        task.add_option(TaskOption {
            id: "target".to_string(),
            name: Some("-t".to_string()),
            value: Some("example.net".to_string()),
        })
        .unwrap();
        let err = task.add_option(TaskOption {
            id: "target".to_string(),
            ..Default::default()
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_datetime_roundtrip() {
        let epoch = parse_datetime("2024-01-01T00:05:00Z").unwrap();
        assert_eq!(epoch, 1704067500);
        assert_eq!(render_datetime(epoch), "2024-01-01T00:05:00+00:00");
        let with_offset = parse_datetime("2024-01-01T01:05:00+01:00").unwrap();
        assert_eq!(with_offset, epoch);
    }

    #[test]
    fn test_timezone_offset_parsing() {
        assert_eq!(parse_timezone_offset("Z").unwrap(), 0);
        assert_eq!(parse_timezone_offset("+01:30").unwrap(), 90);
        assert_eq!(parse_timezone_offset("-05:00").unwrap(), -300);
        assert!(parse_timezone_offset("+1:30").is_err());
        assert_eq!(render_timezone_offset(-300), "-05:00");
        assert_eq!(render_timezone_offset(90), "+01:30");
    }

    #[test]
    fn test_find_action_by_pid() {
        let mut lmap = Lmap::new();
        let mut schedule = Schedule::new("s1");
        let mut action = Action::new("a1");
        action.pid = 4711;
        schedule.actions.push(action);
        lmap.add_schedule(schedule).unwrap();

        assert_eq!(lmap.find_action_by_pid(4711), Some((0, 0)));
        assert_eq!(lmap.find_action_by_pid(4712), None);
    }

    #[test]
    fn test_capability_allowlist() {
        let mut cap = Capability::default();
        let mut task = Task::new("ping");
        task.program = Some("/usr/bin/ping".to_string());
        cap.add_task(task).unwrap();

        assert!(cap.allows_program("/usr/bin/ping"));
        assert!(!cap.allows_program("/usr/bin/rm"));
    }

    #[test]
    fn test_duplicate_entities_rejected() {
        let mut lmap = Lmap::new();
        lmap.add_event(Event::new("e", EventKind::Immediate)).unwrap();
        assert!(lmap.add_event(Event::new("e", EventKind::Startup)).is_err());
        lmap.add_task(Task::new("t")).unwrap();
        assert!(lmap.add_task(Task::new("t")).is_err());
        lmap.add_schedule(Schedule::new("s")).unwrap();
        assert!(lmap.add_schedule(Schedule::new("s")).is_err());
    }
}
