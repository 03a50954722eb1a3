//! XML encoding of the LMAP control and report models
//!
//! Configuration and state documents live in the
//! `urn:ietf:params:xml:ns:yang:ietf-lmap-control` namespace (prefix
//! `lmapc`), reports in `urn:ietf:params:xml:ns:yang:ietf-lmap-report`
//! (prefix `lmapr`). Rendering preserves insertion order everywhere so
//! that a rendered configuration parses back into an identical tree.
//!
//! The parser accepts configuration documents (`<config>` root) and state
//! documents (`<data>` root) alike: state-only leaves are simply absent
//! from configuration input.

use crate::model::{
    parse_datetime, parse_timezone_offset, render_datetime, render_timezone_offset, Action, Agent,
    CalendarSpec, Capability, EntityState, Event, EventKind, ExecutionMode, Lmap, Registry,
    Schedule, ScheduleEnd, Suppression, SuppressionState, Task, TaskOption,
};
use anyhow::{anyhow, bail, Context, Result};
use quick_xml::events::{BytesText, Event as XmlEvent};
use quick_xml::{Reader, Writer};
use std::fs;
use std::path::Path;
use tracing::warn;

pub const LMAPC_NAMESPACE: &str = "urn:ietf:params:xml:ns:yang:ietf-lmap-control";
pub const LMAPC_PREFIX: &str = "lmapc";
pub const LMAPR_NAMESPACE: &str = "urn:ietf:params:xml:ns:yang:ietf-lmap-report";
pub const LMAPR_PREFIX: &str = "lmapr";

/// A namespace-stripped element tree, small enough to map by hand.
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }
}

fn parse_tree(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().context("malformed XML document")? {
            XmlEvent::Start(start) => {
                let name =
                    String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                stack.push(Element {
                    name,
                    ..Default::default()
                });
            }
            XmlEvent::Empty(start) => {
                let name =
                    String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                let element = Element {
                    name,
                    ..Default::default()
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            XmlEvent::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape().context("bad character data")?);
                }
            }
            XmlEvent::End(_) => {
                let element = stack.pop().ok_or_else(|| anyhow!("unbalanced XML"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| anyhow!("empty XML document"))
}

/// Parses one configuration or state document and merges it into the tree.
pub fn parse_config_into(lmap: &mut Lmap, xml: &str) -> Result<()> {
    let root = parse_tree(xml)?;
    let lmap_el = if root.name == "lmap" {
        &root
    } else {
        root.child("lmap")
            .ok_or_else(|| anyhow!("document has no lmap element"))?
    };

    if let Some(capabilities) = lmap_el.child("capabilities") {
        let parsed = parse_capabilities(capabilities)?;
        match &mut lmap.capabilities {
            Some(existing) => merge_capabilities(existing, parsed)?,
            None => lmap.capabilities = Some(parsed),
        }
    }
    if let Some(agent) = lmap_el.child("agent") {
        lmap.agent = Some(parse_agent(agent)?);
    }
    if let Some(tasks) = lmap_el.child("tasks") {
        for task in tasks.children_named("task") {
            lmap.add_task(parse_task(task)?)?;
        }
    }
    if let Some(schedules) = lmap_el.child("schedules") {
        for schedule in schedules.children_named("schedule") {
            lmap.add_schedule(parse_schedule(schedule)?)?;
        }
    }
    if let Some(suppressions) = lmap_el.child("suppressions") {
        for suppression in suppressions.children_named("suppression") {
            lmap.add_suppression(parse_suppression(suppression)?)?;
        }
    }
    if let Some(events) = lmap_el.child("events") {
        for event in events.children_named("event") {
            lmap.add_event(parse_event(event)?)?;
        }
    }
    Ok(())
}

/// Parses a single document into a fresh tree.
pub fn parse_config(xml: &str) -> Result<Lmap> {
    let mut lmap = Lmap::new();
    parse_config_into(&mut lmap, xml)?;
    Ok(lmap)
}

/// Loads a configuration file, or every `*.xml` file of a configuration
/// directory in directory order, into one tree.
pub fn parse_config_path(lmap: &mut Lmap, path: &Path) -> Result<()> {
    let meta = fs::metadata(path)
        .with_context(|| format!("cannot access config path '{}'", path.display()))?;
    if !meta.is_dir() {
        let xml = fs::read_to_string(path)
            .with_context(|| format!("cannot read config file '{}'", path.display()))?;
        return parse_config_into(lmap, &xml)
            .with_context(|| format!("cannot parse config file '{}'", path.display()));
    }

    for entry in fs::read_dir(path)
        .with_context(|| format!("cannot open config directory '{}'", path.display()))?
        .flatten()
    {
        let file = entry.path();
        if file.extension().and_then(|e| e.to_str()) != Some("xml") {
            continue;
        }
        let xml = fs::read_to_string(&file)
            .with_context(|| format!("cannot read config file '{}'", file.display()))?;
        parse_config_into(lmap, &xml)
            .with_context(|| format!("cannot parse config file '{}'", file.display()))?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => bail!("illegal boolean value '{other}'"),
    }
}

fn parse_capabilities(element: &Element) -> Result<Capability> {
    let mut capability = Capability::default();
    if let Some(version) = element.text_of("version") {
        capability.version = Some(version.to_string());
    }
    for tag in element.children_named("tag") {
        capability.tags.insert(tag.text.as_str());
    }
    if let Some(tasks) = element.child("tasks") {
        for task in tasks.children_named("task") {
            capability.add_task(parse_task(task)?)?;
        }
    }
    Ok(capability)
}

fn merge_capabilities(existing: &mut Capability, parsed: Capability) -> Result<()> {
    if parsed.version.is_some() {
        existing.version = parsed.version;
    }
    for tag in parsed.tags.iter() {
        existing.tags.insert(tag);
    }
    for task in parsed.tasks {
        existing.add_task(task)?;
    }
    Ok(())
}

fn parse_agent(element: &Element) -> Result<Agent> {
    let mut agent = Agent::default();
    for child in &element.children {
        let value = child.text.as_str();
        match child.name.as_str() {
            "agent-id" => agent.set_agent_id(value)?,
            "group-id" => agent.group_id = Some(value.to_string()),
            "measurement-point" => agent.measurement_point = Some(value.to_string()),
            "report-agent-id" => agent.report_agent_id = Some(parse_bool(value)?),
            "report-group-id" => agent.report_group_id = Some(parse_bool(value)?),
            "report-measurement-point" => {
                agent.report_measurement_point = Some(parse_bool(value)?)
            }
            "controller-timeout" => {
                agent.controller_timeout = Some(
                    value
                        .parse()
                        .map_err(|_| anyhow!("illegal controller-timeout '{value}'"))?,
                )
            }
            "last-started" => agent.last_started = Some(parse_datetime(value)?),
            other => warn!(element = other, "ignoring unknown agent element"),
        }
    }
    Ok(agent)
}

fn parse_option(element: &Element) -> TaskOption {
    TaskOption {
        id: element.text_of("id").unwrap_or("").to_string(),
        name: element.text_of("name").map(str::to_string),
        value: element.text_of("value").map(str::to_string),
    }
}

fn parse_task(element: &Element) -> Result<Task> {
    let mut task = Task::new(element.text_of("name").unwrap_or(""));
    for child in &element.children {
        let value = child.text.as_str();
        match child.name.as_str() {
            "name" => {}
            "program" => task.program = Some(value.to_string()),
            "version" => task.version = Some(value.to_string()),
            "function" => {
                let mut registry = Registry {
                    uri: child.text_of("uri").unwrap_or("").to_string(),
                    ..Default::default()
                };
                for role in child.children_named("role") {
                    registry.roles.insert(role.text.as_str());
                }
                task.add_registry(registry)?;
            }
            "option" => task.add_option(parse_option(child))?,
            "tag" => {
                task.tags.insert(value);
            }
            other => warn!(element = other, "ignoring unknown task element"),
        }
    }
    Ok(task)
}

fn parse_action(element: &Element) -> Result<Action> {
    let mut action = Action::new(element.text_of("name").unwrap_or(""));
    for child in &element.children {
        let value = child.text.as_str();
        match child.name.as_str() {
            "name" => {}
            "task" => action.task = Some(value.to_string()),
            "destination" => {
                action.destinations.insert(value);
            }
            "option" => action.add_option(parse_option(child))?,
            "tag" => {
                action.tags.insert(value);
            }
            "suppression-tag" => {
                action.suppression_tags.insert(value);
            }
            "state" => action.state = EntityState::parse(value)?,
            "storage" => action.storage = value.parse().unwrap_or(0),
            "invocations" => action.cnt_invocations = value.parse().unwrap_or(0),
            "suppressions" => action.cnt_suppressions = value.parse().unwrap_or(0),
            "overlaps" => action.cnt_overlaps = value.parse().unwrap_or(0),
            "failures" => action.cnt_failures = value.parse().unwrap_or(0),
            "last-invocation" => action.last_invocation = Some(parse_datetime(value)?),
            "last-completion" => action.last_completion = Some(parse_datetime(value)?),
            "last-status" => action.last_status = value.parse().unwrap_or(0),
            "last-message" => action.last_message = Some(value.to_string()),
            "last-failed-completion" => {
                action.last_failed_completion = Some(parse_datetime(value)?)
            }
            "last-failed-status" => action.last_failed_status = value.parse().unwrap_or(0),
            "last-failed-message" => action.last_failed_message = Some(value.to_string()),
            other => warn!(element = other, "ignoring unknown action element"),
        }
    }
    Ok(action)
}

fn parse_schedule(element: &Element) -> Result<Schedule> {
    let mut schedule = Schedule::new(element.text_of("name").unwrap_or(""));
    for child in &element.children {
        let value = child.text.as_str();
        match child.name.as_str() {
            "name" => {}
            "start" => schedule.start = Some(value.to_string()),
            "end" => schedule.end = Some(ScheduleEnd::Event(value.to_string())),
            "duration" => {
                schedule.end = Some(ScheduleEnd::Duration(
                    value
                        .parse()
                        .map_err(|_| anyhow!("illegal duration '{value}'"))?,
                ))
            }
            "execution-mode" => schedule.mode = ExecutionMode::parse(value)?,
            "tag" => {
                schedule.tags.insert(value);
            }
            "suppression-tag" => {
                schedule.suppression_tags.insert(value);
            }
            "action" => schedule.actions.push(parse_action(child)?),
            "state" => schedule.state = EntityState::parse(value)?,
            "storage" => schedule.storage = value.parse().unwrap_or(0),
            "invocations" => schedule.cnt_invocations = value.parse().unwrap_or(0),
            "suppressions" => schedule.cnt_suppressions = value.parse().unwrap_or(0),
            "overlaps" => schedule.cnt_overlaps = value.parse().unwrap_or(0),
            "failures" => schedule.cnt_failures = value.parse().unwrap_or(0),
            "last-invocation" => schedule.last_invocation = Some(parse_datetime(value)?),
            other => warn!(element = other, "ignoring unknown schedule element"),
        }
    }
    Ok(schedule)
}

fn parse_suppression(element: &Element) -> Result<Suppression> {
    let mut suppression = Suppression::new(element.text_of("name").unwrap_or(""));
    for child in &element.children {
        let value = child.text.as_str();
        match child.name.as_str() {
            "name" => {}
            "start" => suppression.start = Some(value.to_string()),
            "end" => suppression.end = Some(value.to_string()),
            "match" => {
                suppression.matches.insert(value);
            }
            "stop-running" => suppression.stop_running = Some(parse_bool(value)?),
            "state" => suppression.state = SuppressionState::parse(value)?,
            other => warn!(element = other, "ignoring unknown suppression element"),
        }
    }
    Ok(suppression)
}

fn parse_event(element: &Element) -> Result<Event> {
    let name = element.text_of("name").unwrap_or("").to_string();

    let kind = if let Some(periodic) = element.child("periodic") {
        EventKind::Periodic {
            interval: periodic
                .text_of("interval")
                .unwrap_or("0")
                .parse()
                .map_err(|_| anyhow!("illegal interval for event '{name}'"))?,
            start: periodic
                .text_of("start")
                .map(parse_datetime)
                .transpose()?,
            end: periodic.text_of("end").map(parse_datetime).transpose()?,
        }
    } else if let Some(calendar) = element.child("calendar") {
        let mut spec = CalendarSpec::default();
        for child in &calendar.children {
            let value = child.text.as_str();
            match child.name.as_str() {
                "month" => spec.add_month(value)?,
                "day-of-month" => spec.add_day_of_month(value)?,
                "day-of-week" => spec.add_day_of_week(value)?,
                "hour" => spec.add_hour(value)?,
                "minute" => spec.add_minute(value)?,
                "second" => spec.add_second(value)?,
                "timezone-offset" => {
                    spec.timezone_offset = Some(parse_timezone_offset(value)?)
                }
                "start" => spec.start = Some(parse_datetime(value)?),
                "end" => spec.end = Some(parse_datetime(value)?),
                other => warn!(element = other, "ignoring unknown calendar element"),
            }
        }
        EventKind::Calendar(spec)
    } else if let Some(one_off) = element.child("one-off") {
        EventKind::OneOff {
            start: one_off.text_of("time").map(parse_datetime).transpose()?,
        }
    } else if element.child("startup").is_some() {
        EventKind::Startup
    } else if element.child("immediate").is_some() {
        EventKind::Immediate
    } else if element.child("controller-lost").is_some() {
        EventKind::ControllerLost
    } else if element.child("controller-connected").is_some() {
        EventKind::ControllerConnected
    } else {
        bail!("event '{name}' requires a type");
    };

    let mut event = Event::new(name, kind);
    if let Some(spread) = element.text_of("random-spread") {
        event.random_spread = Some(
            spread
                .parse()
                .map_err(|_| anyhow!("illegal random-spread '{spread}'"))?,
        );
    }
    if let Some(interval) = element.text_of("cycle-interval") {
        event.cycle_interval = Some(
            interval
                .parse()
                .map_err(|_| anyhow!("illegal cycle-interval '{interval}'"))?,
        );
    }
    Ok(event)
}

// --- rendering ---------------------------------------------------------

type XmlWriter = Writer<Vec<u8>>;
type XmlResult = std::result::Result<(), quick_xml::Error>;

/// Which view of the tree to render.
#[derive(Clone, Copy, PartialEq, Eq)]
enum View {
    Config,
    State,
}

fn qualified(name: &str) -> String {
    format!("{LMAPC_PREFIX}:{name}")
}

fn leaf(writer: &mut XmlWriter, name: &str, value: &str) -> XmlResult {
    writer
        .create_element(&qualified(name))
        .write_text_content(BytesText::new(value))?;
    Ok(())
}

fn empty_leaf(writer: &mut XmlWriter, name: &str) -> XmlResult {
    writer.create_element(&qualified(name)).write_empty()?;
    Ok(())
}

fn leaf_u32(writer: &mut XmlWriter, name: &str, value: u32) -> XmlResult {
    leaf(writer, name, &value.to_string())
}

fn leaf_u64(writer: &mut XmlWriter, name: &str, value: u64) -> XmlResult {
    leaf(writer, name, &value.to_string())
}

fn leaf_datetime(writer: &mut XmlWriter, name: &str, epoch: i64) -> XmlResult {
    leaf(writer, name, &render_datetime(epoch))
}

fn render_options(writer: &mut XmlWriter, options: &[TaskOption]) -> XmlResult {
    for option in options {
        writer
            .create_element(&qualified("option"))
            .write_inner_content(|w| -> XmlResult {
                leaf(w, "id", &option.id)?;
                if let Some(name) = &option.name {
                    leaf(w, "name", name)?;
                }
                if let Some(value) = &option.value {
                    leaf(w, "value", value)?;
                }
                Ok(())
            })?;
    }
    Ok(())
}

fn render_agent(writer: &mut XmlWriter, agent: &Agent, view: View) -> XmlResult {
    writer
        .create_element(&qualified("agent"))
        .write_inner_content(|w| -> XmlResult {
            if let Some(agent_id) = &agent.agent_id {
                leaf(w, "agent-id", agent_id)?;
            }
            if let Some(group_id) = &agent.group_id {
                leaf(w, "group-id", group_id)?;
            }
            if let Some(point) = &agent.measurement_point {
                leaf(w, "measurement-point", point)?;
            }
            if let Some(flag) = agent.report_agent_id {
                leaf(w, "report-agent-id", if flag { "true" } else { "false" })?;
            }
            if let Some(flag) = agent.report_group_id {
                leaf(w, "report-group-id", if flag { "true" } else { "false" })?;
            }
            if let Some(flag) = agent.report_measurement_point {
                leaf(
                    w,
                    "report-measurement-point",
                    if flag { "true" } else { "false" },
                )?;
            }
            if let Some(timeout) = agent.controller_timeout {
                leaf_u32(w, "controller-timeout", timeout)?;
            }
            if view == View::State {
                if let Some(last_started) = agent.last_started {
                    leaf_datetime(w, "last-started", last_started)?;
                }
            }
            Ok(())
        })?;
    Ok(())
}

fn render_task(writer: &mut XmlWriter, task: &Task, view: View) -> XmlResult {
    writer
        .create_element(&qualified("task"))
        .write_inner_content(|w| -> XmlResult {
            leaf(w, "name", &task.name)?;
            for registry in &task.registries {
                w.create_element(&qualified("function"))
                    .write_inner_content(|w| -> XmlResult {
                        leaf(w, "uri", &registry.uri)?;
                        for role in registry.roles.iter() {
                            leaf(w, "role", role)?;
                        }
                        Ok(())
                    })?;
            }
            if view == View::State {
                if let Some(version) = &task.version {
                    leaf(w, "version", version)?;
                }
            }
            if let Some(program) = &task.program {
                leaf(w, "program", program)?;
            }
            render_options(w, &task.options)?;
            for tag in task.tags.iter() {
                leaf(w, "tag", tag)?;
            }
            Ok(())
        })?;
    Ok(())
}

fn render_tasks(writer: &mut XmlWriter, tasks: &[Task], view: View) -> XmlResult {
    if tasks.is_empty() {
        return Ok(());
    }
    writer
        .create_element(&qualified("tasks"))
        .write_inner_content(|w| -> XmlResult {
            for task in tasks {
                render_task(w, task, view)?;
            }
            Ok(())
        })?;
    Ok(())
}

fn render_capabilities(writer: &mut XmlWriter, capability: &Capability, view: View) -> XmlResult {
    if view != View::State {
        return Ok(());
    }
    if capability.version.is_none() && capability.tags.is_empty() && capability.tasks.is_empty() {
        return Ok(());
    }
    writer
        .create_element(&qualified("capabilities"))
        .write_inner_content(|w| -> XmlResult {
            if let Some(version) = &capability.version {
                leaf(w, "version", version)?;
            }
            for tag in capability.tags.iter() {
                leaf(w, "tag", tag)?;
            }
            render_tasks(w, &capability.tasks, view)?;
            Ok(())
        })?;
    Ok(())
}

fn render_action(writer: &mut XmlWriter, action: &Action, view: View) -> XmlResult {
    writer
        .create_element(&qualified("action"))
        .write_inner_content(|w| -> XmlResult {
            leaf(w, "name", &action.name)?;
            if let Some(task) = &action.task {
                leaf(w, "task", task)?;
            }
            for destination in action.destinations.iter() {
                leaf(w, "destination", destination)?;
            }
            render_options(w, &action.options)?;
            for tag in action.tags.iter() {
                leaf(w, "tag", tag)?;
            }
            for tag in action.suppression_tags.iter() {
                leaf(w, "suppression-tag", tag)?;
            }
            if view == View::State {
                leaf(w, "state", action.state.as_str())?;
                leaf_u64(w, "storage", action.storage)?;
                leaf_u32(w, "invocations", action.cnt_invocations)?;
                leaf_u32(w, "suppressions", action.cnt_suppressions)?;
                leaf_u32(w, "overlaps", action.cnt_overlaps)?;
                leaf_u32(w, "failures", action.cnt_failures)?;
                if let Some(last_invocation) = action.last_invocation {
                    leaf_datetime(w, "last-invocation", last_invocation)?;
                }
                if let Some(last_completion) = action.last_completion {
                    leaf_datetime(w, "last-completion", last_completion)?;
                    leaf(w, "last-status", &action.last_status.to_string())?;
                    if let Some(message) = &action.last_message {
                        leaf(w, "last-message", message)?;
                    }
                }
                if let Some(last_failed) = action.last_failed_completion {
                    leaf_datetime(w, "last-failed-completion", last_failed)?;
                    leaf(
                        w,
                        "last-failed-status",
                        &action.last_failed_status.to_string(),
                    )?;
                    if let Some(message) = &action.last_failed_message {
                        leaf(w, "last-failed-message", message)?;
                    }
                }
            }
            Ok(())
        })?;
    Ok(())
}

fn render_schedules(writer: &mut XmlWriter, schedules: &[Schedule], view: View) -> XmlResult {
    if schedules.is_empty() {
        return Ok(());
    }
    writer
        .create_element(&qualified("schedules"))
        .write_inner_content(|w| -> XmlResult {
            for schedule in schedules {
                w.create_element(&qualified("schedule"))
                    .write_inner_content(|w| -> XmlResult {
                        leaf(w, "name", &schedule.name)?;
                        if let Some(start) = &schedule.start {
                            leaf(w, "start", start)?;
                        }
                        match &schedule.end {
                            Some(ScheduleEnd::Event(end)) => leaf(w, "end", end)?,
                            Some(ScheduleEnd::Duration(duration)) => {
                                leaf_u64(w, "duration", *duration)?
                            }
                            None => {}
                        }
                        leaf(w, "execution-mode", schedule.mode.as_str())?;
                        for tag in schedule.tags.iter() {
                            leaf(w, "tag", tag)?;
                        }
                        for tag in schedule.suppression_tags.iter() {
                            leaf(w, "suppression-tag", tag)?;
                        }
                        if view == View::State {
                            leaf(w, "state", schedule.state.as_str())?;
                            leaf_u64(w, "storage", schedule.storage)?;
                            leaf_u32(w, "invocations", schedule.cnt_invocations)?;
                            leaf_u32(w, "suppressions", schedule.cnt_suppressions)?;
                            leaf_u32(w, "overlaps", schedule.cnt_overlaps)?;
                            leaf_u32(w, "failures", schedule.cnt_failures)?;
                            if let Some(last_invocation) = schedule.last_invocation {
                                leaf_datetime(w, "last-invocation", last_invocation)?;
                            }
                        }
                        for action in &schedule.actions {
                            render_action(w, action, view)?;
                        }
                        Ok(())
                    })?;
            }
            Ok(())
        })?;
    Ok(())
}

fn render_suppressions(
    writer: &mut XmlWriter,
    suppressions: &[Suppression],
    view: View,
) -> XmlResult {
    if suppressions.is_empty() {
        return Ok(());
    }
    writer
        .create_element(&qualified("suppressions"))
        .write_inner_content(|w| -> XmlResult {
            for suppression in suppressions {
                w.create_element(&qualified("suppression"))
                    .write_inner_content(|w| -> XmlResult {
                        leaf(w, "name", &suppression.name)?;
                        if let Some(start) = &suppression.start {
                            leaf(w, "start", start)?;
                        }
                        if let Some(end) = &suppression.end {
                            leaf(w, "end", end)?;
                        }
                        for pattern in suppression.matches.iter() {
                            leaf(w, "match", pattern)?;
                        }
                        if let Some(stop_running) = suppression.stop_running {
                            leaf(
                                w,
                                "stop-running",
                                if stop_running { "true" } else { "false" },
                            )?;
                        }
                        if view == View::State {
                            leaf(w, "state", suppression.state.as_str())?;
                        }
                        Ok(())
                    })?;
            }
            Ok(())
        })?;
    Ok(())
}

fn render_calendar(writer: &mut XmlWriter, spec: &CalendarSpec) -> XmlResult {
    writer
        .create_element(&qualified("calendar"))
        .write_inner_content(|w| -> XmlResult {
            for month in spec.render_months() {
                leaf(w, "month", &month)?;
            }
            for day in spec.render_days_of_month() {
                leaf(w, "day-of-month", &day)?;
            }
            for day in spec.render_days_of_week() {
                leaf(w, "day-of-week", &day)?;
            }
            for hour in spec.render_hours() {
                leaf(w, "hour", &hour)?;
            }
            for minute in spec.render_minutes() {
                leaf(w, "minute", &minute)?;
            }
            for second in spec.render_seconds() {
                leaf(w, "second", &second)?;
            }
            if let Some(offset) = spec.timezone_offset {
                leaf(w, "timezone-offset", &render_timezone_offset(offset))?;
            }
            if let Some(start) = spec.start {
                leaf_datetime(w, "start", start)?;
            }
            if let Some(end) = spec.end {
                leaf_datetime(w, "end", end)?;
            }
            Ok(())
        })?;
    Ok(())
}

fn render_events(writer: &mut XmlWriter, events: &[Event]) -> XmlResult {
    if events.is_empty() {
        return Ok(());
    }
    writer
        .create_element(&qualified("events"))
        .write_inner_content(|w| -> XmlResult {
            for event in events {
                w.create_element(&qualified("event"))
                    .write_inner_content(|w| -> XmlResult {
                        leaf(w, "name", &event.name)?;
                        if let Some(spread) = event.random_spread {
                            leaf_u32(w, "random-spread", spread)?;
                        }
                        if let Some(interval) = event.cycle_interval {
                            leaf_u32(w, "cycle-interval", interval)?;
                        }
                        match &event.kind {
                            EventKind::Periodic {
                                interval,
                                start,
                                end,
                            } => {
                                w.create_element(&qualified("periodic"))
                                    .write_inner_content(|w| -> XmlResult {
                                        leaf_u32(w, "interval", *interval)?;
                                        if let Some(start) = start {
                                            leaf_datetime(w, "start", *start)?;
                                        }
                                        if let Some(end) = end {
                                            leaf_datetime(w, "end", *end)?;
                                        }
                                        Ok(())
                                    })?;
                            }
                            EventKind::Calendar(spec) => render_calendar(w, spec)?,
                            EventKind::OneOff { start } => {
                                w.create_element(&qualified("one-off"))
                                    .write_inner_content(|w| -> XmlResult {
                                        if let Some(start) = start {
                                            leaf_datetime(w, "time", *start)?;
                                        }
                                        Ok(())
                                    })?;
                            }
                            EventKind::Startup => empty_leaf(w, "startup")?,
                            EventKind::Immediate => empty_leaf(w, "immediate")?,
                            EventKind::ControllerLost => empty_leaf(w, "controller-lost")?,
                            EventKind::ControllerConnected => {
                                empty_leaf(w, "controller-connected")?
                            }
                        }
                        Ok(())
                    })?;
            }
            Ok(())
        })?;
    Ok(())
}

fn render_document(lmap: &Lmap, view: View) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let root = match view {
        View::Config => "config",
        View::State => "data",
    };

    writer
        .create_element(&root)
        .write_inner_content(|w| -> XmlResult {
            w.create_element(&qualified("lmap"))
                .with_attribute(("xmlns:lmapc", LMAPC_NAMESPACE))
                .write_inner_content(|w| -> XmlResult {
                    if let Some(capability) = &lmap.capabilities {
                        render_capabilities(w, capability, view)?;
                    }
                    if let Some(agent) = &lmap.agent {
                        render_agent(w, agent, view)?;
                    }
                    render_tasks(w, &lmap.tasks, view)?;
                    render_schedules(w, &lmap.schedules, view)?;
                    render_suppressions(w, &lmap.suppressions, view)?;
                    render_events(w, &lmap.events)?;
                    Ok(())
                })?;
            Ok(())
        })
        .context("failed to render document")?;

    String::from_utf8(writer.into_inner()).context("rendered document is not UTF-8")
}

/// Renders the configuration view (config-true leaves only).
pub fn render_config(lmap: &Lmap) -> Result<String> {
    render_document(lmap, View::Config)
}

/// Renders the state view (configuration plus runtime leaves).
pub fn render_state(lmap: &Lmap) -> Result<String> {
    render_document(lmap, View::State)
}

/// Renders the report document from the accumulated results.
pub fn render_report(lmap: &Lmap) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let report = format!("{LMAPR_PREFIX}:report");
    let rleaf = |w: &mut XmlWriter, name: &str, value: &str| -> XmlResult {
        w.create_element(&format!("{LMAPR_PREFIX}:{name}"))
            .write_text_content(BytesText::new(value))?;
        Ok(())
    };

    writer
        .create_element("rpc")
        .write_inner_content(|w| -> XmlResult {
            w.create_element(report.as_str())
                .with_attribute(("xmlns:lmapr", LMAPR_NAMESPACE))
                .write_inner_content(|w| -> XmlResult {
                    if let Some(agent) = &lmap.agent {
                        if let Some(date) = agent.report_date {
                            rleaf(w, "date", &render_datetime(date))?;
                        }
                        if agent.report_agent_id == Some(true) {
                            if let Some(agent_id) = &agent.agent_id {
                                rleaf(w, "agent-id", agent_id)?;
                            }
                        }
                        if agent.report_group_id == Some(true) {
                            if let Some(group_id) = &agent.group_id {
                                rleaf(w, "group-id", group_id)?;
                            }
                        }
                        if agent.report_measurement_point == Some(true) {
                            if let Some(point) = &agent.measurement_point {
                                rleaf(w, "measurement-point", point)?;
                            }
                        }
                    }
                    for result in &lmap.results {
                        w.create_element(&format!("{LMAPR_PREFIX}:result"))
                            .write_inner_content(|w| -> XmlResult {
                                if let Some(schedule) = &result.schedule {
                                    rleaf(w, "schedule", schedule)?;
                                }
                                if let Some(action) = &result.action {
                                    rleaf(w, "action", action)?;
                                }
                                if let Some(task) = &result.task {
                                    rleaf(w, "task", task)?;
                                }
                                for option in &result.options {
                                    w.create_element(&format!("{LMAPR_PREFIX}:option"))
                                        .write_inner_content(|w| -> XmlResult {
                                            rleaf(w, "id", &option.id)?;
                                            if let Some(name) = &option.name {
                                                rleaf(w, "name", name)?;
                                            }
                                            if let Some(value) = &option.value {
                                                rleaf(w, "value", value)?;
                                            }
                                            Ok(())
                                        })?;
                                }
                                for tag in result.tags.iter() {
                                    rleaf(w, "tag", tag)?;
                                }
                                if let Some(event) = result.event {
                                    rleaf(w, "event", &render_datetime(event))?;
                                }
                                if let Some(start) = result.start {
                                    rleaf(w, "start", &render_datetime(start))?;
                                }
                                if let Some(end) = result.end {
                                    rleaf(w, "end", &render_datetime(end))?;
                                }
                                if let Some(cycle_number) = &result.cycle_number {
                                    rleaf(w, "cycle-number", cycle_number)?;
                                }
                                if let Some(status) = result.status {
                                    rleaf(w, "status", &status.to_string())?;
                                }
                                for table in &result.tables {
                                    w.create_element(&format!("{LMAPR_PREFIX}:table"))
                                        .write_inner_content(|w| -> XmlResult {
                                            for row in &table.rows {
                                                w.create_element(&format!(
                                                    "{LMAPR_PREFIX}:row"
                                                ))
                                                .write_inner_content(|w| -> XmlResult {
                                                    for value in &row.values {
                                                        rleaf(w, "value", value)?;
                                                    }
                                                    Ok(())
                                                })?;
                                            }
                                            Ok(())
                                        })?;
                                }
                                Ok(())
                            })?;
                    }
                    Ok(())
                })?;
            Ok(())
        })
        .context("failed to render report")?;

    String::from_utf8(writer.into_inner()).context("rendered report is not UTF-8")
}
