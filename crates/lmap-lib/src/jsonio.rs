//! JSON encoding of the LMAP control and report models
//!
//! Mirrors the XML documents with the YANG JSON namespace keys
//! `ietf-lmap-control:lmap` and `ietf-lmap-report:report`. Only present
//! fields are emitted, in the same order as the XML rendering; a YANG
//! empty leaf (the immediate/startup event markers) is encoded as
//! `[null]`.

use crate::model::{
    render_datetime, render_timezone_offset, Action, Agent, Capability, Event, EventKind, Lmap,
    MeasurementResult, Schedule, ScheduleEnd, Suppression, Task, TaskOption,
};
use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

fn insert_options(object: &mut Map<String, Value>, options: &[TaskOption]) {
    if options.is_empty() {
        return;
    }
    let rendered: Vec<Value> = options
        .iter()
        .map(|option| {
            let mut entry = Map::new();
            entry.insert("id".to_string(), json!(option.id));
            if let Some(name) = &option.name {
                entry.insert("name".to_string(), json!(name));
            }
            if let Some(value) = &option.value {
                entry.insert("value".to_string(), json!(value));
            }
            Value::Object(entry)
        })
        .collect();
    object.insert("option".to_string(), Value::Array(rendered));
}

fn insert_tags(object: &mut Map<String, Value>, key: &str, tags: &crate::model::TagSet) {
    if tags.is_empty() {
        return;
    }
    let rendered: Vec<&str> = tags.iter().collect();
    object.insert(key.to_string(), json!(rendered));
}

fn render_agent(agent: &Agent, state: bool) -> Value {
    let mut object = Map::new();
    if let Some(agent_id) = &agent.agent_id {
        object.insert("agent-id".to_string(), json!(agent_id));
    }
    if let Some(group_id) = &agent.group_id {
        object.insert("group-id".to_string(), json!(group_id));
    }
    if let Some(point) = &agent.measurement_point {
        object.insert("measurement-point".to_string(), json!(point));
    }
    if let Some(flag) = agent.report_agent_id {
        object.insert("report-agent-id".to_string(), json!(flag));
    }
    if let Some(flag) = agent.report_group_id {
        object.insert("report-group-id".to_string(), json!(flag));
    }
    if let Some(flag) = agent.report_measurement_point {
        object.insert("report-measurement-point".to_string(), json!(flag));
    }
    if let Some(timeout) = agent.controller_timeout {
        object.insert("controller-timeout".to_string(), json!(timeout));
    }
    if state {
        if let Some(last_started) = agent.last_started {
            object.insert(
                "last-started".to_string(),
                json!(render_datetime(last_started)),
            );
        }
    }
    Value::Object(object)
}

fn render_task(task: &Task, state: bool) -> Value {
    let mut object = Map::new();
    object.insert("name".to_string(), json!(task.name));
    if !task.registries.is_empty() {
        let functions: Vec<Value> = task
            .registries
            .iter()
            .map(|registry| {
                let mut entry = Map::new();
                entry.insert("uri".to_string(), json!(registry.uri));
                insert_tags(&mut entry, "role", &registry.roles);
                Value::Object(entry)
            })
            .collect();
        object.insert("function".to_string(), Value::Array(functions));
    }
    if state {
        if let Some(version) = &task.version {
            object.insert("version".to_string(), json!(version));
        }
    }
    if let Some(program) = &task.program {
        object.insert("program".to_string(), json!(program));
    }
    insert_options(&mut object, &task.options);
    insert_tags(&mut object, "tag", &task.tags);
    Value::Object(object)
}

fn render_action_json(action: &Action, state: bool) -> Value {
    let mut object = Map::new();
    object.insert("name".to_string(), json!(action.name));
    if let Some(task) = &action.task {
        object.insert("task".to_string(), json!(task));
    }
    insert_tags(&mut object, "destination", &action.destinations);
    insert_options(&mut object, &action.options);
    insert_tags(&mut object, "tag", &action.tags);
    insert_tags(&mut object, "suppression-tag", &action.suppression_tags);
    if state {
        object.insert("state".to_string(), json!(action.state.as_str()));
        object.insert("storage".to_string(), json!(action.storage));
        object.insert("invocations".to_string(), json!(action.cnt_invocations));
        object.insert("suppressions".to_string(), json!(action.cnt_suppressions));
        object.insert("overlaps".to_string(), json!(action.cnt_overlaps));
        object.insert("failures".to_string(), json!(action.cnt_failures));
        if let Some(last_invocation) = action.last_invocation {
            object.insert(
                "last-invocation".to_string(),
                json!(render_datetime(last_invocation)),
            );
        }
        if let Some(last_completion) = action.last_completion {
            object.insert(
                "last-completion".to_string(),
                json!(render_datetime(last_completion)),
            );
            object.insert("last-status".to_string(), json!(action.last_status));
        }
        if let Some(last_failed) = action.last_failed_completion {
            object.insert(
                "last-failed-completion".to_string(),
                json!(render_datetime(last_failed)),
            );
            object.insert(
                "last-failed-status".to_string(),
                json!(action.last_failed_status),
            );
        }
    }
    Value::Object(object)
}

fn render_schedule(schedule: &Schedule, state: bool) -> Value {
    let mut object = Map::new();
    object.insert("name".to_string(), json!(schedule.name));
    if let Some(start) = &schedule.start {
        object.insert("start".to_string(), json!(start));
    }
    match &schedule.end {
        Some(ScheduleEnd::Event(end)) => {
            object.insert("end".to_string(), json!(end));
        }
        Some(ScheduleEnd::Duration(duration)) => {
            object.insert("duration".to_string(), json!(duration));
        }
        None => {}
    }
    object.insert("execution-mode".to_string(), json!(schedule.mode.as_str()));
    insert_tags(&mut object, "tag", &schedule.tags);
    insert_tags(&mut object, "suppression-tag", &schedule.suppression_tags);
    if state {
        object.insert("state".to_string(), json!(schedule.state.as_str()));
        object.insert("storage".to_string(), json!(schedule.storage));
        object.insert("invocations".to_string(), json!(schedule.cnt_invocations));
        object.insert(
            "suppressions".to_string(),
            json!(schedule.cnt_suppressions),
        );
        object.insert("overlaps".to_string(), json!(schedule.cnt_overlaps));
        object.insert("failures".to_string(), json!(schedule.cnt_failures));
        if let Some(last_invocation) = schedule.last_invocation {
            object.insert(
                "last-invocation".to_string(),
                json!(render_datetime(last_invocation)),
            );
        }
    }
    if !schedule.actions.is_empty() {
        let actions: Vec<Value> = schedule
            .actions
            .iter()
            .map(|action| render_action_json(action, state))
            .collect();
        object.insert("action".to_string(), Value::Array(actions));
    }
    Value::Object(object)
}

fn render_suppression(suppression: &Suppression, state: bool) -> Value {
    let mut object = Map::new();
    object.insert("name".to_string(), json!(suppression.name));
    if let Some(start) = &suppression.start {
        object.insert("start".to_string(), json!(start));
    }
    if let Some(end) = &suppression.end {
        object.insert("end".to_string(), json!(end));
    }
    insert_tags(&mut object, "match", &suppression.matches);
    if let Some(stop_running) = suppression.stop_running {
        object.insert("stop-running".to_string(), json!(stop_running));
    }
    if state {
        object.insert("state".to_string(), json!(suppression.state.as_str()));
    }
    Value::Object(object)
}

/// A YANG empty leaf in its JSON encoding.
fn empty_leaf() -> Value {
    json!([null])
}

fn render_event(event: &Event) -> Value {
    let mut object = Map::new();
    object.insert("name".to_string(), json!(event.name));
    if let Some(spread) = event.random_spread {
        object.insert("random-spread".to_string(), json!(spread));
    }
    if let Some(interval) = event.cycle_interval {
        object.insert("cycle-interval".to_string(), json!(interval));
    }
    match &event.kind {
        EventKind::Periodic {
            interval,
            start,
            end,
        } => {
            let mut periodic = Map::new();
            periodic.insert("interval".to_string(), json!(interval));
            if let Some(start) = start {
                periodic.insert("start".to_string(), json!(render_datetime(*start)));
            }
            if let Some(end) = end {
                periodic.insert("end".to_string(), json!(render_datetime(*end)));
            }
            object.insert("periodic".to_string(), Value::Object(periodic));
        }
        EventKind::Calendar(spec) => {
            let mut calendar = Map::new();
            calendar.insert("month".to_string(), json!(spec.render_months()));
            calendar.insert("day-of-month".to_string(), json!(spec.render_days_of_month()));
            calendar.insert("day-of-week".to_string(), json!(spec.render_days_of_week()));
            calendar.insert("hour".to_string(), json!(spec.render_hours()));
            calendar.insert("minute".to_string(), json!(spec.render_minutes()));
            calendar.insert("second".to_string(), json!(spec.render_seconds()));
            if let Some(offset) = spec.timezone_offset {
                calendar.insert(
                    "timezone-offset".to_string(),
                    json!(render_timezone_offset(offset)),
                );
            }
            if let Some(start) = spec.start {
                calendar.insert("start".to_string(), json!(render_datetime(start)));
            }
            if let Some(end) = spec.end {
                calendar.insert("end".to_string(), json!(render_datetime(end)));
            }
            object.insert("calendar".to_string(), Value::Object(calendar));
        }
        EventKind::OneOff { start } => {
            let mut one_off = Map::new();
            if let Some(start) = start {
                one_off.insert("time".to_string(), json!(render_datetime(*start)));
            }
            object.insert("one-off".to_string(), Value::Object(one_off));
        }
        EventKind::Startup => {
            object.insert("startup".to_string(), empty_leaf());
        }
        EventKind::Immediate => {
            object.insert("immediate".to_string(), empty_leaf());
        }
        EventKind::ControllerLost => {
            object.insert("controller-lost".to_string(), empty_leaf());
        }
        EventKind::ControllerConnected => {
            object.insert("controller-connected".to_string(), empty_leaf());
        }
    }
    Value::Object(object)
}

fn render_capability(capability: &Capability, state: bool) -> Option<Value> {
    if !state {
        return None;
    }
    if capability.version.is_none() && capability.tags.is_empty() && capability.tasks.is_empty() {
        return None;
    }
    let mut object = Map::new();
    if let Some(version) = &capability.version {
        object.insert("version".to_string(), json!(version));
    }
    insert_tags(&mut object, "tag", &capability.tags);
    if !capability.tasks.is_empty() {
        let tasks: Vec<Value> = capability
            .tasks
            .iter()
            .map(|task| render_task(task, state))
            .collect();
        object.insert("tasks".to_string(), json!({ "task": tasks }));
    }
    Some(Value::Object(object))
}

fn render_control(lmap: &Lmap, state: bool) -> Result<String> {
    let mut root = Map::new();

    if let Some(capability) = &lmap.capabilities {
        if let Some(rendered) = render_capability(capability, state) {
            root.insert("capabilities".to_string(), rendered);
        }
    }
    if let Some(agent) = &lmap.agent {
        root.insert("agent".to_string(), render_agent(agent, state));
    }
    if !lmap.tasks.is_empty() {
        let tasks: Vec<Value> = lmap
            .tasks
            .iter()
            .map(|task| render_task(task, state))
            .collect();
        root.insert("tasks".to_string(), json!({ "task": tasks }));
    }
    if !lmap.schedules.is_empty() {
        let schedules: Vec<Value> = lmap
            .schedules
            .iter()
            .map(|schedule| render_schedule(schedule, state))
            .collect();
        root.insert("schedules".to_string(), json!({ "schedule": schedules }));
    }
    if !lmap.suppressions.is_empty() {
        let suppressions: Vec<Value> = lmap
            .suppressions
            .iter()
            .map(|suppression| render_suppression(suppression, state))
            .collect();
        root.insert(
            "suppressions".to_string(),
            json!({ "suppression": suppressions }),
        );
    }
    if !lmap.events.is_empty() {
        let events: Vec<Value> = lmap.events.iter().map(render_event).collect();
        root.insert("events".to_string(), json!({ "event": events }));
    }

    let document = json!({ "ietf-lmap-control:lmap": Value::Object(root) });
    serde_json::to_string_pretty(&document).context("failed to render JSON document")
}

/// Renders the configuration view as pretty-printed JSON.
pub fn render_config(lmap: &Lmap) -> Result<String> {
    render_control(lmap, false)
}

/// Renders the state view as pretty-printed JSON.
pub fn render_state(lmap: &Lmap) -> Result<String> {
    render_control(lmap, true)
}

fn render_result(result: &MeasurementResult) -> Value {
    let mut object = Map::new();

    if let Some(schedule) = &result.schedule {
        object.insert("schedule".to_string(), json!(schedule));
    }
    if let Some(action) = &result.action {
        object.insert("action".to_string(), json!(action));
    }
    if let Some(task) = &result.task {
        object.insert("task".to_string(), json!(task));
    }
    insert_options(&mut object, &result.options);
    insert_tags(&mut object, "tag", &result.tags);
    if let Some(event) = result.event {
        object.insert("event".to_string(), json!(render_datetime(event)));
    }
    if let Some(start) = result.start {
        object.insert("start".to_string(), json!(render_datetime(start)));
    }
    if let Some(end) = result.end {
        object.insert("end".to_string(), json!(render_datetime(end)));
    }
    if let Some(cycle_number) = &result.cycle_number {
        object.insert("cycle-number".to_string(), json!(cycle_number));
    }
    if let Some(status) = result.status {
        object.insert("status".to_string(), json!(status));
    }
    if !result.tables.is_empty() {
        let tables: Vec<Value> = result
            .tables
            .iter()
            .map(|table| {
                let rows: Vec<Value> = table
                    .rows
                    .iter()
                    .map(|row| json!({ "value": row.values }))
                    .collect();
                json!({ "row": rows })
            })
            .collect();
        object.insert("table".to_string(), Value::Array(tables));
    }

    Value::Object(object)
}

/// Renders the report document as pretty-printed JSON.
pub fn render_report(lmap: &Lmap) -> Result<String> {
    let mut report = Map::new();

    if let Some(agent) = &lmap.agent {
        if let Some(date) = agent.report_date {
            report.insert("date".to_string(), json!(render_datetime(date)));
        }
        if agent.report_agent_id == Some(true) {
            if let Some(agent_id) = &agent.agent_id {
                report.insert("agent-id".to_string(), json!(agent_id));
            }
        }
        if agent.report_group_id == Some(true) {
            if let Some(group_id) = &agent.group_id {
                report.insert("group-id".to_string(), json!(group_id));
            }
        }
        if agent.report_measurement_point == Some(true) {
            if let Some(point) = &agent.measurement_point {
                report.insert("measurement-point".to_string(), json!(point));
            }
        }
    }

    let results: Vec<Value> = lmap.results.iter().map(render_result).collect();
    if !results.is_empty() {
        report.insert("result".to_string(), Value::Array(results));
    }

    let document = json!({ "ietf-lmap-report:report": Value::Object(report) });
    serde_json::to_string_pretty(&document).context("failed to render JSON report")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Agent, ResultRow, ResultTable};

    #[test]
    fn test_render_report_json() {
        let mut lmap = Lmap::new();
        let mut agent = Agent::default();
        agent
            .set_agent_id("550e8400-e29b-41d4-a716-446655440000")
            .unwrap();
        agent.report_agent_id = Some(true);
        agent.report_date = Some(1717200000);
        lmap.agent = Some(agent);

        let mut result = MeasurementResult {
            schedule: Some("hourly".to_string()),
            action: Some("probe".to_string()),
            task: Some("ping".to_string()),
            start: Some(1717200004),
            end: Some(1717200009),
            status: Some(0),
            ..Default::default()
        };
        result.tags.insert("icmp");
        result.tables.push(ResultTable {
            rows: vec![ResultRow {
                values: vec!["rtt".to_string(), "12.5".to_string()],
            }],
        });
        lmap.results.push(result);

        let rendered = render_report(&lmap).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        let report = &parsed["ietf-lmap-report:report"];
        assert_eq!(
            report["agent-id"],
            json!("550e8400-e29b-41d4-a716-446655440000")
        );
        assert_eq!(report["result"][0]["schedule"], json!("hourly"));
        assert_eq!(report["result"][0]["status"], json!(0));
        assert_eq!(
            report["result"][0]["table"][0]["row"][0]["value"][0],
            json!("rtt")
        );
        // flags that were not requested stay out of the report
        assert!(report.get("group-id").is_none());
    }

    #[test]
    fn test_empty_report_has_no_result_key() {
        let lmap = Lmap::new();
        let rendered = render_report(&lmap).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert!(parsed["ietf-lmap-report:report"].get("result").is_none());
    }

    fn control_config() -> Lmap {
        let mut lmap = Lmap::new();
        let mut event = Event::new("go", EventKind::Immediate);
        event.random_spread = Some(5);
        lmap.add_event(event).unwrap();
        let mut task = Task::new("noop");
        task.program = Some("/bin/true".to_string());
        lmap.add_task(task).unwrap();
        let mut schedule = Schedule::new("s1");
        schedule.start = Some("go".to_string());
        let mut action = Action::new("a1");
        action.task = Some("noop".to_string());
        schedule.actions.push(action);
        lmap.add_schedule(schedule).unwrap();
        lmap
    }

    #[test]
    fn test_render_config_json() {
        let rendered = render_config(&control_config()).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        let root = &parsed["ietf-lmap-control:lmap"];

        assert_eq!(root["tasks"]["task"][0]["name"], json!("noop"));
        assert_eq!(root["schedules"]["schedule"][0]["start"], json!("go"));
        let event = &root["events"]["event"][0];
        assert_eq!(event["random-spread"], json!(5));
        assert_eq!(event["immediate"], json!([null]));
        // runtime leaves stay out of the configuration view
        assert!(root["schedules"]["schedule"][0].get("state").is_none());
    }

    #[test]
    fn test_render_state_json_includes_runtime() {
        let mut lmap = control_config();
        lmap.schedules[0].cnt_invocations = 4;
        lmap.schedules[0].actions[0].last_status = 1;
        lmap.schedules[0].actions[0].last_completion = Some(1717200000);

        let rendered = render_state(&lmap).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        let schedule = &parsed["ietf-lmap-control:lmap"]["schedules"]["schedule"][0];
        assert_eq!(schedule["invocations"], json!(4));
        assert_eq!(schedule["state"], json!("enabled"));
        assert_eq!(schedule["action"][0]["last-status"], json!(1));
    }
}
