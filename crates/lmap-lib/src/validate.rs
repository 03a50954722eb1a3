//! Whole-tree validation of a loaded configuration
//!
//! Validation is fail-fast at load time: every problem is logged and the
//! caller discards the whole tree when any check fails. Nothing here mutates
//! the model.

use crate::model::{
    Event, EventKind, Lmap, ScheduleEnd, RANDOM_SPREAD_MAX,
};
use anyhow::{bail, Result};
use tracing::error;

/// Validates the complete configuration tree.
///
/// # Errors
///
/// Returns an error naming the number of problems found; each individual
/// problem is logged at error level.
pub fn validate(lmap: &Lmap) -> Result<()> {
    let mut problems: Vec<String> = Vec::new();

    if let Some(agent) = &lmap.agent {
        if agent.report_agent_id == Some(true) && agent.agent_id.is_none() {
            problems.push("report-agent-id requires an agent-id".to_string());
        }
        if agent.report_group_id == Some(true) && agent.group_id.is_none() {
            problems.push("report-group-id requires a group-id".to_string());
        }
        if agent.report_measurement_point == Some(true) && agent.measurement_point.is_none() {
            problems.push("report-measurement-point requires a measurement-point".to_string());
        }
    }

    for event in &lmap.events {
        validate_event(event, &mut problems);
    }

    for task in &lmap.tasks {
        if task.name.is_empty() {
            problems.push("task requires a name".to_string());
        }
        if task.program.as_deref().map_or(true, str::is_empty) {
            problems.push(format!("task '{}' requires a program", task.name));
        }
    }

    for schedule in &lmap.schedules {
        if schedule.name.is_empty() {
            problems.push("schedule requires a name".to_string());
        }
        match &schedule.start {
            None => problems.push(format!(
                "schedule '{}' requires a start event",
                schedule.name
            )),
            Some(start) => {
                if lmap.find_event(start).is_none() {
                    problems.push(format!(
                        "schedule '{}' refers to undefined start event '{start}'",
                        schedule.name
                    ));
                }
            }
        }
        if let Some(ScheduleEnd::Event(end)) = &schedule.end {
            if lmap.find_event(end).is_none() {
                problems.push(format!(
                    "schedule '{}' refers to undefined end event '{end}'",
                    schedule.name
                ));
            }
        }

        for action in &schedule.actions {
            if action.name.is_empty() {
                problems.push(format!(
                    "action of schedule '{}' requires a name",
                    schedule.name
                ));
            }
            match &action.task {
                None => problems.push(format!("action '{}' requires a task", action.name)),
                Some(task) => {
                    if lmap.find_task(task).is_none() {
                        problems.push(format!(
                            "action '{}' refers to undefined task '{task}'",
                            action.name
                        ));
                    }
                }
            }
            for destination in action.destinations.iter() {
                if lmap.find_schedule(destination).is_none() {
                    problems.push(format!(
                        "action '{}' refers to undefined destination '{destination}'",
                        action.name
                    ));
                }
            }
        }
    }

    for suppression in &lmap.suppressions {
        if suppression.name.is_empty() {
            problems.push("suppression requires a name".to_string());
        }
        if suppression.matches.is_empty() {
            problems.push(format!(
                "suppression '{}' requires at least one match pattern",
                suppression.name
            ));
        }
        if let Some(start) = &suppression.start {
            if lmap.find_event(start).is_none() {
                problems.push(format!(
                    "suppression '{}' refers to undefined start event '{start}'",
                    suppression.name
                ));
            }
        }
        if let Some(end) = &suppression.end {
            if lmap.find_event(end).is_none() {
                problems.push(format!(
                    "suppression '{}' refers to undefined end event '{end}'",
                    suppression.name
                ));
            }
        }
    }

    if problems.is_empty() {
        return Ok(());
    }
    for problem in &problems {
        error!("{problem}");
    }
    bail!("configuration is invalid ({} problems)", problems.len());
}

fn validate_event(event: &Event, problems: &mut Vec<String>) {
    if event.name.is_empty() {
        problems.push("event requires a name".to_string());
    }

    match &event.kind {
        EventKind::Periodic {
            interval,
            start,
            end,
        } => {
            if *interval < 1 {
                problems.push(format!("event '{}' requires an interval", event.name));
            }
            check_window(&event.name, *start, *end, problems);
        }
        EventKind::Calendar(spec) => {
            let components = [
                (spec.months as u64, "month"),
                (spec.days_of_month as u64, "day of month"),
                (spec.days_of_week as u64, "day of week"),
                (spec.hours as u64, "hour"),
                (spec.minutes, "minute"),
                (spec.seconds, "second"),
            ];
            for (bits, what) in components {
                if bits == 0 {
                    problems.push(format!("event '{}' requires a {what}", event.name));
                }
            }
            check_window(&event.name, spec.start, spec.end, problems);
        }
        EventKind::OneOff { start } => {
            if start.is_none() {
                problems.push(format!("event '{}' requires a time", event.name));
            }
        }
        _ => {}
    }

    if let Some(spread) = event.random_spread {
        if spread > RANDOM_SPREAD_MAX {
            problems.push(format!(
                "event '{}' has an out-of-range random spread",
                event.name
            ));
        }
    }
}

fn check_window(name: &str, start: Option<i64>, end: Option<i64>, problems: &mut Vec<String>) {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            problems.push(format!("event '{name}' ends before it starts"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Action, Agent, CalendarSpec, Schedule, ScheduleEnd, Suppression, Task,
    };

    fn minimal_config() -> Lmap {
        let mut lmap = Lmap::new();
        lmap.add_event(Event::new("go", EventKind::Immediate)).unwrap();
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
    fn test_minimal_config_is_valid() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn test_undefined_start_event_rejected() {
        let mut lmap = minimal_config();
        lmap.schedules[0].start = Some("missing".to_string());
        assert!(validate(&lmap).is_err());
    }

    #[test]
    fn test_undefined_task_rejected() {
        let mut lmap = minimal_config();
        lmap.schedules[0].actions[0].task = Some("missing".to_string());
        assert!(validate(&lmap).is_err());
    }

    #[test]
    fn test_undefined_destination_rejected() {
        let mut lmap = minimal_config();
        lmap.schedules[0].actions[0].destinations.insert("nowhere");
        assert!(validate(&lmap).is_err());
    }

    #[test]
    fn test_calendar_requires_all_bitsets() {
        let mut lmap = minimal_config();
        let mut spec = CalendarSpec::default();
        spec.add_month("*").unwrap();
        // day-of-month and the finer components stay empty
        lmap.add_event(Event::new("cal", EventKind::Calendar(spec)))
            .unwrap();
        let mut schedule = Schedule::new("s2");
        schedule.start = Some("cal".to_string());
        lmap.add_schedule(schedule).unwrap();
        assert!(validate(&lmap).is_err());
    }

    #[test]
    fn test_periodic_requires_interval() {
        let mut lmap = minimal_config();
        lmap.add_event(Event::new(
            "tick",
            EventKind::Periodic {
                interval: 0,
                start: None,
                end: None,
            },
        ))
        .unwrap();
        assert!(validate(&lmap).is_err());
    }

    #[test]
    fn test_one_off_requires_start() {
        let mut lmap = minimal_config();
        lmap.add_event(Event::new("once", EventKind::OneOff { start: None }))
            .unwrap();
        assert!(validate(&lmap).is_err());
    }

    #[test]
    fn test_end_before_start_rejected() {
        let mut lmap = minimal_config();
        lmap.add_event(Event::new(
            "window",
            EventKind::Periodic {
                interval: 60,
                start: Some(2000),
                end: Some(1000),
            },
        ))
        .unwrap();
        assert!(validate(&lmap).is_err());
    }

    #[test]
    fn test_report_flag_requires_id() {
        let mut lmap = minimal_config();
        lmap.agent = Some(Agent {
            report_agent_id: Some(true),
            ..Default::default()
        });
        assert!(validate(&lmap).is_err());
    }

    #[test]
    fn test_suppression_requires_patterns() {
        let mut lmap = minimal_config();
        lmap.add_suppression(Suppression::new("quiet")).unwrap();
        assert!(validate(&lmap).is_err());
        lmap.suppressions[0].matches.insert("red");
        assert!(validate(&lmap).is_ok());
    }

    #[test]
    fn test_schedule_end_event_resolves() {
        let mut lmap = minimal_config();
        lmap.schedules[0].end = Some(ScheduleEnd::Event("missing".to_string()));
        assert!(validate(&lmap).is_err());
        lmap.schedules[0].end = Some(ScheduleEnd::Duration(60));
        assert!(validate(&lmap).is_ok());
    }
}
