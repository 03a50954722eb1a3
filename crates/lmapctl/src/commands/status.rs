//! The status command
//!
//! Requests a fresh state dump from the daemon, waits briefly for the
//! file to land, then pretty-prints the agent summary and the per
//! schedule/action accounting.

use crate::commands::control::signal_daemon;
use crate::output::{
    color_state, format_datetime_long, format_datetime_short, format_storage, percent,
};
use anyhow::{Context, Result};
use colored::Colorize;
use lmap_lib::model::{Action, EntityState, Lmap, Schedule, SuppressionState};
use lmap_lib::runner::STATUS_FILE;
use lmap_lib::xmlio;
use std::path::Path;
use std::time::Duration;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// One row of the schedule/action table.
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "SCHEDULE/ACTION")]
    name: String,
    #[tabled(rename = "S")]
    state: String,
    #[tabled(rename = "IN%")]
    invocations: u32,
    #[tabled(rename = "SU%")]
    suppressions: u32,
    #[tabled(rename = "OV%")]
    overlaps: u32,
    #[tabled(rename = "ER%")]
    failures: u32,
    #[tabled(rename = "STOR")]
    storage: String,
    #[tabled(rename = "LST")]
    last_status: String,
    #[tabled(rename = "LFS")]
    last_failed_status: String,
    #[tabled(rename = "L-INVOKE")]
    last_invocation: String,
    #[tabled(rename = "L-COMPLETE")]
    last_completion: String,
    #[tabled(rename = "L-FAILURE")]
    last_failure: String,
}

#[derive(Tabled)]
struct SuppressionRow {
    #[tabled(rename = "SUPPRESSION")]
    name: String,
    #[tabled(rename = "S")]
    state: String,
}

fn state_letter(state: EntityState) -> &'static str {
    match state {
        EntityState::Enabled => "E",
        EntityState::Disabled => "D",
        EntityState::Running => "R",
        EntityState::Suppressed => "S",
    }
}

fn schedule_row(schedule: &Schedule) -> StatusRow {
    let attempts = schedule
        .cnt_invocations
        .wrapping_add(schedule.cnt_suppressions)
        .wrapping_add(schedule.cnt_overlaps);
    StatusRow {
        name: schedule.name.clone(),
        state: color_state(state_letter(schedule.state)),
        invocations: percent(schedule.cnt_invocations, attempts),
        suppressions: percent(schedule.cnt_suppressions, attempts),
        overlaps: percent(schedule.cnt_overlaps, attempts),
        failures: percent(schedule.cnt_failures, schedule.cnt_invocations),
        storage: format_storage(schedule.storage),
        last_status: String::new(),
        last_failed_status: String::new(),
        last_invocation: schedule
            .last_invocation
            .map(format_datetime_short)
            .unwrap_or_default(),
        last_completion: String::new(),
        last_failure: String::new(),
    }
}

fn action_row(action: &Action) -> StatusRow {
    let attempts = action
        .cnt_invocations
        .wrapping_add(action.cnt_suppressions)
        .wrapping_add(action.cnt_overlaps);
    StatusRow {
        name: format!(" {}", action.name),
        state: color_state(state_letter(action.state)),
        invocations: percent(action.cnt_invocations, attempts),
        suppressions: percent(action.cnt_suppressions, attempts),
        overlaps: percent(action.cnt_overlaps, attempts),
        failures: percent(action.cnt_failures, action.cnt_invocations),
        storage: format_storage(action.storage),
        last_status: action.last_status.to_string(),
        last_failed_status: action.last_failed_status.to_string(),
        last_invocation: action
            .last_invocation
            .map(format_datetime_short)
            .unwrap_or_default(),
        last_completion: action
            .last_completion
            .map(format_datetime_short)
            .unwrap_or_default(),
        last_failure: action
            .last_failed_completion
            .map(format_datetime_short)
            .unwrap_or_default(),
    }
}

fn print_agent(lmap: &Lmap) {
    let Some(agent) = &lmap.agent else {
        return;
    };
    let capability = lmap.capabilities.as_ref();
    println!(
        "agent-id:     {}",
        agent.agent_id.as_deref().unwrap_or("<?>")
    );
    println!(
        "version:      {}",
        capability
            .and_then(|c| c.version.as_deref())
            .unwrap_or("<?>")
    );
    if let Some(capability) = capability {
        if !capability.tags.is_empty() {
            let tags: Vec<&str> = capability.tags.iter().collect();
            println!("tags:         {}", tags.join(", "));
        }
    }
    if let Some(last_started) = agent.last_started {
        println!("last-started: {}", format_datetime_long(last_started));
    }
    println!();
}

/// Renders the parsed state document.
pub fn print_state(lmap: &Lmap) {
    print_agent(lmap);

    let mut rows = Vec::new();
    for schedule in &lmap.schedules {
        rows.push(schedule_row(schedule));
        for action in &schedule.actions {
            rows.push(action_row(action));
        }
    }
    println!("{}", Table::new(rows).with(Style::blank()));

    if !lmap.suppressions.is_empty() {
        let rows: Vec<SuppressionRow> = lmap
            .suppressions
            .iter()
            .map(|suppression| SuppressionRow {
                name: suppression.name.clone(),
                state: color_state(match suppression.state {
                    SuppressionState::Enabled => "E",
                    SuppressionState::Disabled => "D",
                    SuppressionState::Active => "A",
                }),
            })
            .collect();
        println!();
        println!("{}", Table::new(rows).with(Style::blank()));
    }
}

/// `status`: trigger a dump, give the daemon a moment, then render it.
pub fn status(run_path: &Path) -> Result<()> {
    signal_daemon(run_path, libc::SIGUSR1)?;

    // give the daemon a moment to refresh the state file
    std::thread::sleep(Duration::from_micros(87_654));

    let path = run_path.join(STATUS_FILE);
    let xml = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read state file '{}'", path.display()))?;
    let lmap = xmlio::parse_config(&xml).context("failed to parse state file")?;

    if lmap.agent.is_none() && lmap.schedules.is_empty() {
        println!("{}", "no state available".yellow());
        return Ok(());
    }
    print_state(&lmap);
    Ok(())
}
