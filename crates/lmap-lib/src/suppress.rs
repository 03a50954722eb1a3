//! Suppression engine
//!
//! Suppressions inhibit matching schedules and actions between their start
//! and end events. Matching is a POSIX-style glob over the entities'
//! suppression tags, compared case-sensitively. Every entity keeps a count
//! of the suppressions currently covering it so that overlapping
//! suppressions restore state correctly.

use crate::model::{EntityState, Lmap, SuppressionState, TagSet};
use crate::runner::kill_term;
use globset::{Glob, GlobMatcher};
use tracing::{debug, error, warn};

fn compile_patterns(patterns: &TagSet) -> Vec<GlobMatcher> {
    patterns
        .iter()
        .filter_map(|pattern| match Glob::new(pattern) {
            Ok(glob) => Some(glob.compile_matcher()),
            Err(e) => {
                warn!(pattern, error = %e, "ignoring malformed match pattern");
                None
            }
        })
        .collect()
}

fn tags_match(matchers: &[GlobMatcher], tags: &TagSet) -> bool {
    matchers
        .iter()
        .any(|matcher| tags.iter().any(|tag| matcher.is_match(tag)))
}

/// Reacts to an event fire: activates suppressions whose start event fired
/// and deactivates those whose end event fired. Runs before schedule
/// execution on the same fire.
pub fn on_event_fire(lmap: &mut Lmap, event_name: &str) {
    for index in 0..lmap.suppressions.len() {
        if lmap.suppressions[index].state == SuppressionState::Disabled {
            continue;
        }
        if lmap.suppressions[index].name.is_empty() {
            error!("disabling unnamed suppression");
            lmap.suppressions[index].state = SuppressionState::Disabled;
            continue;
        }

        if lmap.suppressions[index].start.as_deref() == Some(event_name) {
            if lmap.suppressions[index].state == SuppressionState::Enabled {
                suppression_start(lmap, index);
            } else {
                warn!(
                    suppression = %lmap.suppressions[index].name,
                    "suppression not enabled - skipping"
                );
            }
        }

        if lmap.suppressions[index].end.as_deref() == Some(event_name) {
            if lmap.suppressions[index].state == SuppressionState::Active {
                suppression_end(lmap, index);
            } else {
                warn!(
                    suppression = %lmap.suppressions[index].name,
                    "suppression not active - skipping"
                );
            }
        }
    }
}

/// Activates one suppression and walks all schedules and actions.
fn suppression_start(lmap: &mut Lmap, index: usize) {
    let suppression = &lmap.suppressions[index];
    if suppression.matches.is_empty() {
        return;
    }
    debug!(suppression = %suppression.name, "starting suppression");
    let matchers = compile_patterns(&suppression.matches);
    let stop_running = suppression.stop_running == Some(true);
    lmap.suppressions[index].state = SuppressionState::Active;

    for schedule in &mut lmap.schedules {
        if schedule.state == EntityState::Disabled {
            continue;
        }

        if tags_match(&matchers, &schedule.suppression_tags) {
            debug!(schedule = %schedule.name, "suppressing");
            if schedule.state == EntityState::Enabled {
                schedule.state = EntityState::Suppressed;
            }
            if stop_running {
                schedule.stop_running = true;
            }
            schedule.cnt_active_suppressions += 1;
        }

        for action in &mut schedule.actions {
            if action.state == EntityState::Disabled {
                continue;
            }

            if schedule.stop_running && action.state == EntityState::Running {
                kill_term(action.pid);
            }

            if tags_match(&matchers, &action.suppression_tags) {
                debug!(action = %action.name, "suppressing");
                if action.state == EntityState::Enabled {
                    action.state = EntityState::Suppressed;
                }
                if action.state == EntityState::Running && !schedule.stop_running && stop_running
                {
                    kill_term(action.pid);
                    action.state = EntityState::Suppressed;
                }
                action.cnt_active_suppressions += 1;
            }
        }
    }
}

/// Deactivates one suppression and restores entities whose last covering
/// suppression ended.
fn suppression_end(lmap: &mut Lmap, index: usize) {
    let suppression = &lmap.suppressions[index];
    if suppression.matches.is_empty() {
        return;
    }
    debug!(suppression = %suppression.name, "ending suppression");
    let matchers = compile_patterns(&suppression.matches);
    lmap.suppressions[index].state = SuppressionState::Enabled;

    for schedule in &mut lmap.schedules {
        if schedule.state == EntityState::Disabled {
            continue;
        }

        if tags_match(&matchers, &schedule.suppression_tags) {
            debug!(schedule = %schedule.name, "unsuppressing");
            schedule.cnt_active_suppressions =
                schedule.cnt_active_suppressions.saturating_sub(1);
            if schedule.cnt_active_suppressions == 0 {
                if schedule.state == EntityState::Suppressed {
                    schedule.state = EntityState::Enabled;
                }
                schedule.stop_running = false;
            }
        }

        for action in &mut schedule.actions {
            if action.state == EntityState::Disabled {
                continue;
            }
            if tags_match(&matchers, &action.suppression_tags) {
                debug!(action = %action.name, "unsuppressing");
                action.cnt_active_suppressions =
                    action.cnt_active_suppressions.saturating_sub(1);
                if action.cnt_active_suppressions == 0
                    && action.state == EntityState::Suppressed
                {
                    action.state = EntityState::Enabled;
                }
            }
        }
    }
}
