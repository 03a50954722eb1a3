//! End-to-end scheduler tests
//!
//! Each test builds a small configuration, drives the runner loop with
//! hand-delivered event fires and real child processes, then inspects the
//! runtime fields the loop left behind.

use lmap_lib::dispatch::EventFire;
use lmap_lib::model::{
    Action, Capability, EntityState, Event, EventKind, ExecutionMode, Lmap, Schedule, Suppression,
    Task, TaskOption,
};
use lmap_lib::runner::{Runner, SchedulerRequest};
use lmap_lib::Workspace;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Registers a task and allow-lists its program.
fn add_task(lmap: &mut Lmap, name: &str, program: &str) {
    let mut task = Task::new(name);
    task.program = Some(program.to_string());
    lmap.add_task(task.clone()).unwrap();
    lmap.capabilities
        .get_or_insert_with(Capability::default)
        .add_task(task)
        .unwrap();
}

fn add_action(schedule: &mut Schedule, name: &str, task: &str, value: Option<&str>) {
    let mut action = Action::new(name);
    action.task = Some(task.to_string());
    if let Some(value) = value {
        action
            .add_option(TaskOption {
                id: "arg".to_string(),
                name: None,
                value: Some(value.to_string()),
            })
            .unwrap();
    }
    schedule.actions.push(action);
}

/// Steps of a scenario: wait, then deliver a fire.
struct Step {
    delay_ms: u64,
    event: &'static str,
}

/// Runs the loop against the queue in `dir`, delivering the scripted
/// fires, and returns the final tree.
async fn drive(mut lmap: Lmap, dir: &TempDir, steps: &[Step], settle_ms: u64) -> Lmap {
    let queue = dir.path().join("queue");
    let run = dir.path().join("run");
    std::fs::create_dir_all(&queue).unwrap();
    std::fs::create_dir_all(&run).unwrap();

    let workspace = Workspace::new(&queue, "lmapd 0.4.0");
    workspace.init(&mut lmap).unwrap();

    let (fire_tx, fire_rx) = mpsc::channel(16);
    let (req_tx, req_rx) = mpsc::channel(4);
    let runner = Runner::new(lmap, workspace, &run, fire_rx, req_rx);
    let handle = tokio::spawn(runner.run());

    for step in steps {
        sleep(Duration::from_millis(step.delay_ms)).await;
        fire_tx
            .send(EventFire {
                name: step.event.to_string(),
                kind: "test",
            })
            .await
            .unwrap();
    }
    sleep(Duration::from_millis(settle_ms)).await;

    req_tx.send(SchedulerRequest::Stop).await.unwrap();
    handle.await.unwrap().lmap
}

fn queue_dir(dir: &TempDir, schedule: &str) -> std::path::PathBuf {
    dir.path().join("queue").join(schedule)
}

fn has_file_with_suffix(dir: &Path, suffix: &str) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .ends_with(suffix)
            })
        })
        .unwrap_or(false)
}

#[tokio::test]
async fn test_immediate_fire_runs_action_once_and_disables() {
    let mut lmap = Lmap::new();
    lmap.add_event(Event::new("go", EventKind::Immediate)).unwrap();
    add_task(&mut lmap, "noop", "/bin/true");
    let mut schedule = Schedule::new("s");
    schedule.start = Some("go".to_string());
    add_action(&mut schedule, "a", "noop", None);
    lmap.add_schedule(schedule).unwrap();

    let dir = TempDir::new().unwrap();
    let lmap = drive(lmap, &dir, &[Step { delay_ms: 0, event: "go" }], 500).await;

    let schedule = &lmap.schedules[0];
    assert_eq!(schedule.cnt_invocations, 1);
    assert_eq!(schedule.cnt_failures, 0);
    assert_eq!(schedule.state, EntityState::Disabled);
    let action = &schedule.actions[0];
    assert_eq!(action.cnt_invocations, 1);
    assert_eq!(action.last_status, 0);
    assert!(action.last_completion.is_some());
}

#[tokio::test]
async fn test_sequential_chain_with_self_destination() {
    let mut lmap = Lmap::new();
    lmap.add_event(Event::new(
        "tick",
        EventKind::Periodic {
            interval: 3600,
            start: None,
            end: None,
        },
    ))
    .unwrap();
    add_task(&mut lmap, "produce", "/bin/echo");
    add_task(&mut lmap, "consume", "/bin/cat");

    let mut schedule = Schedule::new("s");
    schedule.start = Some("tick".to_string());
    schedule.mode = ExecutionMode::Sequential;
    add_action(&mut schedule, "a1", "produce", Some("x"));
    schedule.actions[0].destinations.insert("s");
    add_action(&mut schedule, "a2", "consume", None);
    lmap.add_schedule(schedule).unwrap();

    let dir = TempDir::new().unwrap();
    let lmap = drive(lmap, &dir, &[Step { delay_ms: 0, event: "tick" }], 900).await;

    let schedule = &lmap.schedules[0];
    assert_eq!(schedule.cnt_invocations, 1);
    assert_eq!(schedule.cnt_failures, 0);
    assert_eq!(schedule.actions[0].last_status, 0);
    assert_eq!(schedule.actions[0].cnt_invocations, 1);
    // the second action only runs after the first one reaped
    assert_eq!(schedule.actions[1].cnt_invocations, 1);
    assert_eq!(schedule.actions[1].last_status, 0);
    assert!(
        schedule.actions[1].last_invocation.unwrap()
            >= schedule.actions[0].last_completion.unwrap()
    );
}

#[tokio::test]
async fn test_failure_counting() {
    let mut lmap = Lmap::new();
    lmap.add_event(Event::new(
        "tick",
        EventKind::Periodic {
            interval: 3600,
            start: None,
            end: None,
        },
    ))
    .unwrap();
    add_task(&mut lmap, "broken", "/bin/false");
    let mut schedule = Schedule::new("s");
    schedule.start = Some("tick".to_string());
    add_action(&mut schedule, "a", "broken", None);
    lmap.add_schedule(schedule).unwrap();

    let dir = TempDir::new().unwrap();
    let steps = [
        Step { delay_ms: 0, event: "tick" },
        Step { delay_ms: 600, event: "tick" },
    ];
    let lmap = drive(lmap, &dir, &steps, 800).await;

    let schedule = &lmap.schedules[0];
    let action = &schedule.actions[0];
    assert_eq!(action.cnt_invocations, 2);
    assert_eq!(action.cnt_failures, 2);
    assert_eq!(action.last_status, 1);
    assert_eq!(action.last_failed_status, 1);
    assert!(action.last_failed_completion.is_some());
    assert_eq!(schedule.cnt_failures, 2);
}

#[tokio::test]
async fn test_stop_running_suppression_kills_action() {
    let mut lmap = Lmap::new();
    lmap.add_event(Event::new(
        "tick",
        EventKind::Periodic {
            interval: 3600,
            start: None,
            end: None,
        },
    ))
    .unwrap();
    lmap.add_event(Event::new("supp-on", EventKind::Immediate))
        .unwrap();
    add_task(&mut lmap, "slow", "/bin/sleep");

    let mut schedule = Schedule::new("s");
    schedule.start = Some("tick".to_string());
    schedule.suppression_tags.insert("red");
    add_action(&mut schedule, "a", "slow", Some("60"));
    schedule.actions[0].suppression_tags.insert("red");
    lmap.add_schedule(schedule).unwrap();

    let mut suppression = Suppression::new("p");
    suppression.start = Some("supp-on".to_string());
    suppression.matches.insert("red");
    suppression.stop_running = Some(true);
    lmap.add_suppression(suppression).unwrap();

    let dir = TempDir::new().unwrap();
    let steps = [
        Step { delay_ms: 0, event: "tick" },
        Step { delay_ms: 300, event: "supp-on" },
    ];
    let lmap = drive(lmap, &dir, &steps, 500).await;

    let schedule = &lmap.schedules[0];
    assert!(schedule.stop_running);
    let action = &schedule.actions[0];
    assert_eq!(action.last_status, -libc::SIGTERM);
    assert_eq!(action.state, EntityState::Suppressed);
    assert_eq!(action.pid, 0);
}

#[tokio::test]
async fn test_artefact_handoff_between_schedules() {
    let mut lmap = Lmap::new();
    for event in ["tick", "tock"] {
        lmap.add_event(Event::new(
            event,
            EventKind::Periodic {
                interval: 3600,
                start: None,
                end: None,
            },
        ))
        .unwrap();
    }
    add_task(&mut lmap, "produce", "/bin/echo");
    add_task(&mut lmap, "broken", "/bin/false");

    let mut src = Schedule::new("src");
    src.start = Some("tick".to_string());
    add_action(&mut src, "collect", "produce", Some("payload"));
    src.actions[0].destinations.insert("dst");
    lmap.add_schedule(src).unwrap();

    // the consumer fails on purpose so its queue is not consumed and the
    // promoted artefacts stay visible for the assertion
    let mut dst = Schedule::new("dst");
    dst.start = Some("tock".to_string());
    add_action(&mut dst, "consume", "broken", None);
    lmap.add_schedule(dst).unwrap();

    let dir = TempDir::new().unwrap();
    let steps = [
        Step { delay_ms: 0, event: "tick" },
        Step { delay_ms: 500, event: "tock" },
    ];
    let lmap = drive(lmap, &dir, &steps, 600).await;

    assert_eq!(lmap.schedules[0].cnt_invocations, 1);
    assert_eq!(lmap.schedules[1].cnt_invocations, 1);
    // the pair produced by src/collect was promoted into dst's queue
    let dst_dir = queue_dir(&dir, "dst");
    assert!(has_file_with_suffix(&dst_dir, "-src-collect.data"));
    assert!(has_file_with_suffix(&dst_dir, "-src-collect.meta"));
    // and is gone from the staging area
    assert!(!has_file_with_suffix(
        &dst_dir.join("_incoming"),
        "-src-collect.data"
    ));
}

#[tokio::test]
async fn test_fire_accounting_invariant() {
    let mut lmap = Lmap::new();
    lmap.add_event(Event::new(
        "tick",
        EventKind::Periodic {
            interval: 3600,
            start: None,
            end: None,
        },
    ))
    .unwrap();
    lmap.add_event(Event::new("supp-on", EventKind::Immediate))
        .unwrap();
    lmap.add_event(Event::new("supp-off", EventKind::Immediate))
        .unwrap();
    add_task(&mut lmap, "noop", "/bin/true");

    let mut schedule = Schedule::new("s");
    schedule.start = Some("tick".to_string());
    schedule.suppression_tags.insert("red");
    add_action(&mut schedule, "a", "noop", None);
    lmap.add_schedule(schedule).unwrap();

    let mut suppression = Suppression::new("p");
    suppression.start = Some("supp-on".to_string());
    suppression.end = Some("supp-off".to_string());
    suppression.matches.insert("red");
    lmap.add_suppression(suppression).unwrap();

    let dir = TempDir::new().unwrap();
    let steps = [
        Step { delay_ms: 0, event: "tick" },
        Step { delay_ms: 300, event: "supp-on" },
        Step { delay_ms: 50, event: "tick" },
        Step { delay_ms: 50, event: "supp-off" },
        Step { delay_ms: 50, event: "tick" },
    ];
    let lmap = drive(lmap, &dir, &steps, 500).await;

    let schedule = &lmap.schedules[0];
    let fires = 3;
    assert_eq!(
        schedule.cnt_invocations + schedule.cnt_suppressions + schedule.cnt_overlaps,
        fires
    );
    assert_eq!(schedule.cnt_suppressions, 1);
    assert_eq!(schedule.cnt_invocations, 2);
}

#[tokio::test]
async fn test_overlap_counting_when_action_still_running() {
    let mut lmap = Lmap::new();
    lmap.add_event(Event::new(
        "tick",
        EventKind::Periodic {
            interval: 3600,
            start: None,
            end: None,
        },
    ))
    .unwrap();
    add_task(&mut lmap, "slow", "/bin/sleep");
    let mut schedule = Schedule::new("s");
    schedule.start = Some("tick".to_string());
    add_action(&mut schedule, "a", "slow", Some("60"));
    lmap.add_schedule(schedule).unwrap();

    let dir = TempDir::new().unwrap();
    let steps = [
        Step { delay_ms: 0, event: "tick" },
        Step { delay_ms: 300, event: "tick" },
    ];
    let lmap = drive(lmap, &dir, &steps, 200).await;

    let schedule = &lmap.schedules[0];
    assert_eq!(schedule.cnt_invocations, 1);
    assert_eq!(schedule.cnt_overlaps, 1);
    assert_eq!(
        schedule.cnt_invocations + schedule.cnt_suppressions + schedule.cnt_overlaps,
        2
    );
}

/// Drives the loop with scheduler requests instead of fires.
async fn drive_requests(
    mut lmap: Lmap,
    dir: &TempDir,
    requests: &[SchedulerRequest],
    gap_ms: u64,
) -> Lmap {
    let queue = dir.path().join("queue");
    let run = dir.path().join("run");
    std::fs::create_dir_all(&queue).unwrap();
    std::fs::create_dir_all(&run).unwrap();

    let workspace = Workspace::new(&queue, "lmapd 0.4.0");
    workspace.init(&mut lmap).unwrap();

    let (_fire_tx, fire_rx) = mpsc::channel::<EventFire>(4);
    let (req_tx, req_rx) = mpsc::channel(8);
    let runner = Runner::new(lmap, workspace, &run, fire_rx, req_rx);
    let handle = tokio::spawn(runner.run());

    for request in requests {
        req_tx.send(*request).await.unwrap();
        sleep(Duration::from_millis(gap_ms)).await;
    }
    req_tx.send(SchedulerRequest::Stop).await.unwrap();
    handle.await.unwrap().lmap
}

#[tokio::test]
async fn test_status_dump_is_idempotent() {
    let mut lmap = Lmap::new();
    lmap.add_event(Event::new("go", EventKind::Immediate)).unwrap();
    add_task(&mut lmap, "noop", "/bin/true");
    let mut schedule = Schedule::new("s");
    schedule.start = Some("go".to_string());
    add_action(&mut schedule, "a", "noop", None);
    lmap.add_schedule(schedule).unwrap();

    let dir = TempDir::new().unwrap();
    let status_path = dir.path().join("run").join("status");

    let first = {
        let lmap = lmap.clone();
        drive_requests(lmap, &dir, &[SchedulerRequest::StatusDump], 200).await;
        std::fs::read_to_string(&status_path).unwrap()
    };
    // a second dump with no events in between yields identical content
    drive_requests(lmap, &dir, &[SchedulerRequest::StatusDump], 200).await;
    let second = std::fs::read_to_string(&status_path).unwrap();
    assert_eq!(first, second);

    // the dump is a parsable state document
    let parsed = lmap_lib::xmlio::parse_config(&first).unwrap();
    assert_eq!(parsed.schedules.len(), 1);
    assert_eq!(parsed.schedules[0].name, "s");
}

#[tokio::test]
async fn test_workspace_wipe_request_rebuilds_tree() {
    let mut lmap = Lmap::new();
    lmap.add_event(Event::new("go", EventKind::Immediate)).unwrap();
    add_task(&mut lmap, "noop", "/bin/true");
    let mut schedule = Schedule::new("s");
    schedule.start = Some("go".to_string());
    add_action(&mut schedule, "a", "noop", None);
    lmap.add_schedule(schedule).unwrap();

    let dir = TempDir::new().unwrap();
    let queue = dir.path().join("queue");
    std::fs::create_dir_all(queue.join("s")).unwrap();
    std::fs::write(queue.join("s").join("stale.data"), "old").unwrap();

    drive_requests(lmap, &dir, &[SchedulerRequest::WorkspaceWipe], 200).await;

    // stale artefacts are gone, the directory tree is back
    assert!(!queue.join("s").join("stale.data").exists());
    assert!(queue.join("s").join("_incoming").is_dir());
    assert!(queue.join("s").join("a").is_dir());
}
