//! Event dispatcher
//!
//! Arms one timer task per configured event that is actually referenced by
//! a schedule or suppression and delivers `(event-name, kind)` fires into
//! the scheduler's channel. The tasks only compute firing times; every
//! model mutation stays on the scheduler loop.

use crate::calendar::{calendar_match, CalendarMatch};
use crate::model::{CalendarSpec, EventKind, Lmap};
use chrono::Utc;
use rand::RngCore;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// A single delivery of an event to the scheduler.
#[derive(Debug, Clone)]
pub struct EventFire {
    pub name: String,
    pub kind: &'static str,
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Generates a uniformly distributed random number in `[min, max]`.
///
/// The number space is divided into equal-sized buckets and draws outside
/// the covered range are rejected, so no value is more likely than any
/// other.
pub(crate) fn rand_interval(min: u32, max: u32) -> u32 {
    let range = u64::from(max - min) + 1;
    let buckets = (u64::from(u32::MAX) + 1) / range;
    let limit = buckets * range;

    let mut rng = rand::thread_rng();
    loop {
        let draw = u64::from(rng.next_u32());
        if draw < limit {
            return min + (draw / buckets) as u32;
        }
    }
}

/// Delay before the next aligned fire of a periodic event.
pub(crate) fn periodic_initial_delay(now: i64, start: Option<i64>, interval: u32) -> u64 {
    match start {
        Some(start) if now > start => {
            let delta = (now - start) as u64 / u64::from(interval);
            let next = start + ((delta + 1) * u64::from(interval)) as i64;
            (next - now) as u64
        }
        Some(start) => (start - now) as u64,
        None => 0,
    }
}

async fn spread_sleep(random_spread: Option<u32>) {
    if let Some(spread) = random_spread {
        let delay = rand_interval(0, spread);
        if delay > 0 {
            sleep(Duration::from_secs(u64::from(delay))).await;
        }
    }
}

/// Spawns the delayed delivery of one fire so the driving timer keeps its
/// cadence while the random spread elapses.
fn deliver(tx: &mpsc::Sender<EventFire>, fire: EventFire, random_spread: Option<u32>) {
    let tx = tx.clone();
    tokio::spawn(async move {
        spread_sleep(random_spread).await;
        if tx.send(fire).await.is_err() {
            debug!("scheduler channel closed - dropping fire");
        }
    });
}

/// Arms timers for every referenced event and returns the timer task
/// handles so the caller can abort them on shutdown.
pub fn arm_events(lmap: &Lmap, fire_tx: &mpsc::Sender<EventFire>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let now = unix_now();

    for event in &lmap.events {
        if event.name.is_empty() {
            continue;
        }
        if !lmap.event_is_referenced(&event.name) {
            warn!(event = %event.name, "event is not used - skipping");
            continue;
        }

        let name = event.name.clone();
        let kind = event.kind.type_name();
        let spread = event.random_spread;
        let tx = fire_tx.clone();

        match &event.kind {
            EventKind::Periodic {
                interval,
                start,
                end,
            } => {
                if let Some(end) = end {
                    if now > *end {
                        warn!(event = %name, "event ended in the past");
                        continue;
                    }
                }
                let interval = *interval;
                let start = *start;
                let end = *end;
                handles.push(tokio::spawn(async move {
                    run_periodic(name, interval, start, end, spread, tx).await;
                }));
            }
            EventKind::Calendar(spec) => {
                if let Some(end) = spec.end {
                    if now > end {
                        warn!(event = %name, "event ended in the past");
                        continue;
                    }
                }
                let spec = spec.clone();
                handles.push(tokio::spawn(async move {
                    run_calendar(name, spec, spread, tx).await;
                }));
            }
            EventKind::OneOff { start } => {
                let Some(start) = *start else { continue };
                if start < now {
                    warn!(event = %name, "event is in the past");
                    continue;
                }
                handles.push(tokio::spawn(async move {
                    sleep(Duration::from_secs((start - unix_now()).max(0) as u64)).await;
                    spread_sleep(spread).await;
                    let _ = tx.send(EventFire { name, kind }).await;
                }));
            }
            EventKind::Immediate | EventKind::Startup => {
                handles.push(tokio::spawn(async move {
                    spread_sleep(spread).await;
                    let _ = tx.send(EventFire { name, kind }).await;
                }));
            }
            EventKind::ControllerLost | EventKind::ControllerConnected => {
                // only ever fired by an external control channel
                debug!(event = %name, "no local timer for controller event");
            }
        }
    }

    handles
}

async fn run_periodic(
    name: String,
    interval: u32,
    start: Option<i64>,
    end: Option<i64>,
    spread: Option<u32>,
    tx: mpsc::Sender<EventFire>,
) {
    let first = periodic_initial_delay(unix_now(), start, interval);
    if first > 0 {
        sleep(Duration::from_secs(first)).await;
    }

    loop {
        if let Some(end) = end {
            if unix_now() > end {
                warn!(event = %name, "event ending");
                return;
            }
        }
        if tx.is_closed() {
            return;
        }
        deliver(
            &tx,
            EventFire {
                name: name.clone(),
                kind: "periodic",
            },
            spread,
        );
        sleep(Duration::from_secs(u64::from(interval))).await;
    }
}

async fn run_calendar(
    name: String,
    spec: CalendarSpec,
    spread: Option<u32>,
    tx: mpsc::Sender<EventFire>,
) {
    info!(event = %name, "walking calendar with one second granularity");
    loop {
        let now = unix_now();
        if let Some(end) = spec.end {
            if now > end {
                warn!(event = %name, "event ending");
                return;
            }
        }
        if tx.is_closed() {
            return;
        }

        let wait = match calendar_match(&spec, now) {
            CalendarMatch::Match => {
                deliver(
                    &tx,
                    EventFire {
                        name: name.clone(),
                        kind: "calendar",
                    },
                    spread,
                );
                1
            }
            CalendarMatch::NoMatch => {
                // nothing in the current minute can fire
                (60 - now.rem_euclid(60)) as u32
            }
            CalendarMatch::Wait(seconds) => seconds.max(1),
        };
        sleep(Duration::from_secs(u64::from(wait))).await;
    }
}
