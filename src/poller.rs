//! Periodic status/stats fetch for the selected test.
//!
//! Every `start` bumps a generation counter. Each tick runs for the generation and
//! id it was spawned with and re-checks both before and after its fetches, so a
//! response that lands after the user switched tests is dropped instead of being
//! applied to the new selection.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{CurrentStats, MonitorBackend};
use crate::config::{EVENT_CHANNEL_CAPACITY, MAX_STATUS_FAILURES};
use crate::model::{StatusUpdate, TestStatus};

#[derive(Debug, Clone)]
pub enum PollEvent {
    Status {
        id: String,
        generation: u64,
        update: StatusUpdate,
    },
    Stats {
        id: String,
        generation: u64,
        stats: CurrentStats,
    },
    /// Terminal status reached. Sent once per generation, after which the loop exits.
    Finished {
        id: String,
        generation: u64,
        status: TestStatus,
    },
    /// Status fetch failed `MAX_STATUS_FAILURES` times in a row. Polling has stopped.
    ConnectionLost {
        id: String,
        generation: u64,
        error: String,
    },
}

impl PollEvent {
    pub fn id(&self) -> &str {
        match self {
            PollEvent::Status { id, .. }
            | PollEvent::Stats { id, .. }
            | PollEvent::Finished { id, .. }
            | PollEvent::ConnectionLost { id, .. } => id,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            PollEvent::Status { generation, .. }
            | PollEvent::Stats { generation, .. }
            | PollEvent::Finished { generation, .. }
            | PollEvent::ConnectionLost { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Default)]
struct PollTarget {
    generation: u64,
    id: Option<String>,
    task: Option<JoinHandle<()>>,
}

impl PollTarget {
    fn is_current(&self, generation: u64, id: &str) -> bool {
        self.generation == generation && self.id.as_deref() == Some(id)
    }
}

pub struct Poller {
    backend: Arc<dyn MonitorBackend>,
    interval: Duration,
    target: Arc<Mutex<PollTarget>>,
    events: broadcast::Sender<PollEvent>,
}

impl Poller {
    pub fn new(backend: Arc<dyn MonitorBackend>, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            interval,
            target: Arc::new(Mutex::new(PollTarget::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.events.subscribe()
    }

    /// Id currently being polled, if any.
    pub fn active_id(&self) -> Option<String> {
        lock(&self.target).id.clone()
    }

    pub fn generation(&self) -> u64 {
        lock(&self.target).generation
    }

    /// Begin polling `id`, replacing any previous target. Returns the new generation.
    pub fn start(&self, id: &str) -> u64 {
        let mut target = lock(&self.target);
        if let Some(task) = target.task.take() {
            task.abort();
        }
        target.generation += 1;
        target.id = Some(id.to_string());
        let generation = target.generation;

        info!("Polling test {} (generation {})", id, generation);
        target.task = Some(tokio::spawn(poll_loop(
            self.backend.clone(),
            self.interval,
            self.target.clone(),
            self.events.clone(),
            generation,
            id.to_string(),
        )));
        generation
    }

    /// Stop polling. Safe to call when already stopped.
    pub fn stop(&self) {
        let mut target = lock(&self.target);
        target.generation += 1;
        if let Some(id) = target.id.take() {
            debug!("Stopped polling test {}", id);
        }
        if let Some(task) = target.task.take() {
            task.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(target: &Mutex<PollTarget>) -> MutexGuard<'_, PollTarget> {
    target.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn still_current(target: &Mutex<PollTarget>, generation: u64, id: &str) -> bool {
    lock(target).is_current(generation, id)
}

/// Clear the target when the loop ends on its own, unless a newer start took over.
fn release(target: &Mutex<PollTarget>, generation: u64, id: &str) {
    let mut target = lock(target);
    if target.is_current(generation, id) {
        target.id = None;
        target.task = None;
    }
}

async fn poll_loop(
    backend: Arc<dyn MonitorBackend>,
    interval: Duration,
    target: Arc<Mutex<PollTarget>>,
    events: broadcast::Sender<PollEvent>,
    generation: u64,
    id: String,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut status_failures: u32 = 0;

    loop {
        ticker.tick().await;
        if !still_current(&target, generation, &id) {
            break;
        }

        let (status, stats) = tokio::join!(backend.test_status(&id), backend.current_stats(&id));

        if !still_current(&target, generation, &id) {
            debug!("Discarding poll results for {} (generation {})", id, generation);
            break;
        }

        // Stats first so the final snapshots are in place before a terminal status.
        match stats {
            Ok(stats) => {
                let _ = events.send(PollEvent::Stats {
                    id: id.clone(),
                    generation,
                    stats,
                });
            }
            Err(e) => warn!("Stats fetch for {} failed: {}", id, e),
        }

        match status {
            Ok(update) => {
                status_failures = 0;
                let terminal = update.status.is_terminal().then(|| update.status.clone());
                let _ = events.send(PollEvent::Status {
                    id: id.clone(),
                    generation,
                    update,
                });
                if let Some(status) = terminal {
                    info!("Test {} reached terminal status {}", id, status);
                    release(&target, generation, &id);
                    let _ = events.send(PollEvent::Finished {
                        id,
                        generation,
                        status,
                    });
                    return;
                }
            }
            Err(e) => {
                status_failures += 1;
                warn!(
                    "Status fetch for {} failed ({}/{}): {}",
                    id, status_failures, MAX_STATUS_FAILURES, e
                );
                if status_failures >= MAX_STATUS_FAILURES {
                    release(&target, generation, &id);
                    let _ = events.send(PollEvent::ConnectionLost {
                        id,
                        generation,
                        error: e.to_string(),
                    });
                    return;
                }
            }
        }
    }
}
