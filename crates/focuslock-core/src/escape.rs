//! Escape gesture tracking
//!
//! The only sanctioned way out of an active session before the countdown
//! runs out: a continuous hold sustained for the full threshold (10 s by
//! default). Interrupting the hold discards all accumulated progress; there
//! is no partial credit and no gradual decay. Progress is advisory for
//! rendering; the only externally consequential event is completion.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::info;

use crate::session::{EndReason, SessionEngine};

/// Watch cadence while a hold is engaged. Correctness depends only on
/// elapsed-time comparison, not on this rate.
const GESTURE_TICK: Duration = Duration::from_millis(16);

/// Advisory view of the current hold attempt
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EscapeProgress {
    pub elapsed: Duration,
    pub threshold: Duration,
    pub engaged: bool,
}

/// Tracks one continuous hold attempt at a time.
///
/// Attempts are identified by generation so a stale watcher can never act on
/// a newer attempt's progress.
pub(crate) struct EscapeTracker {
    threshold: Duration,
    hold: Mutex<HoldSlot>,
}

#[derive(Default)]
struct HoldSlot {
    generation: u64,
    current: Option<Hold>,
}

struct Hold {
    generation: u64,
    started: Instant,
    watcher: Option<JoinHandle<()>>,
}

impl EscapeTracker {
    pub(crate) fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            hold: Mutex::new(HoldSlot::default()),
        }
    }

    pub(crate) fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Begin a new hold attempt. Returns its generation, or None if a hold is
    /// already engaged (overlapping starts are idempotent).
    pub(crate) fn begin(&self) -> Option<u64> {
        let mut slot = self.hold.lock().unwrap();
        if slot.current.is_some() {
            return None;
        }
        slot.generation += 1;
        let generation = slot.generation;
        slot.current = Some(Hold {
            generation,
            started: Instant::now(),
            watcher: None,
        });
        Some(generation)
    }

    pub(crate) fn attach_watcher(&self, generation: u64, watcher: JoinHandle<()>) {
        let mut slot = self.hold.lock().unwrap();
        match slot.current.as_mut() {
            Some(hold) if hold.generation == generation => hold.watcher = Some(watcher),
            // The hold ended before the watcher was registered.
            _ => watcher.abort(),
        }
    }

    pub(crate) fn elapsed_of(&self, generation: u64) -> Option<Duration> {
        let slot = self.hold.lock().unwrap();
        slot.current
            .as_ref()
            .filter(|hold| hold.generation == generation)
            .map(|hold| hold.started.elapsed())
    }

    /// Clear the hold if `generation` is still current. Called by the watcher
    /// on completion; the watcher is finishing on its own, so no abort.
    pub(crate) fn complete(&self, generation: u64) -> bool {
        let mut slot = self.hold.lock().unwrap();
        match slot.current.as_ref() {
            Some(hold) if hold.generation == generation => {
                slot.current = None;
                true
            }
            _ => false,
        }
    }

    /// Discard any hold in progress. Runs on release, on interruption, and on
    /// every session exit path; all accumulated progress is lost.
    pub(crate) fn reset(&self) {
        let mut slot = self.hold.lock().unwrap();
        if let Some(hold) = slot.current.take() {
            if let Some(watcher) = hold.watcher {
                watcher.abort();
            }
        }
    }

    pub(crate) fn progress(&self) -> EscapeProgress {
        let slot = self.hold.lock().unwrap();
        match slot.current.as_ref() {
            Some(hold) => EscapeProgress {
                elapsed: hold.started.elapsed().min(self.threshold),
                threshold: self.threshold,
                engaged: true,
            },
            None => EscapeProgress {
                elapsed: Duration::ZERO,
                threshold: self.threshold,
                engaged: false,
            },
        }
    }
}

/// Watch task for one hold attempt. Ends the session when the hold reaches
/// the threshold; exits quietly if the hold or the session ends first.
pub(crate) async fn watch(engine: SessionEngine, generation: u64) {
    let tracker = engine.escape_tracker();
    let threshold = tracker.threshold();

    loop {
        sleep(GESTURE_TICK).await;

        if !engine.is_active() {
            // Session ended underneath the hold; progress must not survive.
            tracker.reset();
            break;
        }
        let Some(elapsed) = tracker.elapsed_of(generation) else {
            break;
        };
        if elapsed >= threshold {
            if tracker.complete(generation) {
                info!("escape gesture held to completion");
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.end_session(EndReason::EscapeCompleted).await;
                });
            }
            break;
        }
    }
}
