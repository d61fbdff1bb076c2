//! Session countdown
//!
//! One timer per active session. Decrements once a second on a steady clock;
//! on reaching zero it ends the session exactly once. Not pausable: the only
//! terminal conditions are reaching zero and the session ending externally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval_at, Instant};
use tracing::info;

use crate::session::{EndReason, SessionEngine};

/// Countdown owned by the engine, reset to `total` whenever a session starts.
/// `remaining` only decreases while the session is active.
pub struct CountdownState {
    total: Duration,
    remaining_secs: AtomicU64,
}

impl CountdownState {
    pub fn new(total: Duration) -> Self {
        Self {
            total,
            remaining_secs: AtomicU64::new(total.as_secs()),
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_secs(self.remaining_secs.load(Ordering::SeqCst))
    }

    pub fn snapshot(&self) -> CountdownSnapshot {
        CountdownSnapshot {
            remaining_secs: self.remaining_secs.load(Ordering::SeqCst),
            total_secs: self.total.as_secs(),
        }
    }

    pub(crate) fn reset(&self) {
        self.remaining_secs
            .store(self.total.as_secs(), Ordering::SeqCst);
    }

    /// Saturating one-second decrement. Returns the value after decrementing.
    pub(crate) fn tick_down(&self) -> u64 {
        let mut current = self.remaining_secs.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return 0;
            }
            match self.remaining_secs.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return current - 1,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Read-only countdown view for rendering
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CountdownSnapshot {
    pub remaining_secs: u64,
    pub total_secs: u64,
}

impl CountdownSnapshot {
    /// Progress as a percentage (0-100)
    pub fn progress_percent(&self) -> u32 {
        if self.total_secs == 0 {
            return 100;
        }
        let elapsed = self.total_secs.saturating_sub(self.remaining_secs);
        ((elapsed * 100) / self.total_secs).min(100) as u32
    }
}

/// Countdown task, spawned with the Idle -> Active transition.
///
/// Ending the session is delegated to a fresh task so `end_session` can
/// await this task's handle without joining itself.
pub(crate) async fn run(engine: SessionEngine) {
    let period = Duration::from_secs(1);
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;
        if !engine.is_active() {
            break;
        }
        if engine.countdown_state().tick_down() == 0 {
            info!("countdown reached zero");
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.end_session(EndReason::CountdownExpired).await;
            });
            break;
        }
    }
}
