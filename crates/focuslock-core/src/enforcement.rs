//! Enforcement loop
//!
//! The host can unilaterally revoke visual and input suppression at any time
//! (refocus, external interrupt, a surface silently dropped down the stack).
//! One-shot setup is therefore never enough; while a session is active this
//! loop re-asserts the restriction on a fixed period, reconciling engine
//! state with whatever the host has undone since the last tick.

use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

use crate::session::SessionEngine;

/// Consecutive repair failures before a degraded-restriction event is logged.
/// The session itself never ends here; only `end_session` does that.
const DEGRADED_THRESHOLD: u32 = 3;

/// Repair task, spawned with the Idle -> Active transition and aborted with
/// the session. Stops naturally once the session is no longer active.
pub(crate) async fn run(engine: SessionEngine) {
    let period = engine.config().enforcement_period;
    let mut ticker = interval_at(Instant::now() + period, period);
    let mut consecutive_failures = 0u32;

    loop {
        ticker.tick().await;
        if !engine.is_active() {
            break;
        }
        match engine.repair_restriction() {
            Ok(()) => consecutive_failures = 0,
            Err(err) => {
                consecutive_failures += 1;
                debug!(%err, consecutive_failures, "restriction repair failed");
                if consecutive_failures == DEGRADED_THRESHOLD {
                    warn!(
                        "restriction degraded: {} consecutive repair failures",
                        DEGRADED_THRESHOLD
                    );
                }
            }
        }
    }
}
