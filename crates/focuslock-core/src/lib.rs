//! focuslock-core - the focus session engine
//!
//! "Restrictions are engaged if and only if a session is active."
//!
//! The engine owns a single process-wide session state machine and drives an
//! injected host restriction backend through it:
//! - `session`: the state machine and orchestration entry points
//! - `restriction`: host restriction backends (kiosk, screen-lock,
//!   idle-inhibit) behind one capability trait
//! - `enforcement`: the periodic repair loop that keeps restrictions engaged
//!   against a host that keeps reverting them
//! - `countdown`: the session countdown timer
//! - `escape`: the sustained-hold unlock gesture, the only sanctioned way out
//!   before the countdown expires
//!
//! Everything is in-memory, single-process, single-session. Nothing here
//! claims to be unbreakable; the engine's guarantee is continuous
//! re-assertion and a reliable release when the session ends.

pub mod countdown;
mod enforcement;
pub mod error;
pub mod escape;
pub mod restriction;
pub mod session;

pub use countdown::CountdownSnapshot;
pub use error::RestrictionError;
pub use escape::EscapeProgress;
pub use restriction::{detect, host_tools, Restriction, Strength};
pub use session::{EndReason, SessionConfig, SessionEngine, SessionStart, SessionState};
