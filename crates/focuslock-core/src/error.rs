//! Restriction failure classification
//!
//! Backend failures never propagate into the session state machine's
//! transition logic. They are captured, classified into one of these kinds,
//! and logged; only countdown exhaustion or an explicit end request ever
//! terminates a session.

use thiserror::Error;

/// Failure kinds a restriction backend can report
#[derive(Debug, Clone, Error)]
pub enum RestrictionError {
    /// A prerequisite host privilege is missing. Surfaced to the caller of
    /// `start_session`; the session still activates in degraded form so the
    /// countdown governs its duration.
    #[error("privilege not granted: {0}")]
    PrivilegeNotGranted(String),

    /// A single engage/repair step failed. Swallowed and retried on the next
    /// enforcement tick.
    #[error("transient restriction failure: {0}")]
    Transient(String),

    /// The host lacks the capability entirely. Logged once; the backend
    /// stays degraded for the process lifetime.
    #[error("restriction capability unavailable: {0}")]
    Unavailable(String),
}

impl RestrictionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
