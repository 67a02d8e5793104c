//! Failure taxonomy for capture and graph lifecycle operations.
//!
//! Teardown-step failures are deliberately absent: cleanup must always
//! appear to succeed from the caller's perspective, so those are logged
//! and swallowed at the point they occur.

use thiserror::Error;

/// Errors surfaced to the control surface as `{success:false, error}`.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The platform denied or could not provide a capture stream.
    /// Fatal to the attempted start; retrying is legal.
    #[error("failed to acquire capture stream: {0}")]
    Acquisition(String),

    /// A start was attempted inside the cooldown window of the previous
    /// one. Soft failure; the caller should back off and retry.
    #[error("capture start throttled, retry shortly")]
    Throttled,

    /// An operation that needs an active session arrived while idle.
    #[error("no active capture session")]
    NoActiveSession,

    /// A stage failed to initialize. Fatal to the session; forces a full
    /// teardown before the error is reported.
    #[error("audio graph construction failed: {0}")]
    GraphConstruction(String),

    /// The processing host went away mid-command (task exited or its
    /// channel closed). Treated like a dead session.
    #[error("processing host unavailable: {0}")]
    HostGone(String),

    /// Analyser data requested while the graph is absent or the context
    /// is not running.
    #[error("analyser unavailable: {0}")]
    AnalyserUnavailable(String),
}

impl CaptureError {
    /// Whether the failure should flip the coordinator back to idle.
    /// Throttling and no-session conditions leave state untouched.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CaptureError::Throttled
                | CaptureError::NoActiveSession
                | CaptureError::AnalyserUnavailable(_)
        )
    }
}
