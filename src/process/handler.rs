//! Event callbacks from the supervisor into the session layer.
//!
//! The supervisor knows nothing about sessions; it reports each event through
//! this trait and acts on the answers. Implementations must not block beyond
//! their own critical sections.

use async_trait::async_trait;

use crate::process::SupervisorError;

/// What a handled line means for supervision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineDisposition {
    /// The line was a result line, completing the current turn. The
    /// supervisor resets its restart budget and raises session-started.
    pub saw_result: bool,
}

/// Whether an unexpected exit should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// The exit was expected (stopped, interrupted, or turn already done).
    NoRestart,
    /// The exit was a crash mid-turn; restart within budget.
    Restart,
}

/// Diagnostic context handed to the exit callback.
#[derive(Debug, Clone, Default)]
pub struct ExitInfo {
    /// Exit status description, when the wait succeeded.
    pub status: Option<String>,
    /// Tail of captured stderr output.
    pub stderr_tail: String,
}

/// Callbacks fired by the supervisor's background workers.
#[async_trait]
pub trait ProcessEventHandler: Send + Sync {
    /// One raw stdout line arrived.
    async fn handle_line(&self, line: &str) -> LineDisposition;

    /// The subprocess exited unexpectedly; decide whether to restart.
    async fn handle_exit(&self, info: ExitInfo) -> ExitDecision;

    /// A restart is about to be attempted (`attempt` of `max`).
    async fn handle_restart_attempt(&self, attempt: u32, max: u32);

    /// Recovery is over; the turn ends with this error.
    async fn handle_fatal(&self, error: SupervisorError);
}
