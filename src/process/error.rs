//! Supervisor error types.

/// Errors from the process supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Spawn or pipe setup failed.
    #[error("Failed to start subprocess: {0}")]
    Start(#[from] std::io::Error),

    /// Container mode requires stored credentials that were not found.
    #[error("Container credentials not found at {path}")]
    MissingCredentials {
        /// Location that was checked.
        path: String,
    },

    /// A write or interrupt was attempted with no active process.
    #[error("Subprocess is not running")]
    NotRunning,

    /// A containerized subprocess never produced its first result line.
    #[error("Container startup timed out: {diagnostics}")]
    ContainerStartupTimeout {
        /// Tail of the container's diagnostic output.
        diagnostics: String,
    },

    /// The restart budget for this incident is exhausted.
    #[error("Subprocess kept crashing after {attempts} restarts: {detail}")]
    RestartExhausted {
        /// Attempts made before giving up.
        attempts: u32,
        /// Best available diagnostic (stderr tail, exit status, or generic).
        detail: String,
    },
}
