//! Process configuration snapshot.

use std::path::PathBuf;

/// Default container image for containerized sessions.
pub const DEFAULT_CONTAINER_IMAGE: &str = "claude-bridge-sandbox:latest";

/// Immutable snapshot describing how to launch the subprocess.
///
/// A fresh snapshot is built before every start and restart, so flags like
/// `session_started` always reflect the state at spawn time.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Session identifier pinned or resumed on the command line.
    pub session_id: String,
    /// Working directory the subprocess runs in.
    pub working_dir: PathBuf,
    /// Repository root, bind-mounted in container mode.
    pub repo_path: PathBuf,
    /// A result line has been observed for this session before; resume it.
    pub session_started: bool,
    /// Tools the caller allows, one `--allowedTools` pair each.
    pub allowed_tools: Vec<String>,
    /// Side-channel (MCP) config path, when the collaborator is available.
    pub mcp_config_path: Option<PathBuf>,
    /// Fork from this parent session instead of starting fresh.
    pub parent_session_id: Option<String>,
    /// Wrap the subprocess in a container.
    pub containerized: bool,
    /// Image used when `containerized` is set.
    pub container_image: String,
    /// Append the supervisor-mode system-prompt addendum.
    pub supervisor_mode: bool,
    /// Request partial-message streaming.
    pub verbose: bool,
    /// Binary to launch; overridable for tests.
    pub binary: String,
}

impl ProcessConfig {
    /// A fresh non-container configuration for a session.
    #[must_use]
    pub fn new(session_id: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            session_id: session_id.into(),
            repo_path: working_dir.clone(),
            working_dir,
            session_started: false,
            allowed_tools: Vec::new(),
            mcp_config_path: None,
            parent_session_id: None,
            containerized: false,
            container_image: DEFAULT_CONTAINER_IMAGE.to_string(),
            supervisor_mode: false,
            verbose: false,
            binary: "claude".to_string(),
        }
    }

    /// A fresh configuration with a generated session id. The subprocess
    /// requires session ids to be UUIDs.
    #[must_use]
    pub fn with_generated_id(working_dir: impl Into<PathBuf>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), working_dir)
    }

    /// Set the caller-supplied tool allow-list.
    #[must_use]
    pub fn with_allowed_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Wire the side-channel config path.
    #[must_use]
    pub fn with_mcp_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.mcp_config_path = Some(path.into());
        self
    }

    /// Fork from a parent session, pinning this config's id as the new one.
    #[must_use]
    pub fn with_parent_session(mut self, parent: impl Into<String>) -> Self {
        self.parent_session_id = Some(parent.into());
        self
    }

    /// Run inside a container with the given image.
    #[must_use]
    pub fn containerized(mut self, image: impl Into<String>) -> Self {
        self.containerized = true;
        self.container_image = image.into();
        self
    }

    /// Enable the supervisor-mode prompt addendum.
    #[must_use]
    pub fn with_supervisor_mode(mut self) -> Self {
        self.supervisor_mode = true;
        self
    }

    /// Enable partial-message streaming.
    #[must_use]
    pub fn with_verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Override the launched binary (tests use a scripted stand-in).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_uuids() {
        let first = ProcessConfig::with_generated_id("/tmp/w");
        let second = ProcessConfig::with_generated_id("/tmp/w");

        assert!(uuid::Uuid::parse_str(&first.session_id).is_ok());
        assert_ne!(first.session_id, second.session_id);
    }
}
