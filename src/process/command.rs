//! Command-line construction for the subprocess.
//!
//! Pure functions only, so every branch is independently testable. The
//! resume / fork / fresh branches are mutually exclusive for a given
//! [`ProcessConfig`].

use crate::process::ProcessConfig;

/// MCP tool the subprocess calls for interactive permission prompts.
pub const PERMISSION_PROMPT_TOOL: &str = "mcp__bridge__permission_prompt";

/// Tools pre-authorized in container mode, where the filesystem blast radius
/// is bounded by the mounts.
pub const CONTAINER_ALLOWED_TOOLS: &[&str] = &[
    "Read", "Write", "Edit", "MultiEdit", "Bash", "Glob", "Grep", "WebFetch", "TodoWrite",
];

/// System-prompt addendum always appended: keeps multiple-choice questions in
/// a shape the side-channel can render.
pub const BASE_PROMPT_ADDENDUM: &str = "When you need the user to choose between options, \
present them as a numbered list with one option per line and ask exactly one question at a time.";

/// Extra addendum for supervisor-mode sessions that manage child sessions.
pub const SUPERVISOR_PROMPT_ADDENDUM: &str = "You are supervising child sessions. Delegate \
independent work to child sessions, check on them before merging, and merge one child at a time.";

/// Build the subprocess argv (excluding the binary itself).
#[must_use]
pub fn build_args(config: &ProcessConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "--print",
        "--output-format",
        "stream-json",
        "--input-format",
        "stream-json",
        "--verbose",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    args.extend(session_args(config));

    if config.verbose {
        args.push("--include-partial-messages".to_string());
    }

    if config.containerized {
        args.extend(container_permission_args(config));
    } else {
        args.extend(host_permission_args(config));
    }

    args.push("--append-system-prompt".to_string());
    args.push(system_prompt_addendum(config));

    args
}

/// Fresh, resume-same-session, or fork-from-parent. Resuming the same session
/// is a host-only branch: a container restart always replays from the pinned
/// id because its transcript storage does not survive the container.
fn session_args(config: &ProcessConfig) -> Vec<String> {
    if let Some(parent) = &config.parent_session_id {
        return vec![
            "--resume".to_string(),
            parent.clone(),
            "--fork-session".to_string(),
            "--session-id".to_string(),
            config.session_id.clone(),
        ];
    }
    if config.session_started && !config.containerized {
        return vec!["--resume".to_string(), config.session_id.clone()];
    }
    vec!["--session-id".to_string(), config.session_id.clone()]
}

fn container_permission_args(config: &ProcessConfig) -> Vec<String> {
    let mut args = Vec::new();
    for tool in CONTAINER_ALLOWED_TOOLS {
        args.push("--allowedTools".to_string());
        args.push((*tool).to_string());
    }
    if let Some(path) = &config.mcp_config_path {
        args.push("--mcp-config".to_string());
        args.push(path.display().to_string());
        args.push("--permission-prompt-tool".to_string());
        args.push(PERMISSION_PROMPT_TOOL.to_string());
    } else {
        // No side-channel inside this container; nothing can answer prompts.
        args.push("--dangerously-skip-permissions".to_string());
    }
    args
}

fn host_permission_args(config: &ProcessConfig) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(path) = &config.mcp_config_path {
        args.push("--mcp-config".to_string());
        args.push(path.display().to_string());
    }
    args.push("--permission-prompt-tool".to_string());
    args.push(PERMISSION_PROMPT_TOOL.to_string());
    for tool in &config.allowed_tools {
        args.push("--allowedTools".to_string());
        args.push(tool.clone());
    }
    args
}

fn system_prompt_addendum(config: &ProcessConfig) -> String {
    if config.supervisor_mode {
        format!("{BASE_PROMPT_ADDENDUM}\n\n{SUPERVISOR_PROMPT_ADDENDUM}")
    } else {
        BASE_PROMPT_ADDENDUM.to_string()
    }
}
