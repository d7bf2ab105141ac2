//! Container wrapping for the subprocess.
//!
//! In container mode the subprocess becomes a container-runtime invocation:
//! the working directory is bind-mounted read-write, the side-channel config
//! read-only, and credentials travel through a restricted-permission env-file
//! so they never show up in a process listing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::process::{build_args, ProcessConfig, SupervisorError};

/// How long a containerized subprocess gets to produce its first result line.
pub const STARTUP_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(120);

/// Diagnostic lines captured from the container on failure.
const DIAGNOSTIC_TAIL_LINES: &str = "50";

/// Container runtime binary.
const RUNTIME: &str = "docker";

/// Staged container resources that must be cleaned up on stop.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    /// Container name, used for force-removal and log capture.
    pub name: String,
    /// Credentials env-file staged for this run.
    pub env_file: PathBuf,
}

/// Container name for a session.
#[must_use]
pub fn container_name(session_id: &str) -> String {
    format!("claude-bridge-{session_id}")
}

/// Stage the credential env-file for a container run.
///
/// Credentials are read from the host's stored OAuth file and rewritten as a
/// `KEY=value` env-file with owner-only permissions.
///
/// # Errors
///
/// Returns `MissingCredentials` when the stored file does not exist or does
/// not contain a token, and `Start` for I/O failures while staging.
pub fn stage_credentials(session_id: &str) -> Result<PathBuf, SupervisorError> {
    let source = credentials_path();
    let raw = std::fs::read_to_string(&source).map_err(|_| SupervisorError::MissingCredentials {
        path: source.display().to_string(),
    })?;

    let token = extract_oauth_token(&raw).ok_or_else(|| SupervisorError::MissingCredentials {
        path: source.display().to_string(),
    })?;

    let env_file = std::env::temp_dir().join(format!("claude-bridge-{session_id}.env"));
    std::fs::write(&env_file, format!("CLAUDE_CODE_OAUTH_TOKEN={token}\n"))?;
    restrict_permissions(&env_file)?;

    Ok(env_file)
}

fn credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".claude")
        .join(".credentials.json")
}

fn extract_oauth_token(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value
        .get("claudeAiOauth")
        .and_then(|o| o.get("accessToken"))
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Build the container-runtime argv for a configured subprocess.
///
/// Pure with respect to its inputs; the returned vector is the full argument
/// list for the runtime binary.
#[must_use]
pub fn container_run_args(config: &ProcessConfig, handle: &ContainerHandle) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-i".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        handle.name.clone(),
        "-v".to_string(),
        format!("{0}:{0}", config.repo_path.display()),
        "-w".to_string(),
        config.working_dir.display().to_string(),
        "--env-file".to_string(),
        handle.env_file.display().to_string(),
    ];

    if let Some(mcp_path) = &config.mcp_config_path {
        args.push("-v".to_string());
        args.push(format!("{0}:{0}:ro", mcp_path.display()));
    }

    args.push(config.container_image.clone());
    args.push(config.binary.clone());
    args.extend(build_args(config));
    args
}

/// The program to launch in container mode.
#[must_use]
pub fn runtime_binary() -> &'static str {
    RUNTIME
}

/// Force-remove the container by name; best-effort.
pub async fn remove_container(name: &str) {
    match Command::new(RUNTIME).args(["rm", "-f", name]).output().await {
        Ok(output) if output.status.success() => {
            tracing::debug!(container = name, "Removed container");
        }
        Ok(output) => {
            tracing::debug!(
                container = name,
                status = %output.status,
                "Container removal returned non-zero (likely already gone)"
            );
        }
        Err(error) => {
            tracing::warn!(container = name, %error, "Failed to invoke container removal");
        }
    }
}

/// Capture the tail of the container's diagnostic output.
pub async fn capture_diagnostics(name: &str) -> String {
    match Command::new(RUNTIME)
        .args(["logs", "--tail", DIAGNOSTIC_TAIL_LINES, name])
        .output()
        .await
    {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&stderr);
            }
            text
        }
        Err(error) => format!("(could not capture container logs: {error})"),
    }
}

/// Delete the staged env-file; best-effort.
pub fn cleanup_credentials(env_file: &Path) {
    if let Err(error) = std::fs::remove_file(env_file) {
        if error.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %env_file.display(), %error, "Failed to delete staged env-file");
        }
    }
}
