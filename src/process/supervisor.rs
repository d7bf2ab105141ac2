//! Subprocess lifecycle management.
//!
//! One supervisor owns the subprocess, its three pipes, and the background
//! workers around them: a stdout line reader, a stderr drainer, an exit
//! monitor, and (container mode) a startup watchdog. The exit monitor is the
//! sole owner of the `Child` and the only caller of `wait()`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::process::container::{
    capture_diagnostics, cleanup_credentials, container_name, container_run_args,
    remove_container, runtime_binary, stage_credentials, ContainerHandle,
    STARTUP_WATCHDOG_TIMEOUT,
};
use crate::process::{
    build_args, ExitDecision, ExitInfo, ProcessConfig, ProcessEventHandler, SupervisorError,
};

/// Restarts allowed per incident before giving up.
pub const MAX_RESTART_ATTEMPTS: u32 = 3;

/// Grace period between stdin EOF and force-kill during stop.
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed delay between restart attempts.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Stderr lines retained for diagnostics.
const STDERR_TAIL_LINES: usize = 40;

#[derive(Debug, Default)]
struct SupervisorState {
    running: bool,
    stopping: bool,
    interrupted: bool,
    watchdog_fired: bool,
    session_started: bool,
    restart_attempts: u32,
    generation: u64,
    pid: Option<u32>,
    cancel: Option<CancellationToken>,
    tracker: Option<TaskTracker>,
    container: Option<ContainerHandle>,
    /// Container diagnostic tail captured by the watchdog.
    diagnostics: String,
}

/// Lifecycle manager for the supervised subprocess.
pub struct ProcessSupervisor {
    config: ProcessConfig,
    handler: Arc<dyn ProcessEventHandler>,
    state: Mutex<SupervisorState>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    /// Raised by the exit monitor once `wait()` has returned.
    wait_done: Notify,
    /// Raised on the first observed result line; releases the watchdog.
    started: Notify,
    restart_backoff: Duration,
    watchdog_timeout: Duration,
}

impl ProcessSupervisor {
    /// Create a supervisor for the given configuration and event handler.
    #[must_use]
    pub fn new(config: ProcessConfig, handler: Arc<dyn ProcessEventHandler>) -> Self {
        Self {
            config,
            handler,
            state: Mutex::new(SupervisorState::default()),
            stdin: tokio::sync::Mutex::new(None),
            wait_done: Notify::new(),
            started: Notify::new(),
            restart_backoff: RESTART_BACKOFF,
            watchdog_timeout: STARTUP_WATCHDOG_TIMEOUT,
        }
    }

    /// Override the restart backoff (tests use a short one).
    #[must_use]
    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// Override the container startup watchdog timeout.
    #[must_use]
    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// True while a subprocess is attached.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Restart attempts consumed in the current incident.
    #[must_use]
    pub fn restart_attempts(&self) -> u32 {
        self.lock().restart_attempts
    }

    /// Reset the restart budget; called on every observed result line.
    pub fn reset_restart_attempts(&self) {
        self.lock().restart_attempts = 0;
    }

    /// Mark the next exit as user-initiated so it is not treated as a crash.
    pub fn set_interrupted(&self, interrupted: bool) {
        self.lock().interrupted = interrupted;
    }

    /// Start the subprocess. No-op when already running.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredentials` in container mode without stored
    /// credentials, and `Start` when spawning or pipe setup fails.
    pub async fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        {
            let mut state = self.lock();
            if state.running {
                return Ok(());
            }
            state.stopping = false;
        }
        self.start_inner().await
    }

    /// (Re)start without clearing the stopping flag; the restart path uses
    /// this so a concurrent `stop()` wins.
    ///
    /// Boxed: the exit monitor spawned here calls back into this function on
    /// restart, so the future type would otherwise be recursive.
    fn start_inner(
        self: &Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), SupervisorError>> + Send + '_>> {
        Box::pin(async move {
            let config = self.snapshot_config();

            let container = if config.containerized {
                let env_file = stage_credentials(&config.session_id)?;
                Some(ContainerHandle {
                    name: container_name(&config.session_id),
                    env_file,
                })
            } else {
                None
            };

            let (program, args) = match &container {
                Some(handle) => (
                    runtime_binary().to_string(),
                    container_run_args(&config, handle),
                ),
                None => (config.binary.clone(), build_args(&config)),
            };

            let mut command = Command::new(&program);
            command
                .args(&args)
                .current_dir(&config.working_dir)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped());

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(error) => {
                    if let Some(handle) = &container {
                        cleanup_credentials(&handle.env_file);
                    }
                    return Err(SupervisorError::Start(error));
                }
            };

            let stdin = child.stdin.take().ok_or_else(pipe_error)?;
            let stdout = child.stdout.take().ok_or_else(pipe_error)?;
            let stderr = child.stderr.take().ok_or_else(pipe_error)?;

            let cancel = CancellationToken::new();
            let tracker = TaskTracker::new();
            // Publishing the new generation and checking `stopping` happen under
            // one lock, so a concurrent `stop()` either sees this generation or
            // aborts it here.
            let generation = {
                let mut state = self.lock();
                if state.stopping {
                    None
                } else {
                    state.running = true;
                    state.interrupted = false;
                    state.watchdog_fired = false;
                    state.diagnostics.clear();
                    state.generation += 1;
                    state.pid = child.id();
                    state.cancel = Some(cancel.clone());
                    state.tracker = Some(tracker.clone());
                    state.container = container.clone();
                    Some(state.generation)
                }
            };
            let Some(generation) = generation else {
                // stop() won the race; discard the freshly spawned child.
                tracing::info!(session_id = %config.session_id, "Start aborted by stop");
                let _ = child.start_kill();
                let _ = child.wait().await;
                if let Some(handle) = &container {
                    remove_container(&handle.name).await;
                    cleanup_credentials(&handle.env_file);
                }
                return Ok(());
            };
            *self.stdin.lock().await = Some(stdin);

            tracing::info!(
                session_id = %config.session_id,
                pid = ?child.id(),
                containerized = config.containerized,
                "Subprocess started"
            );

            let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

            let reader = tracker.spawn(Self::run_reader(
                Arc::clone(self),
                stdout,
                cancel.clone(),
            ));
            tracker.spawn(Self::drain_stderr(stderr, Arc::clone(&stderr_tail)));
            if container.is_some() {
                tracker.spawn(Self::run_watchdog(Arc::clone(self), cancel.clone()));
            }
            tracker.spawn(Self::run_exit_monitor(
                Arc::clone(self),
                child,
                cancel,
                stderr_tail,
                generation,
                reader,
            ));
            tracker.close();

            Ok(())
        })
    }

    /// Config snapshot for this (re)start, carrying the observed
    /// session-started state forward.
    fn snapshot_config(&self) -> ProcessConfig {
        let mut config = self.config.clone();
        config.session_started = config.session_started || self.lock().session_started;
        config
    }

    /// Stop the subprocess and tear down all workers. Idempotent.
    ///
    /// Closes stdin to signal EOF, grants a short grace period, force-kills
    /// on timeout, and blocks until every worker has joined.
    pub async fn stop(&self) {
        // A restart in flight can publish a new generation between the cancel
        // and the join, so loop until no generation is left running.
        loop {
            let (cancel, tracker) = {
                let mut state = self.lock();
                state.stopping = true;
                (state.cancel.clone(), state.tracker.clone())
            };

            // EOF on stdin is the graceful exit signal.
            drop(self.stdin.lock().await.take());

            if let Some(cancel) = cancel {
                cancel.cancel();
            }
            if let Some(tracker) = tracker {
                tracker.wait().await;
            }
            if !self.lock().running {
                break;
            }
        }

        // Normally cleaned by the exit monitor; covers the never-started case.
        let container = self.lock().container.take();
        if let Some(handle) = container {
            remove_container(&handle.name).await;
            cleanup_credentials(&handle.env_file);
        }
    }

    /// Wait until the exit of the current subprocess has been observed.
    ///
    /// Returns immediately when nothing is running.
    pub async fn wait_exited(&self) {
        let notified = self.wait_done.notified();
        tokio::pin!(notified);
        // Register for wakeups before checking, so an exit that lands in
        // between is not missed.
        notified.as_mut().enable();
        if !self.is_running() {
            return;
        }
        notified.await;
    }

    /// Write one message line to the subprocess stdin.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` when no subprocess is attached, and `Start` when
    /// the pipe write fails.
    pub async fn write_message(&self, bytes: &[u8]) -> Result<(), SupervisorError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(SupervisorError::NotRunning)?;
        stdin.write_all(bytes).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send an interrupt signal without terminating the session.
    ///
    /// No-op (and no error) when nothing is running.
    pub fn interrupt(&self) {
        let pid = self.lock().pid;
        let Some(pid) = pid else {
            return;
        };
        send_signal(pid, InterruptKind::Interrupt);
    }

    /// A result line was observed: the turn completed, so the restart budget
    /// resets and the container watchdog stands down.
    fn on_result_observed(&self) {
        {
            let mut state = self.lock();
            state.restart_attempts = 0;
            state.session_started = true;
        }
        self.started.notify_waiters();
    }

    /// Outer half of the line reader. The blocking read lives in its own
    /// worker behind a single-slot channel, so this loop can abandon the wait
    /// on cancellation without leaking it; pipe EOF or process kill unblocks
    /// the inner worker eventually.
    async fn run_reader(
        self: Arc<Self>,
        stdout: tokio::process::ChildStdout,
        cancel: CancellationToken,
    ) {
        let (line_tx, mut line_rx) = mpsc::channel::<std::io::Result<Option<String>>>(1);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let next = lines.next_line().await;
                let finished = !matches!(next, Ok(Some(_)));
                if line_tx.send(next).await.is_err() || finished {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = line_rx.recv() => match next {
                    Some(Ok(Some(line))) => {
                        let disposition = self.handler.handle_line(&line).await;
                        if disposition.saw_result {
                            self.on_result_observed();
                        }
                    }
                    Some(Ok(None)) | None => break,
                    Some(Err(error)) => {
                        tracing::warn!(%error, "Stdout read failed");
                        break;
                    }
                },
            }
        }
    }

    /// Drains stderr concurrently so the pipe never backs up, keeping a
    /// bounded tail for diagnostics.
    async fn drain_stderr(
        stderr: tokio::process::ChildStderr,
        tail: Arc<Mutex<VecDeque<String>>>,
    ) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(stderr = %line, "Subprocess stderr");
            let mut tail = tail.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    /// Container startup watchdog: a hung first line usually means a broken
    /// image, so a timeout is fatal rather than retried.
    async fn run_watchdog(self: Arc<Self>, cancel: CancellationToken) {
        let started = self.started.notified();
        tokio::pin!(started);
        started.as_mut().enable();
        if self.lock().session_started {
            return;
        }
        tokio::select! {
            () = cancel.cancelled() => {}
            () = &mut started => {}
            () = tokio::time::sleep(self.watchdog_timeout) => {
                let (name, pid) = {
                    let state = self.lock();
                    (state.container.as_ref().map(|c| c.name.clone()), state.pid)
                };
                let diagnostics = match &name {
                    Some(name) => capture_diagnostics(name).await,
                    None => String::new(),
                };
                tracing::error!(
                    container = name.as_deref().unwrap_or(""),
                    "Container produced no result line before the watchdog deadline"
                );
                {
                    let mut state = self.lock();
                    state.watchdog_fired = true;
                    state.diagnostics = diagnostics;
                }
                // Exit handling routes through the monitor's wait().
                if let Some(pid) = pid {
                    send_signal(pid, InterruptKind::Kill);
                }
            }
        }
    }

    /// Sole owner of the blocking wait-for-exit call.
    async fn run_exit_monitor(
        self: Arc<Self>,
        mut child: Child,
        cancel: CancellationToken,
        stderr_tail: Arc<Mutex<VecDeque<String>>>,
        generation: u64,
        reader: tokio::task::JoinHandle<()>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            () = cancel.cancelled() => {
                match tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        tracing::warn!("Graceful exit timed out; force-killing subprocess");
                        let _ = child.kill().await;
                        child.wait().await
                    }
                }
            }
        };
        // The result line may still be buffered when wait() returns; drain
        // stdout to EOF before classifying the exit.
        let _ = reader.await;
        self.wait_done.notify_waiters();

        let status_text = match &status {
            Ok(status) => Some(status.to_string()),
            Err(error) => {
                tracing::warn!(%error, "Waiting for subprocess exit failed");
                None
            }
        };

        let (expected, watchdog_fired, diagnostics, container) = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.running = false;
            state.pid = None;
            let expected = state.stopping || state.interrupted;
            state.interrupted = false;
            (
                expected,
                state.watchdog_fired,
                std::mem::take(&mut state.diagnostics),
                state.container.take(),
            )
        };
        drop(self.stdin.lock().await.take());

        if let Some(handle) = &container {
            remove_container(&handle.name).await;
            cleanup_credentials(&handle.env_file);
        }

        let stderr_text = {
            let tail = stderr_tail.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            tail.iter().cloned().collect::<Vec<_>>().join("\n")
        };

        if expected {
            tracing::info!(status = ?status_text, "Subprocess exited after stop/interrupt");
            return;
        }

        if watchdog_fired {
            self.handler
                .handle_fatal(SupervisorError::ContainerStartupTimeout { diagnostics })
                .await;
            return;
        }

        tracing::warn!(
            status = ?status_text,
            stderr_len = stderr_text.len(),
            "Subprocess exited unexpectedly"
        );

        let info = ExitInfo {
            status: status_text.clone(),
            stderr_tail: stderr_text.clone(),
        };
        if self.handler.handle_exit(info).await == ExitDecision::NoRestart {
            return;
        }

        let attempts = self.restart_attempts();
        if attempts >= MAX_RESTART_ATTEMPTS {
            let detail = if stderr_text.is_empty() {
                status_text.unwrap_or_else(|| "subprocess exited unexpectedly".to_string())
            } else {
                stderr_text
            };
            self.handler
                .handle_fatal(SupervisorError::RestartExhausted { attempts, detail })
                .await;
            return;
        }

        let attempt = attempts + 1;
        self.lock().restart_attempts = attempt;
        self.handler
            .handle_restart_attempt(attempt, MAX_RESTART_ATTEMPTS)
            .await;

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(self.restart_backoff) => {}
        }
        if self.lock().stopping {
            return;
        }
        if let Err(error) = self.start_inner().await {
            self.handler.handle_fatal(error).await;
        }
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ProcessSupervisor")
            .field("session_id", &self.config.session_id)
            .field("running", &state.running)
            .field("restart_attempts", &state.restart_attempts)
            .finish_non_exhaustive()
    }
}

fn pipe_error() -> SupervisorError {
    SupervisorError::Start(std::io::Error::other("subprocess pipe not available"))
}

enum InterruptKind {
    Interrupt,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, kind: InterruptKind) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = match kind {
        InterruptKind::Interrupt => Signal::SIGINT,
        InterruptKind::Kill => Signal::SIGKILL,
    };
    let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
    if let Err(error) = kill(nix_pid, signal) {
        tracing::debug!(pid, %error, "Signal delivery failed (process likely exited)");
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _kind: InterruptKind) {
    tracing::warn!("Signal delivery is not supported on this platform");
}
