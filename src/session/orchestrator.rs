//! Session orchestration: one conversation session over one supervisor.
//!
//! The session installs the caller's response channel before anything can
//! fail, wires supervisor callbacks to parsing and channel routing, and
//! finalizes each turn exactly once whether it ends in a result line, a
//! crash, or an explicit stop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::process::{
    ExitDecision, ExitInfo, LineDisposition, ProcessConfig, ProcessEventHandler,
    ProcessSupervisor, SupervisorError,
};
use crate::session::{ResponseGuard, StreamingState, TokenTracker, Turn};
use crate::sidechannel::{SideChannel, SideChannelReceivers};
use crate::wire::{encode_user_message, parse_line, ResponseChunk, StreamMessage, UserContent};

/// Bounded wait before a full response channel drops the rest of a line.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Short wait for the buffer-full warning itself.
const WARNING_TIMEOUT: Duration = Duration::from_millis(100);

/// Response channel capacity.
const RESPONSE_CHANNEL_CAPACITY: usize = 256;

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session was stopped; no further turns are accepted.
    #[error("Session is stopped")]
    Stopped,

    /// The supervisor refused to start or write.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// The outgoing message could not be encoded.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct CoreState {
    history: Vec<Turn>,
    streaming: StreamingState,
    tokens: TokenTracker,
    /// A result line was observed since the last `send`. Crashes after it are
    /// expected exits (restart budget does not apply).
    turn_result_seen: bool,
    stopped: bool,
}

/// Shared session state; also the supervisor's event handler.
struct SessionCore {
    state: Mutex<CoreState>,
    guard: ResponseGuard,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            state: Mutex::new(CoreState {
                streaming: StreamingState::new(),
                ..CoreState::default()
            }),
            guard: ResponseGuard::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Route one line's chunks into accumulation and the response channel.
    async fn route_chunks(&self, chunks: Vec<ResponseChunk>, message: Option<&StreamMessage>) {
        let mut outgoing = Vec::with_capacity(chunks.len() + 1);
        {
            let mut state = self.lock();
            for chunk in chunks {
                match &chunk {
                    ResponseChunk::Text { text } => state.streaming.push_text(text),
                    ResponseChunk::ToolUse { name, summary, .. } => {
                        state.streaming.push_tool_use(name, summary);
                    }
                    _ => {}
                }
                outgoing.push(chunk);
            }

            if let Some(body) = message
                .filter(|m| m.message_type == "assistant")
                .and_then(|m| m.message.as_ref())
            {
                if let Some(model) = &body.model {
                    state.streaming.current_model = Some(model.clone());
                }
                if let (Some(id), Some(usage)) = (&body.id, &body.usage) {
                    if let Some(total) = state.tokens.record(id, usage) {
                        outgoing.push(ResponseChunk::StreamStats {
                            output_tokens: total,
                            cost_usd: None,
                        });
                    }
                }
            }
        }

        for chunk in outgoing {
            match self.guard.forward(chunk, FORWARD_TIMEOUT).await {
                crate::session::Forward::Sent => {}
                crate::session::Forward::Full => {
                    tracing::warn!("Response channel full; dropping remaining chunks for this line");
                    let warning = ResponseChunk::text(
                        "[Some output was dropped: the response buffer stayed full]",
                    );
                    let _ = self.guard.forward(warning, WARNING_TIMEOUT).await;
                    break;
                }
                crate::session::Forward::Inactive => break,
            }
        }
    }

    /// Finalize the turn on a result line.
    async fn finish_turn(&self, message: &StreamMessage) {
        let is_error = message.is_error_result();
        let (total, error_note) = {
            let mut state = self.lock();
            state.streaming.completed = true;
            state.turn_result_seen = true;
            state.tokens.finalize();
            let total = state.tokens.current_total();

            let error_note = is_error.then(|| {
                let note = format!("\n[error: {}]", message.error_text());
                state.streaming.push_text(&note);
                note
            });

            let text = state.streaming.take_text();
            if !text.is_empty() {
                state.history.push(Turn::assistant(text));
            }
            state.streaming.reset();
            state.tokens.reset();
            (total, error_note)
        };

        if let Some(note) = error_note {
            let _ = self.guard.forward(ResponseChunk::text(note), FORWARD_TIMEOUT).await;
        }
        let _ = self
            .guard
            .forward(
                ResponseChunk::StreamStats {
                    output_tokens: total,
                    cost_usd: message.total_cost_usd,
                },
                FORWARD_TIMEOUT,
            )
            .await;
        self.guard.close(ResponseChunk::Done).await;
    }

    /// End the turn after a failed send or a fatal supervisor error.
    async fn fail_turn(&self, message: String) {
        let _ = self
            .guard
            .forward(ResponseChunk::Error { message }, FORWARD_TIMEOUT)
            .await;
        self.guard.close(ResponseChunk::Done).await;
    }
}

#[async_trait]
impl ProcessEventHandler for SessionCore {
    async fn handle_line(&self, line: &str) -> LineDisposition {
        let chunks = parse_line(line);
        let message: Option<StreamMessage> = serde_json::from_str(line.trim()).ok();

        self.route_chunks(chunks, message.as_ref()).await;

        let saw_result = message
            .as_ref()
            .is_some_and(|m| m.message_type == "result");
        if saw_result {
            if let Some(message) = &message {
                self.finish_turn(message).await;
            }
        }
        LineDisposition { saw_result }
    }

    async fn handle_exit(&self, info: ExitInfo) -> ExitDecision {
        let expected = {
            let state = self.lock();
            state.stopped || state.turn_result_seen
        };
        if expected {
            tracing::info!(status = ?info.status, "Subprocess exit was expected");
            return ExitDecision::NoRestart;
        }

        // Crash mid-turn: the turn ends now, with nothing added to history.
        tracing::warn!(
            status = ?info.status,
            "Subprocess crashed mid-turn; finalizing and requesting restart"
        );
        {
            let mut state = self.lock();
            state.streaming.reset();
            state.tokens.reset();
        }
        self.guard.close(ResponseChunk::Done).await;
        ExitDecision::Restart
    }

    async fn handle_restart_attempt(&self, attempt: u32, max: u32) {
        // After a crash the guard is already closed; the notice only lands on
        // a channel a new `send` has installed in the meantime.
        let notice = ResponseChunk::text(format!("[attempting restart {attempt}/{max}]"));
        let _ = self.guard.forward(notice, WARNING_TIMEOUT).await;
    }

    async fn handle_fatal(&self, error: SupervisorError) {
        self.fail_turn(error.to_string()).await;
    }
}

/// A conversational session over a supervised subprocess.
pub struct Session {
    config: ProcessConfig,
    core: Arc<SessionCore>,
    supervisor: Mutex<Option<Arc<ProcessSupervisor>>>,
    side_channel: Mutex<Option<SideChannel>>,
    pending_receivers: Mutex<Option<SideChannelReceivers>>,
    restart_backoff: Option<Duration>,
}

impl Session {
    /// Create a session; the supervisor and side-channel start lazily on the
    /// first `send`.
    #[must_use]
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            core: Arc::new(SessionCore::new()),
            supervisor: Mutex::new(None),
            side_channel: Mutex::new(None),
            pending_receivers: Mutex::new(None),
            restart_backoff: None,
        }
    }

    /// Override the supervisor's restart backoff (tests use a short one).
    #[must_use]
    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = Some(backoff);
        self
    }

    /// Submit a prompt and stream the response.
    ///
    /// The returned receiver yields chunks in parser order and always ends
    /// with a terminal `Done` (possibly preceded by `Error`). The channel is
    /// installed before the subprocess is touched, so even a crash during
    /// startup reports through it.
    ///
    /// # Errors
    ///
    /// Returns `Stopped` after `stop()`, and `Encode` if the content cannot
    /// be serialized. Supervisor start/write failures surface asynchronously
    /// as `Error` + `Done` chunks.
    pub async fn send(
        &self,
        content: Vec<UserContent>,
    ) -> Result<mpsc::Receiver<ResponseChunk>, SessionError> {
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        {
            let mut state = self.core.lock();
            if state.stopped {
                return Err(SessionError::Stopped);
            }
            state.history.push(Turn::user(content.clone()));
            state.turn_result_seen = false;
            state.streaming.begin();
            state.tokens.reset();
        }
        self.core.guard.install(tx).await;

        self.ensure_side_channel();
        let supervisor = self.ensure_supervisor();
        let encoded = encode_user_message(&content)?;

        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            if let Err(error) = supervisor.start().await {
                core.fail_turn(error.to_string()).await;
                return;
            }
            if let Err(error) = supervisor.write_message(&encoded).await {
                core.fail_turn(error.to_string()).await;
            }
        });

        Ok(rx)
    }

    /// Snapshot of the conversation history, safe concurrently with
    /// streaming.
    #[must_use]
    pub fn get_messages(&self) -> Vec<Turn> {
        self.core.lock().history.clone()
    }

    /// Cancel the in-flight turn without destroying the session.
    pub fn interrupt(&self) {
        let supervisor = self.supervisor.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        if let Some(supervisor) = supervisor {
            supervisor.set_interrupted(true);
            supervisor.interrupt();
        }
    }

    /// Stop the session. Idempotent; in-flight readers see `Done`, waiting
    /// side-channel readers unblock.
    pub async fn stop(&self) {
        {
            let mut state = self.core.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }

        let supervisor = self.supervisor.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        if let Some(supervisor) = supervisor {
            supervisor.stop().await;
        }

        let side_channel = self.side_channel.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(side_channel) = side_channel {
            side_channel.stop();
        }

        self.core.guard.close(ResponseChunk::Done).await;
        tracing::info!(session_id = %self.config.session_id, "Session stopped");
    }

    /// Receive side of the side-channel; available once after the first
    /// `send` (or after calling this before any send).
    pub fn take_side_channel_receivers(&self) -> Option<SideChannelReceivers> {
        self.ensure_side_channel();
        self.pending_receivers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    fn ensure_side_channel(&self) {
        let mut guard = self.side_channel.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.is_none() {
            let (channel, receivers) = SideChannel::new();
            *guard = Some(channel);
            *self
                .pending_receivers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(receivers);
        }
    }

    fn ensure_supervisor(&self) -> Arc<ProcessSupervisor> {
        let mut guard = self.supervisor.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(supervisor) = guard.as_ref() {
            return Arc::clone(supervisor);
        }
        let handler: Arc<dyn ProcessEventHandler> = Arc::clone(&self.core) as _;
        let mut supervisor = ProcessSupervisor::new(self.config.clone(), handler);
        if let Some(backoff) = self.restart_backoff {
            supervisor = supervisor.with_restart_backoff(backoff);
        }
        let supervisor = Arc::new(supervisor);
        *guard = Some(Arc::clone(&supervisor));
        supervisor
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.config.session_id)
            .field("stopped", &self.core.lock().stopped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> SessionCore {
        SessionCore::new()
    }

    async fn install(core: &SessionCore, capacity: usize) -> mpsc::Receiver<ResponseChunk> {
        let (tx, rx) = mpsc::channel(capacity);
        core.lock().streaming.begin();
        core.guard.install(tx).await;
        rx
    }

    async fn drain(rx: &mut mpsc::Receiver<ResponseChunk>) -> Vec<ResponseChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn text_line_forwards_and_accumulates() {
        let core = core();
        let mut rx = install(&core, 16).await;

        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"partial answer"}]}}"#;
        let disposition = core.handle_line(line).await;

        assert!(!disposition.saw_result);
        assert_eq!(rx.try_recv().unwrap(), ResponseChunk::text("partial answer"));
        assert_eq!(core.lock().streaming.text(), "partial answer");
    }

    #[tokio::test]
    async fn result_line_completes_turn_and_closes_channel() {
        let core = core();
        let mut rx = install(&core, 16).await;

        core.handle_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"the answer"}]}}"#,
        )
        .await;
        let disposition = core
            .handle_line(r#"{"type":"result","subtype":"success","total_cost_usd":0.12}"#)
            .await;

        assert!(disposition.saw_result);
        let chunks = drain(&mut rx).await;
        assert_eq!(chunks.last(), Some(&ResponseChunk::Done));
        assert!(chunks.iter().any(|c| matches!(
            c,
            ResponseChunk::StreamStats { cost_usd: Some(c), .. } if (*c - 0.12).abs() < f64::EPSILON
        )));

        let state = core.lock();
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].text, "the answer");
        assert!(state.turn_result_seen);
        assert!(state.streaming.text().is_empty());
    }

    #[tokio::test]
    async fn error_result_forwards_note_before_done() {
        let core = core();
        let mut rx = install(&core, 16).await;

        core.handle_line(
            r#"{"type":"result","subtype":"error_during_execution","error":"budget exceeded"}"#,
        )
        .await;

        let chunks = drain(&mut rx).await;
        let note_index = chunks
            .iter()
            .position(|c| matches!(c, ResponseChunk::Text { text } if text.contains("budget exceeded")))
            .expect("error note present");
        let done_index = chunks.iter().position(|c| *c == ResponseChunk::Done).unwrap();
        assert!(note_index < done_index);

        // The note also lands in history as part of the assistant turn.
        assert!(core.lock().history[0].text.contains("budget exceeded"));
    }

    #[tokio::test]
    async fn assistant_usage_emits_monotone_stream_stats() {
        let core = core();
        let mut rx = install(&core, 64).await;

        for (id, tokens) in [("A", 3), ("A", 8), ("B", 5), ("B", 12)] {
            let line = format!(
                r#"{{"type":"assistant","message":{{"id":"{id}","content":[],"usage":{{"output_tokens":{tokens}}}}}}}"#
            );
            core.handle_line(&line).await;
        }

        let mut totals = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            if let ResponseChunk::StreamStats { output_tokens, .. } = chunk {
                totals.push(output_tokens);
            }
        }
        assert_eq!(totals, vec![3, 8, 13, 20]);
    }

    #[tokio::test]
    async fn crash_mid_turn_requests_restart_and_closes() {
        let core = core();
        let mut rx = install(&core, 16).await;

        let decision = core.handle_exit(ExitInfo::default()).await;

        assert_eq!(decision, ExitDecision::Restart);
        assert_eq!(drain(&mut rx).await, vec![ResponseChunk::Done]);
        assert!(core.lock().history.is_empty());
    }

    #[tokio::test]
    async fn crash_after_result_is_expected() {
        let core = core();
        let _rx = install(&core, 16).await;
        core.handle_line(r#"{"type":"result","subtype":"success"}"#).await;

        let decision = core.handle_exit(ExitInfo::default()).await;
        assert_eq!(decision, ExitDecision::NoRestart);
    }

    #[tokio::test]
    async fn crash_when_stopped_is_expected() {
        let core = core();
        let _rx = install(&core, 16).await;
        core.lock().stopped = true;

        let decision = core.handle_exit(ExitInfo::default()).await;
        assert_eq!(decision, ExitDecision::NoRestart);
    }

    #[tokio::test]
    async fn fatal_emits_error_then_done() {
        let core = core();
        let mut rx = install(&core, 16).await;

        core.handle_fatal(SupervisorError::RestartExhausted {
            attempts: 3,
            detail: "it kept dying".to_string(),
        })
        .await;

        let chunks = drain(&mut rx).await;
        assert_eq!(chunks.len(), 2);
        assert!(matches!(
            &chunks[0],
            ResponseChunk::Error { message } if message.contains("it kept dying")
        ));
        assert_eq!(chunks[1], ResponseChunk::Done);
    }

    #[tokio::test]
    async fn tool_use_then_text_gets_blank_line_in_history() {
        let core = core();
        let _rx = install(&core, 16).await;

        core.handle_line(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"/a/b.rs"}}]}}"#,
        )
        .await;
        core.handle_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"saw it"}]}}"#,
        )
        .await;
        core.handle_line(r#"{"type":"result","subtype":"success"}"#).await;

        let history = core.lock().history.clone();
        assert_eq!(history[0].text, "[tool: Read: b.rs]\n\nsaw it");
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_drops_rest_of_line_without_blocking_forever() {
        // Capacity 1 and an unread receiver: the first chunk fills the
        // channel, the second waits out its bound and is dropped, and the
        // call returns instead of blocking indefinitely.
        let core = core();
        let mut rx = install(&core, 1).await;

        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"one"},{"type":"text","text":"two"},{"type":"text","text":"three"}]}}"#;
        tokio::time::timeout(FORWARD_TIMEOUT + Duration::from_secs(5), core.handle_line(line))
            .await
            .expect("bounded wait, not an unbounded block");

        assert_eq!(rx.try_recv().unwrap(), ResponseChunk::text("one"));
        // "two", "three" and the warning all found the channel full.
        assert!(rx.try_recv().is_err());
        // Accumulation still saw every chunk even though forwarding stopped.
        assert_eq!(core.lock().streaming.text(), "onetwothree");
    }

    #[tokio::test]
    async fn usage_on_result_not_required() {
        let core = core();
        let mut rx = install(&core, 16).await;
        core.handle_line(r#"{"type":"result","subtype":"success"}"#).await;

        let chunks = drain(&mut rx).await;
        assert!(chunks.iter().any(|c| matches!(
            c,
            ResponseChunk::StreamStats { output_tokens: 0, cost_usd: None }
        )));
    }
}
