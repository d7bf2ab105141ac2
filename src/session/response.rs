//! One-shot guarded response channel.
//!
//! Two independent paths can finish a turn: normal completion on a result
//! line, and crash/stop teardown. Both funnel through this guard, which
//! closes the channel at most once and never delivers a chunk after the
//! terminal one. The guard's lock is held across each bounded send, so sends
//! and the close are strictly serialized; every wait is bounded, so the lock
//! is never held indefinitely.

use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::wire::ResponseChunk;

/// How long the terminal chunk is allowed to wait for channel space.
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of a forwarded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    /// The chunk was delivered.
    Sent,
    /// The channel stayed full for the whole bounded wait.
    Full,
    /// No channel is installed, it was already closed, or the receiver is gone.
    Inactive,
}

#[derive(Debug, Default)]
struct Inner {
    sender: Option<mpsc::Sender<ResponseChunk>>,
    closed: bool,
}

/// Guarded handle to the in-flight response channel.
#[derive(Debug, Default)]
pub struct ResponseGuard {
    inner: Mutex<Inner>,
}

impl ResponseGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh channel for the next turn, replacing any previous one.
    pub async fn install(&self, sender: mpsc::Sender<ResponseChunk>) {
        let mut inner = self.inner.lock().await;
        inner.sender = Some(sender);
        inner.closed = false;
    }

    /// True once the channel has been closed (or none was installed).
    pub async fn is_closed(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.closed || inner.sender.is_none()
    }

    /// Forward a chunk with a bounded wait.
    pub async fn forward(&self, chunk: ResponseChunk, wait: Duration) -> Forward {
        let inner = self.inner.lock().await;
        if inner.closed {
            return Forward::Inactive;
        }
        let Some(sender) = &inner.sender else {
            return Forward::Inactive;
        };

        match tokio::time::timeout(wait, sender.send(chunk)).await {
            Ok(Ok(())) => Forward::Sent,
            Ok(Err(_)) => Forward::Inactive,
            Err(_) => Forward::Full,
        }
    }

    /// Close the channel, delivering `terminal` as its final chunk.
    ///
    /// Returns true for the caller that actually performed the close; every
    /// later caller gets false and the channel is untouched. The terminal
    /// chunk send is best-effort with a short bound so teardown never hangs.
    pub async fn close(&self, terminal: ResponseChunk) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return false;
        }
        inner.closed = true;
        let Some(sender) = inner.sender.take() else {
            return false;
        };

        if tokio::time::timeout(TERMINAL_SEND_TIMEOUT, sender.send(terminal))
            .await
            .is_err()
        {
            tracing::warn!("Terminal chunk dropped: response channel full at close");
        }
        true
    }
}
