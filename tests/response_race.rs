//! Randomized interleavings of the two paths that can finish a turn.
//!
//! Normal completion (result line) and crash/stop teardown both close the
//! response channel through the one-shot guard; whatever order they land in,
//! the channel must close exactly once, with the terminal chunk last, and
//! nothing may be sent after it.

use std::sync::Arc;
use std::time::Duration;

use claude_bridge::session::{Forward, ResponseGuard};
use claude_bridge::wire::ResponseChunk;

#[tokio::test]
async fn concurrent_close_paths_never_double_close() {
    for seed in 0u64..120 {
        let guard = Arc::new(ResponseGuard::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        guard.install(tx).await;

        // A forwarder streaming chunks while both closers race it.
        let forwarder = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                for i in 0..8 {
                    let outcome = guard
                        .forward(ResponseChunk::text(format!("chunk {i}")), Duration::from_millis(50))
                        .await;
                    if outcome != Forward::Sent {
                        break;
                    }
                    if i as u64 % 3 == seed % 3 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let finalize = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                if seed % 2 == 0 {
                    tokio::time::sleep(Duration::from_micros(seed * 7 % 200)).await;
                }
                guard.close(ResponseChunk::Done).await
            })
        };
        let teardown = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                if seed % 2 == 1 {
                    tokio::time::sleep(Duration::from_micros(seed * 13 % 200)).await;
                }
                guard.close(ResponseChunk::Done).await
            })
        };

        let closed_by_finalize = finalize.await.unwrap();
        let closed_by_teardown = teardown.await.unwrap();
        forwarder.await.unwrap();

        // Exactly one path performed the close.
        assert!(
            closed_by_finalize ^ closed_by_teardown,
            "seed {seed}: finalize={closed_by_finalize} teardown={closed_by_teardown}"
        );

        // The channel ends with exactly one terminal chunk and nothing after.
        let mut saw_terminal = false;
        while let Some(chunk) = rx.recv().await {
            assert!(!saw_terminal, "seed {seed}: chunk after terminal: {chunk:?}");
            if chunk.is_terminal() {
                saw_terminal = true;
            }
        }
        assert!(saw_terminal, "seed {seed}: no terminal chunk delivered");
    }
}

#[tokio::test]
async fn late_forwards_after_close_are_inactive() {
    for _ in 0..100 {
        let guard = Arc::new(ResponseGuard::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        guard.install(tx).await;

        let closer = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.close(ResponseChunk::Done).await })
        };
        let sender = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                guard
                    .forward(ResponseChunk::text("racing"), Duration::from_millis(10))
                    .await
            })
        };

        assert!(closer.await.unwrap());
        let _ = sender.await.unwrap();

        // Whatever the interleaving, Done must be the last chunk received.
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            last = Some(chunk);
        }
        assert_eq!(last, Some(ResponseChunk::Done));
    }
}
