//! Claude Bridge - session-oriented supervision of a stream-json subprocess.
//!
//! Treats a flaky, restart-prone external agent process as a reliable
//! conversational channel: the [`session::Session`] accepts prompts and
//! streams typed [`wire::ResponseChunk`]s back, while the
//! [`process::ProcessSupervisor`] underneath restarts crashes within a
//! bounded budget and tears everything down cleanly on stop.

pub mod process;
pub mod session;
pub mod sidechannel;
pub mod wire;
