//! Token accounting across sub-agent calls.
//!
//! The wire protocol reports output tokens cumulatively within one underlying
//! API call, but the count resets when a new call starts (a delegated
//! sub-agent gets a fresh message id). Totals therefore fold the previous
//! id's final count into an accumulator whenever the id changes.

use crate::wire::Usage;

/// Running token totals for one in-flight request.
#[derive(Debug, Clone, Default)]
pub struct TokenTracker {
    /// Output tokens from message ids that have finished.
    accumulated_output: u64,
    /// Message id currently reporting.
    last_message_id: Option<String>,
    /// Latest cumulative count seen for `last_message_id`.
    last_output: u64,
    input_tokens: u64,
    cache_read_tokens: u64,
    cache_write_tokens: u64,
}

impl TokenTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage attributed to a message id.
    ///
    /// Returns the new running total when it changed, `None` otherwise.
    /// Zero output counts are ignored; partial lines sometimes omit usage.
    pub fn record(&mut self, message_id: &str, usage: &Usage) -> Option<u64> {
        if usage.output_tokens == 0 {
            return None;
        }

        if self.last_message_id.as_deref() != Some(message_id) {
            // A new underlying call started; the previous id's count is final.
            self.accumulated_output += self.last_output;
            self.last_message_id = Some(message_id.to_string());
            self.last_output = 0;
        }

        self.last_output = usage.output_tokens;
        self.input_tokens += usage.input_tokens;
        self.cache_read_tokens += usage.cache_read_input_tokens;
        self.cache_write_tokens += usage.cache_creation_input_tokens;

        Some(self.current_total())
    }

    /// Running output-token total: finished calls plus the open one.
    #[must_use]
    pub fn current_total(&self) -> u64 {
        self.accumulated_output + self.last_output
    }

    /// Fold the open message id into the accumulator. Called when a result
    /// line ends the turn.
    pub fn finalize(&mut self) {
        self.accumulated_output += self.last_output;
        self.last_output = 0;
        self.last_message_id = None;
    }

    #[must_use]
    pub fn cache_read_tokens(&self) -> u64 {
        self.cache_read_tokens
    }

    #[must_use]
    pub fn cache_write_tokens(&self) -> u64 {
        self.cache_write_tokens
    }

    #[must_use]
    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    /// Reset to the idle shape for the next turn.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
