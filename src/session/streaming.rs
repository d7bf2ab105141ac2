//! Per-turn streaming accumulation state.
//!
//! One instance lives for the whole session and is reset to its idle shape
//! after each completed turn. It tracks enough formatting state to insert
//! exactly one blank line between a tool-use block and the text that follows.

/// Mutable state for the turn currently streaming.
#[derive(Debug, Clone, Default)]
pub struct StreamingState {
    /// A turn is in flight.
    pub active: bool,
    /// A result line was observed for this turn.
    pub completed: bool,
    /// Accumulated response text, becomes the assistant turn in history.
    accumulator: String,
    /// The previous appended chunk was a tool use.
    last_was_tool_use: bool,
    /// Trailing newline count of the accumulator (capped at 2).
    trailing_newlines: u8,
    /// No chunk has been appended yet this turn.
    first_chunk: bool,
    /// Model of the currently reporting sub-agent, when known.
    pub current_model: Option<String>,
}

impl StreamingState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            first_chunk: true,
            ..Self::default()
        }
    }

    /// Begin a new turn.
    pub fn begin(&mut self) {
        self.reset();
        self.active = true;
    }

    /// Append response text, restoring a blank line after a tool-use block.
    ///
    /// Newlines the text already starts with count toward the blank line, so
    /// padding only ever fills the difference.
    pub fn push_text(&mut self, text: &str) {
        if self.last_was_tool_use {
            let leading = text.chars().take_while(|c| *c == '\n').count().min(2);
            let present = usize::from(self.trailing_newlines) + leading;
            for _ in present..2 {
                self.accumulator.push('\n');
            }
        }
        self.accumulator.push_str(text);
        self.update_trailing(text);
        self.last_was_tool_use = false;
        self.first_chunk = false;
    }

    /// Append a formatted tool action line.
    pub fn push_tool_use(&mut self, name: &str, summary: &str) {
        if !self.first_chunk && self.trailing_newlines == 0 {
            self.accumulator.push('\n');
            self.trailing_newlines = 1;
        }
        let line = if summary.is_empty() {
            format!("[tool: {name}]\n")
        } else {
            format!("[tool: {name}: {summary}]\n")
        };
        self.accumulator.push_str(&line);
        self.trailing_newlines = 1;
        self.last_was_tool_use = true;
        self.first_chunk = false;
    }

    fn update_trailing(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut count = 0u8;
        for c in text.chars().rev() {
            if c == '\n' && count < 2 {
                count += 1;
            } else {
                break;
            }
        }
        if count == 0 {
            self.trailing_newlines = 0;
        } else if text.chars().all(|c| c == '\n') {
            self.trailing_newlines = (self.trailing_newlines + count).min(2);
        } else {
            self.trailing_newlines = count;
        }
    }

    /// The accumulated text so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.accumulator
    }

    /// Take the accumulated text, leaving the accumulator empty.
    pub fn take_text(&mut self) -> String {
        std::mem::take(&mut self.accumulator)
    }

    /// Reset to the idle shape.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
