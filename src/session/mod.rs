//! Session orchestration: streaming state, response routing, token
//! accounting, and the conversation history.

mod history;
mod orchestrator;
mod response;
mod streaming;
mod tokens;

pub use history::*;
pub use orchestrator::*;
pub use response::*;
pub use streaming::*;
pub use tokens::*;
