//! Wire protocol: stream-json line shapes, chunk vocabulary, and the parser.

mod chunk;
mod message;
mod parser;

pub use chunk::*;
pub use message::*;
pub use parser::*;
