//! Process supervision: configuration, command construction, container
//! wrapping, and the subprocess lifecycle manager.

mod command;
mod config;
pub mod container;
mod error;
mod handler;
mod supervisor;

pub use command::*;
pub use config::*;
pub use error::*;
pub use handler::*;
pub use supervisor::*;
