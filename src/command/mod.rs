//! Command execution infrastructure for the exec service
//!
//! This module handles:
//! - Receiving and validating command messages
//! - Extracting the correlation id from message headers
//! - Running the command through the shell
//! - Streaming its output back as a correlated reply

mod dispatcher;
mod executor;

pub use dispatcher::CommandDispatcher;
pub use executor::{CommandExecutor, ShellCommand};
