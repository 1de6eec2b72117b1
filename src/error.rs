//! Error kinds for a single dispatch cycle

use std::time::Duration;
use thiserror::Error;

/// Failures that end processing of one command message
///
/// None of these are fatal to the service: the dispatcher logs them and
/// moves on to the next message.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Message too large: {len} bytes (max: {max})")]
    MessageTooLarge { len: usize, max: usize },

    #[error("Command output stream unavailable")]
    StreamUnavailable,

    #[error("Command could not be started: {0}")]
    NotSupported(#[source] std::io::Error),

    #[error("Command timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Command cancelled by shutdown")]
    Cancelled,

    /// Error reported by the transport while streaming the reply
    #[error(transparent)]
    Transport(anyhow::Error),
}
