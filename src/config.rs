//! Service configuration

use crate::connection::ConnectionConfig;
use iotexec_shared::limits;
use std::time::Duration;

/// Configuration for the exec service
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Topic to receive commands on
    pub topic: String,
    /// Messages the transport may hold while a command runs
    pub max_pending: usize,
    /// Exclusive bound on header + body length
    pub max_message_length: usize,
    /// Shell used to run command lines
    pub shell: String,
    /// Optional limit on a single command's run time (none by default)
    pub command_timeout: Option<Duration>,
    /// Pause after a failed receive before trying again
    pub receive_retry_delay: Duration,
    /// Bytes read from command output per chunk
    pub read_window: usize,
    /// Gateway connection settings
    pub connection: ConnectionConfig,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            topic: "exec".into(),
            max_pending: limits::MAX_PENDING_MESSAGES,
            max_message_length: limits::MAX_MESSAGE_LENGTH,
            shell: "/bin/sh".into(),
            command_timeout: None,
            receive_retry_delay: Duration::from_secs(1),
            read_window: limits::READ_WINDOW,
            connection: ConnectionConfig::default(),
        }
    }
}
