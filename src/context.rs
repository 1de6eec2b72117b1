//! Service context shared by the dispatcher and executor

use crate::config::ExecConfig;
use crate::transport::MessageTransport;
use std::sync::Arc;

/// Handles built once at startup and read by every component
///
/// Cloning is cheap; all clones refer to the same transport connection.
#[derive(Clone)]
pub struct ServiceContext {
    transport: Arc<dyn MessageTransport>,
    config: Arc<ExecConfig>,
    verbose: bool,
}

impl ServiceContext {
    pub fn new(transport: Arc<dyn MessageTransport>, config: ExecConfig, verbose: bool) -> Self {
        Self {
            transport,
            config: Arc::new(config),
            verbose,
        }
    }

    pub fn transport(&self) -> &dyn MessageTransport {
        self.transport.as_ref()
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Whether per-message diagnostics should be reported
    pub fn verbose(&self) -> bool {
        self.verbose
    }
}
