//! Timeout reporting for requests that never got a reply

use super::pending::PendingRequests;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::warn;

/// Periodically reports and forgets requests with no reply
///
/// The device never retries; re-issuing a request is left to the operator.
pub struct TimeoutTracker {
    pending: Arc<PendingRequests>,
    reply_timeout: Duration,
    check_interval: Duration,
}

impl TimeoutTracker {
    /// Create a new timeout tracker
    pub fn new(pending: Arc<PendingRequests>, reply_timeout: Duration) -> Self {
        Self {
            pending,
            reply_timeout,
            check_interval: Duration::from_millis(1000), // Check every second
        }
    }

    /// Start the timeout monitoring loop
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);

        loop {
            ticker.tick().await;

            for request in self.pending.take_timed_out(self.reply_timeout).await {
                warn!(
                    "No reply to message {} ({}) after {:?}",
                    request.message_id, request.command, self.reply_timeout
                );
            }
        }
    }
}
