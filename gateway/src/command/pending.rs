//! Tracking of commands sent to the device and awaiting a reply

use iotexec_shared::now_ms;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// A sent command awaiting its reply
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub message_id: String,
    pub command: String,
    pub sent_at: u64,
}

impl PendingRequest {
    /// Check if this request has waited longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration, now: u64) -> bool {
        now.saturating_sub(self.sent_at) > timeout.as_millis() as u64
    }
}

/// Pending requests keyed by message id
#[derive(Default)]
pub struct PendingRequests {
    next_id: AtomicU64,
    pending: RwLock<HashMap<String, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a message id for `command` and start tracking it
    pub async fn register(&self, command: &str) -> String {
        let message_id = (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        let request = PendingRequest {
            message_id: message_id.clone(),
            command: command.to_string(),
            sent_at: now_ms(),
        };
        self.pending.write().await.insert(message_id.clone(), request);
        message_id
    }

    /// Stop tracking a request whose reply arrived
    pub async fn complete(&self, correlation_id: &str) -> Option<PendingRequest> {
        self.pending.write().await.remove(correlation_id)
    }

    /// Remove and return requests that got no reply within `timeout`
    pub async fn take_timed_out(&self, timeout: Duration) -> Vec<PendingRequest> {
        let now = now_ms();
        let mut pending = self.pending.write().await;
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, r)| r.is_timed_out(timeout, now))
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| pending.remove(id))
            .collect()
    }

    /// Get count of pending requests
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_complete() {
        let pending = PendingRequests::new();
        let first = pending.register("uptime").await;
        let second = pending.register("df -h").await;
        assert_ne!(first, second);
        assert_eq!(pending.pending_count().await, 2);

        let done = pending.complete(&first).await.expect("should be pending");
        assert_eq!(done.command, "uptime");
        assert!(pending.complete(&first).await.is_none());
        assert_eq!(pending.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_take_timed_out() {
        let pending = PendingRequests::new();
        pending.register("sleep 100").await;

        assert!(pending.take_timed_out(Duration::from_secs(60)).await.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let expired = pending.take_timed_out(Duration::from_millis(5)).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(pending.pending_count().await, 0);
    }

    #[test]
    fn test_is_timed_out() {
        let request = PendingRequest {
            message_id: "1".into(),
            command: "ls".into(),
            sent_at: 1000,
        };
        assert!(!request.is_timed_out(Duration::from_secs(3), 4000));
        assert!(request.is_timed_out(Duration::from_secs(3), 4001));
    }
}
