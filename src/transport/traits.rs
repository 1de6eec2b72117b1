//! Transport trait abstraction for pluggable message backends

use anyhow::Result;
use async_trait::async_trait;
use iotexec_shared::InboundMessage;
use tokio::io::AsyncRead;

/// Pub/sub client used to receive commands and publish replies
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Subscribe to `topic`, holding at most `max_pending` undelivered
    /// messages of up to `max_message_bytes` each
    async fn create_receiver(
        &self,
        topic: &str,
        max_pending: usize,
        max_message_bytes: usize,
    ) -> Result<()>;

    /// Wait for the next cloud-to-device message
    async fn receive(&self) -> Result<InboundMessage>;

    /// Read `output` to end-of-stream and publish it as one reply tagged
    /// with `headers`
    ///
    /// Output is relayed in bounded chunks; a failure part way through may
    /// leave a partial reply published.
    async fn stream(&self, headers: &str, output: &mut (dyn AsyncRead + Send + Unpin))
        -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
