//! TCP transport to the IoT gateway

use crate::connection::{ConnectionConfig, ConnectionEvent, ConnectionManager, Subscription};
use crate::transport::traits::MessageTransport;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use iotexec_shared::{codec::Frame, InboundMessage};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Gateway transport speaking the length-prefixed frame codec
pub struct TcpTransport {
    config: ConnectionConfig,
    read_window: usize,
    manager: OnceCell<ConnectionManager>,
}

impl TcpTransport {
    /// Create a transport; no connection is made until `create_receiver`
    pub fn new(config: ConnectionConfig, read_window: usize) -> Self {
        Self {
            config,
            read_window: read_window.max(1),
            manager: OnceCell::new(),
        }
    }

    fn manager(&self) -> Result<&ConnectionManager> {
        self.manager
            .get()
            .ok_or_else(|| anyhow!("Receiver not created"))
    }
}

#[async_trait]
impl MessageTransport for TcpTransport {
    async fn create_receiver(
        &self,
        topic: &str,
        max_pending: usize,
        max_message_bytes: usize,
    ) -> Result<()> {
        if self.manager.initialized() {
            bail!("Receiver already created");
        }

        let subscription = Subscription {
            topic: topic.to_string(),
            max_pending,
            max_message_bytes,
        };
        let manager = ConnectionManager::start(self.config.clone(), subscription).await?;
        self.manager
            .set(manager)
            .map_err(|_| anyhow!("Receiver already created"))
    }

    async fn receive(&self) -> Result<InboundMessage> {
        let manager = self.manager()?;

        loop {
            match manager.recv().await {
                Some(ConnectionEvent::Received(message)) => return Ok(message),
                Some(ConnectionEvent::Connected) => {
                    info!("Reconnected to {}", self.config.gateway_address);
                }
                Some(ConnectionEvent::Disconnected { reason }) => {
                    warn!("Disconnected from gateway: {}", reason);
                }
                Some(ConnectionEvent::ConnectionFailed { reason }) => {
                    warn!("Gateway connection failed: {}", reason);
                }
                None => return Err(anyhow!("Connection manager closed")),
            }
        }
    }

    async fn stream(
        &self,
        headers: &str,
        output: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        let manager = self.manager()?;
        let generation = manager.generation();

        manager
            .send(
                generation,
                Frame::StreamStart {
                    headers: headers.to_string(),
                },
            )
            .await?;

        let mut buf = vec![0u8; self.read_window];
        let mut total = 0usize;
        let relayed: Result<()> = async {
            loop {
                let n = output
                    .read(&mut buf)
                    .await
                    .context("Failed to read command output")?;
                if n == 0 {
                    return Ok(());
                }
                total += n;
                manager
                    .send(generation, Frame::StreamChunk(Bytes::copy_from_slice(&buf[..n])))
                    .await
                    .context("Connection lost while streaming reply")?;
            }
        }
        .await;

        // A reply whose start went to a replaced connection is never ended
        if manager.generation() != generation {
            return Err(relayed
                .err()
                .unwrap_or_else(|| anyhow!("Connection lost while streaming reply")));
        }

        // Terminate the reply even if the output failed partway
        manager.send(generation, Frame::StreamEnd).await?;
        debug!(bytes = total, "Reply streamed");
        relayed
    }

    async fn close(&self) -> Result<()> {
        match self.manager.get() {
            Some(manager) => manager.close().await,
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
