//! In-memory transport that records published replies

use super::traits::MessageTransport;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use iotexec_shared::InboundMessage;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A reply captured by [`RecordingTransport::stream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub headers: String,
    pub payload: Vec<u8>,
}

/// Transport fed from a queue, for exercising the dispatcher and executor
///
/// `receive` waits forever once the queue is drained.
#[derive(Default)]
pub struct RecordingTransport {
    inbound: Mutex<VecDeque<Result<InboundMessage, String>>>,
    published: Mutex<Vec<Published>>,
    stream_error: Option<String>,
    /// Fail after the first read instead of after draining the output
    fail_early: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `stream` consumes the output and then fails
    pub fn failing(reason: &str) -> Self {
        Self {
            stream_error: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// A transport whose `stream` fails after the first chunk of output,
    /// while the command may still be writing
    pub fn failing_after_first_chunk(reason: &str) -> Self {
        Self {
            stream_error: Some(reason.to_string()),
            fail_early: true,
            ..Self::default()
        }
    }

    pub fn push(&self, message: InboundMessage) {
        self.inbound.lock().unwrap().push_back(Ok(message));
    }

    pub fn push_error(&self, reason: &str) {
        self.inbound.lock().unwrap().push_back(Err(reason.to_string()));
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn create_receiver(&self, _topic: &str, _max_pending: usize, _max_bytes: usize) -> Result<()> {
        Ok(())
    }

    async fn receive(&self) -> Result<InboundMessage> {
        let next = self.inbound.lock().unwrap().pop_front();
        match next {
            Some(Ok(message)) => Ok(message),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => std::future::pending().await,
        }
    }

    async fn stream(&self, headers: &str, output: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()> {
        let mut payload = Vec::new();
        if self.fail_early {
            let mut chunk = [0u8; 64];
            let n = output.read(&mut chunk).await?;
            payload.extend_from_slice(&chunk[..n]);
        } else {
            output.read_to_end(&mut payload).await?;
        }

        if let Some(reason) = &self.stream_error {
            return Err(anyhow!("{}", reason));
        }

        self.published.lock().unwrap().push(Published {
            headers: headers.to_string(),
            payload,
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
