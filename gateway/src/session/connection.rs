//! Connection to a single exec device

use anyhow::Result;
use iotexec_shared::codec::{self, Frame, FrameDecoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::warn;

/// Handle to send frames to the device
#[derive(Clone)]
pub struct SessionHandle {
    pub addr: SocketAddr,
    pub connected_at: Instant,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl SessionHandle {
    /// Send a frame to the device
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let encoded = codec::encode(frame)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        Ok(())
    }
}

/// Active device session
pub struct DeviceSession {
    handle: SessionHandle,
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl DeviceSession {
    /// Create a new device session from a TCP stream
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();

        let handle = SessionHandle {
            addr,
            connected_at: Instant::now(),
            writer: Arc::new(Mutex::new(writer)),
        };

        Self {
            handle,
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Get a cloneable handle for sending frames
    pub fn get_handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Read the next frame from this session
    /// Returns None if the connection is closed
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            // First try to decode from existing buffer
            match self.decoder.decode_next() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(e) => {
                    warn!("Decode error from {}: {}", self.handle.addr, e);
                    return None;
                }
            }

            // Read more data
            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    warn!("Read error from {}: {}", self.handle.addr, e);
                    return None;
                }
            }
        }
    }

    /// Get the remote address
    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }
}
