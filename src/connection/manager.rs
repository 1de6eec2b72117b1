//! Connection manager with persistent connections and automatic reconnection

use anyhow::{anyhow, bail, Context, Result};
use iotexec_shared::{
    codec::{self, Frame, FrameDecoder},
    InboundMessage,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// (Re)connected to the gateway
    Connected,
    /// Disconnected from the gateway
    Disconnected { reason: String },
    /// Received a command message
    Received(InboundMessage),
    /// A reconnection attempt failed
    ConnectionFailed { reason: String },
}

/// Configuration for the gateway connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Gateway address
    pub gateway_address: String,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            gateway_address: "127.0.0.1:7410".into(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Topic registration replayed on every (re)connect
#[derive(Debug, Clone)]
pub struct Subscription {
    pub topic: String,
    pub max_pending: usize,
    pub max_message_bytes: usize,
}

impl Subscription {
    fn frame(&self) -> Frame {
        Frame::Subscribe {
            topic: self.topic.clone(),
            max_pending: self.max_pending.min(u16::MAX as usize) as u16,
            max_message_bytes: self.max_message_bytes.min(u32::MAX as usize) as u32,
        }
    }
}

enum Outbound {
    /// A frame bound to the connection generation it was queued for
    Frame { generation: u64, frame: Frame },
    Close,
}

/// Manages the persistent connection to the gateway
pub struct ConnectionManager {
    config: ConnectionConfig,
    /// 1 for the initial connection, incremented on every reconnect
    generation: Arc<AtomicU64>,
    /// Channel to send frames to the gateway
    outbound_tx: mpsc::Sender<Outbound>,
    /// Channel to receive connection events
    event_rx: Mutex<mpsc::Receiver<ConnectionEvent>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Connect to the gateway, subscribe, and start the connection loop
    ///
    /// Fails if the first connection cannot be established; later
    /// disconnects are retried in the background.
    pub async fn start(config: ConnectionConfig, subscription: Subscription) -> Result<Self> {
        let stream = connect(&config, &subscription).await?;
        info!(
            "Connected to gateway {} (topic: {})",
            config.gateway_address, subscription.topic
        );

        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(16);
        // Bounded by max_pending: a full queue stops reads from the socket
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(subscription.max_pending.max(1));
        let generation = Arc::new(AtomicU64::new(1));

        let config_clone = config.clone();
        let generation_clone = generation.clone();
        let task = tokio::spawn(async move {
            connection_loop(
                config_clone,
                subscription,
                stream,
                generation_clone,
                outbound_rx,
                event_tx,
            )
            .await;
        });

        Ok(Self {
            config,
            generation,
            outbound_tx,
            event_rx: Mutex::new(event_rx),
            task: Mutex::new(Some(task)),
        })
    }

    /// Current connection generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Queue a frame for the connection identified by `generation`
    ///
    /// Fails once that connection has been replaced. Frames still queued
    /// when a reconnect happens are dropped instead of being written to the
    /// new connection.
    pub async fn send(&self, generation: u64, frame: Frame) -> Result<()> {
        if self.generation() != generation {
            bail!("Connection {} was replaced", generation);
        }
        self.outbound_tx
            .send(Outbound::Frame { generation, frame })
            .await
            .map_err(|_| anyhow!("Connection closed"))
    }

    /// Receive the next connection event
    pub async fn recv(&self) -> Option<ConnectionEvent> {
        self.event_rx.lock().await.recv().await
    }

    /// Flush queued frames and close the connection
    pub async fn close(&self) -> Result<()> {
        let Some(mut task) = self.task.lock().await.take() else {
            return Ok(());
        };

        if self.outbound_tx.send(Outbound::Close).await.is_err() {
            return Ok(());
        }

        if timeout(self.config.connect_timeout, &mut task).await.is_err() {
            task.abort();
            return Err(anyhow!("Timed out closing gateway connection"));
        }
        Ok(())
    }
}

async fn connect(config: &ConnectionConfig, subscription: &Subscription) -> Result<TcpStream> {
    let mut stream = timeout(
        config.connect_timeout,
        TcpStream::connect(&config.gateway_address),
    )
    .await
    .map_err(|_| anyhow!("Timed out connecting to {}", config.gateway_address))?
    .with_context(|| format!("Failed to connect to {}", config.gateway_address))?;

    let encoded = codec::encode(&subscription.frame())?;
    stream.write_all(&encoded).await?;
    Ok(stream)
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    config: ConnectionConfig,
    subscription: Subscription,
    initial: TcpStream,
    generation: Arc<AtomicU64>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut next_stream = Some(initial);
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        let stream = match next_stream.take() {
            Some(stream) => stream,
            None => match connect(&config, &subscription).await {
                Ok(stream) => {
                    reconnect_delay = config.reconnect_delay; // Reset delay
                    generation.fetch_add(1, Ordering::SeqCst);
                    notify(&event_tx, ConnectionEvent::Connected);
                    stream
                }
                Err(e) => {
                    notify(
                        &event_tx,
                        ConnectionEvent::ConnectionFailed {
                            reason: format!("{:#}", e),
                        },
                    );

                    tokio::time::sleep(reconnect_delay).await;
                    // Exponential backoff
                    reconnect_delay =
                        std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
                    continue;
                }
            },
        };

        let current = generation.load(Ordering::SeqCst);
        match handle_connection(stream, current, &mut outbound_rx, &event_tx).await {
            Ok(()) => {
                debug!("Connection loop finished");
                return;
            }
            Err(reason) => {
                notify(
                    &event_tx,
                    ConnectionEvent::Disconnected {
                        reason: format!("{:#}", reason),
                    },
                );
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

/// Report a status event without waiting on a full queue
///
/// The dispatcher may be busy streaming a reply through this same loop, so
/// blocking here could stall both sides.
fn notify(event_tx: &mpsc::Sender<ConnectionEvent>, event: ConnectionEvent) {
    if let Err(e) = event_tx.try_send(event) {
        debug!("Dropped connection event: {:?}", e.into_inner());
    }
}

/// Handle an active connection
///
/// Returns `Ok` when the manager is closed, `Err` when the connection drops.
async fn handle_connection(
    stream: TcpStream,
    generation: u64,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();

    // Reads run separately so a full event queue never stalls reply writes
    let mut read_task = tokio::spawn(read_frames(reader, event_tx.clone()));

    let result: Result<()> = async {
        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => match outbound {
                    Some(Outbound::Frame { generation: queued, frame }) => {
                        if queued != generation {
                            debug!(
                                "Dropping {:?} frame queued for connection {} (now {})",
                                frame.kind(),
                                queued,
                                generation
                            );
                            continue;
                        }
                        let encoded = codec::encode(&frame)?;
                        writer.write_all(&encoded).await?;
                    }
                    Some(Outbound::Close) | None => {
                        writer.shutdown().await?;
                        return Ok(());
                    }
                },
                read = &mut read_task => {
                    return match read {
                        Ok(result) => result,
                        Err(e) => Err(anyhow!("Reader task failed: {}", e)),
                    };
                }
            }
        }
    }
    .await;

    read_task.abort();
    result
}

/// Decode incoming frames and forward command messages
///
/// Returns `Ok` if the event receiver has gone away.
async fn read_frames(mut reader: OwnedReadHalf, event_tx: mpsc::Sender<ConnectionEvent>) -> Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            return Err(anyhow!("Gateway closed connection"));
        }
        decoder.extend(&read_buf[..n]);

        // Process all complete frames
        while let Some(frame) = decoder.decode_next()? {
            match frame {
                Frame::Message(message) => {
                    if event_tx.send(ConnectionEvent::Received(message)).await.is_err() {
                        return Ok(());
                    }
                }
                other => warn!("Ignoring unexpected {:?} frame from gateway", other.kind()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::net::TcpListener;

    async fn read_frame(socket: &mut TcpStream, decoder: &mut FrameDecoder) -> Frame {
        let mut buf = vec![0u8; 1024];
        loop {
            if let Some(frame) = decoder.decode_next().expect("decode error") {
                return frame;
            }
            let n = socket.read(&mut buf).await.expect("read failed");
            assert!(n > 0, "connection closed");
            decoder.extend(&buf[..n]);
        }
    }

    fn subscription() -> Subscription {
        Subscription {
            topic: "exec".into(),
            max_pending: 10,
            max_message_bytes: 4096,
        }
    }

    #[tokio::test]
    async fn test_frames_for_replaced_connection_are_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ConnectionConfig {
            gateway_address: listener.local_addr().unwrap().to_string(),
            reconnect_delay: Duration::from_millis(300),
            max_reconnect_delay: Duration::from_millis(300),
            connect_timeout: Duration::from_secs(2),
        };

        let (started, accepted) = tokio::join!(
            ConnectionManager::start(config, subscription()),
            listener.accept()
        );
        let manager = started.expect("start failed");
        let (first, _) = accepted.unwrap();
        let old = manager.generation();
        assert_eq!(old, 1);

        drop(first);
        let event = timeout(Duration::from_secs(2), manager.recv())
            .await
            .expect("no disconnect event");
        assert!(matches!(event, Some(ConnectionEvent::Disconnected { .. })));

        // Queued while the manager waits to reconnect
        manager
            .send(
                old,
                Frame::StreamStart {
                    headers: "source:exec\nmessagetype:cmdresp".into(),
                },
            )
            .await
            .expect("send before reconnect failed");

        let (mut second, _) = timeout(Duration::from_secs(2), listener.accept())
            .await
            .expect("no reconnect")
            .unwrap();
        let mut decoder = FrameDecoder::new();
        assert!(matches!(
            read_frame(&mut second, &mut decoder).await,
            Frame::Subscribe { .. }
        ));

        let current = timeout(Duration::from_secs(2), async {
            loop {
                let current = manager.generation();
                if current != old {
                    return current;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("generation never advanced");

        assert!(manager.send(old, Frame::StreamEnd).await.is_err());
        manager
            .send(current, Frame::StreamChunk(Bytes::from_static(b"fresh")))
            .await
            .expect("send after reconnect failed");

        assert_eq!(
            read_frame(&mut second, &mut decoder).await,
            Frame::StreamChunk(Bytes::from_static(b"fresh"))
        );

        manager.close().await.expect("close failed");
    }
}
