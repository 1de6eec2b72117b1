mod command;
mod session;

use bytes::Bytes;
use clap::Parser;
use command::{PendingRequests, TimeoutTracker};
use iotexec_shared::{codec::Frame, InboundMessage};
use session::{DeviceSession, ReplyAssembler, SessionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type CurrentDevice = Arc<RwLock<Option<SessionHandle>>>;

/// Send command lines from stdin to an iotexec device and print the replies
#[derive(Parser, Debug)]
#[command(name = "iotexec-gateway")]
struct Cli {
    /// Address to listen on for the device connection
    #[arg(short, long, default_value = "127.0.0.1:7410")]
    listen: String,

    /// Seconds to wait for a reply before reporting it missing
    #[arg(long, default_value_t = 30)]
    reply_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let listener = TcpListener::bind(&cli.listen).await?;
    info!("Gateway listening on {}", cli.listen);

    let pending = Arc::new(PendingRequests::new());
    let device: CurrentDevice = Arc::new(RwLock::new(None));

    let tracker = TimeoutTracker::new(
        pending.clone(),
        Duration::from_secs(cli.reply_timeout_secs),
    );
    tokio::spawn(async move { tracker.run().await });

    let accept_device = device.clone();
    let accept_pending = pending.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Device connected from {}", addr);
                    let session = DeviceSession::new(stream, addr);
                    *accept_device.write().await = Some(session.get_handle());
                    tokio::spawn(handle_session(session, accept_pending.clone()));
                }
                Err(e) => warn!("Accept failed: {}", e),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        let Some(handle) = device.read().await.clone() else {
            warn!("No device connected, dropping command: {}", command);
            continue;
        };

        let message_id = pending.register(command).await;
        let header = format!("messageId:{}\nsource:gateway", message_id);
        let frame = Frame::Message(InboundMessage::new(
            Some(Bytes::from(header)),
            command.to_string(),
        ));

        match handle.send(&frame).await {
            Ok(()) => info!("Sent message {}: {}", message_id, command),
            Err(e) => {
                warn!("Failed to send to {}: {}", handle.addr, e);
                pending.complete(&message_id).await;
            }
        }
    }

    Ok(())
}

async fn handle_session(mut session: DeviceSession, pending: Arc<PendingRequests>) {
    let mut assembler = ReplyAssembler::new();

    while let Some(frame) = session.recv().await {
        match frame {
            Frame::Subscribe {
                topic,
                max_pending,
                max_message_bytes,
            } => {
                info!(
                    "Device subscribed to '{}' (max pending {}, max size {})",
                    topic, max_pending, max_message_bytes
                );
            }
            Frame::Message(_) => warn!("Device sent a command message, ignoring"),
            other => {
                let Some(reply) = assembler.on_frame(other) else {
                    continue;
                };

                let request = match &reply.correlation_id {
                    Some(id) => pending.complete(id).await,
                    None => None,
                };
                match request {
                    Some(request) => println!("<<< [{}] {}", request.message_id, request.command),
                    None => println!("<<< uncorrelated reply ({})", reply.headers.replace('\n', ", ")),
                }
                print!("{}", String::from_utf8_lossy(&reply.payload));
            }
        }
    }

    info!("Device disconnected: {}", session.addr());
}
