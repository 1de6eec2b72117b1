mod command;
mod config;
mod connection;
mod context;
mod error;
mod shutdown;
mod transport;

use clap::{CommandFactory, Parser};
use command::CommandDispatcher;
use config::ExecConfig;
use context::ServiceContext;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use transport::TcpTransport;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Execute cloud-to-device commands and stream their output back
#[derive(Parser, Debug)]
#[command(name = "iotexec", disable_help_flag = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Display this help
    #[arg(short = 'h', long)]
    help: bool,

    /// Gateway address (host:port)
    #[arg(long)]
    gateway: Option<String>,

    /// Topic to receive commands on
    #[arg(long)]
    topic: Option<String>,

    /// Shell used to run commands
    #[arg(long)]
    shell: Option<String>,

    /// Kill commands that run longer than this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl Cli {
    fn apply(&self, mut config: ExecConfig) -> ExecConfig {
        if let Some(gateway) = &self.gateway {
            config.connection.gateway_address = gateway.clone();
        }
        if let Some(topic) = &self.topic {
            config.topic = topic.clone();
        }
        if let Some(shell) = &self.shell {
            config.shell = shell.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.command_timeout = Some(Duration::from_secs(secs));
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    // Help is informational only; the service still starts
    if cli.help {
        eprintln!("{}", Cli::command().render_help());
    }

    let config = cli.apply(ExecConfig::default());
    info!("iotexec starting");
    info!("  gateway: {}", config.connection.gateway_address);
    info!("  topic: {}", config.topic);

    let transport = Arc::new(TcpTransport::new(
        config.connection.clone(),
        config.read_window,
    ));
    let ctx = ServiceContext::new(transport, config, cli.verbose);

    let config = ctx.config();
    if let Err(e) = ctx
        .transport()
        .create_receiver(&config.topic, config.max_pending, config.max_message_length)
        .await
    {
        error!("Failed to create receiver: {:#}", e);
        return ExitCode::FAILURE;
    }

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    let mut dispatcher = CommandDispatcher::new(ctx.clone());
    dispatcher.run(shutdown).await;

    if let Err(e) = ctx.transport().close().await {
        warn!("Failed to close transport: {:#}", e);
    }

    ExitCode::SUCCESS
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
