//! Command executor - runs a command line and streams its output as a reply

use crate::context::ServiceContext;
use crate::error::ExecError;
use crate::shutdown::Shutdown;
use iotexec_shared::{CorrelationId, ResponseHeaders};
use std::ffi::OsStr;
use std::fmt;
use std::future::Future;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::Sleep;
use tracing::{debug, info, warn};

/// A command line taken from a message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    line: Vec<u8>,
}

impl ShellCommand {
    /// Take the body up to its first NUL as the command line
    pub fn from_body(body: &[u8]) -> Result<Self, ExecError> {
        let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
        if end == 0 {
            return Err(ExecError::InvalidArgument("empty command"));
        }
        Ok(Self {
            line: body[..end].to_vec(),
        })
    }

    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.line
    }

    fn as_os_str(&self) -> &OsStr {
        OsStr::from_bytes(&self.line)
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.line))
    }
}

/// Executes commands through the shell, one at a time
pub struct CommandExecutor {
    ctx: ServiceContext,
}

impl CommandExecutor {
    /// Create a new command executor
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Run `command` and stream its standard output as a `cmdresp` reply
    ///
    /// The child process is always reaped before this returns.
    pub async fn execute(
        &self,
        command: &ShellCommand,
        correlation: Option<&CorrelationId>,
        shutdown: &mut Shutdown,
    ) -> Result<(), ExecError> {
        if self.ctx.verbose() {
            info!("Processing command: {}", command);
            if let Some(id) = correlation {
                info!("MessageID: {}", id);
            }
        }

        let headers = ResponseHeaders::build(correlation.map(CorrelationId::as_str));

        let mut child = self.spawn(command)?;

        let result = match child.stdout.take() {
            Some(mut stdout) => self.relay(&headers, &mut stdout, shutdown).await,
            None => Err(ExecError::StreamUnavailable),
        };

        release(&mut child, result.is_err()).await;
        result
    }

    fn spawn(&self, command: &ShellCommand) -> Result<Child, ExecError> {
        Command::new(&self.ctx.config().shell)
            .arg("-c")
            .arg(command.as_os_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::NotSupported)
    }

    /// Hand the output to the transport
    ///
    /// The timeout and shutdown are observed through the reader, so the
    /// transport sees a failed read and can terminate the reply itself.
    async fn relay(
        &self,
        headers: &str,
        stdout: &mut ChildStdout,
        shutdown: &Shutdown,
    ) -> Result<(), ExecError> {
        let mut output =
            InterruptibleOutput::new(stdout, self.ctx.config().command_timeout, shutdown.clone());

        let result = self.ctx.transport().stream(headers, &mut output).await;

        match (output.interrupt, result) {
            (Some(Interrupt::TimedOut(limit)), _) => Err(ExecError::TimedOut(limit)),
            (Some(Interrupt::Cancelled), _) => Err(ExecError::Cancelled),
            (None, result) => result.map_err(ExecError::Transport),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Interrupt {
    TimedOut(Duration),
    Cancelled,
}

/// Command output that fails its reads once the deadline passes or
/// shutdown is requested
struct InterruptibleOutput<'a> {
    inner: &'a mut ChildStdout,
    deadline: Option<(Duration, Pin<Box<Sleep>>)>,
    cancelled: Pin<Box<dyn Future<Output = ()> + Send>>,
    interrupt: Option<Interrupt>,
}

impl<'a> InterruptibleOutput<'a> {
    fn new(inner: &'a mut ChildStdout, limit: Option<Duration>, mut shutdown: Shutdown) -> Self {
        Self {
            inner,
            deadline: limit.map(|limit| (limit, Box::pin(tokio::time::sleep(limit)))),
            cancelled: Box::pin(async move { shutdown.recv().await }),
            interrupt: None,
        }
    }

    fn poll_interrupt(&mut self, cx: &mut Context<'_>) -> Option<Interrupt> {
        if self.interrupt.is_none() {
            if self.cancelled.as_mut().poll(cx).is_ready() {
                self.interrupt = Some(Interrupt::Cancelled);
            } else if let Some((limit, sleep)) = &mut self.deadline {
                if sleep.as_mut().poll(cx).is_ready() {
                    self.interrupt = Some(Interrupt::TimedOut(*limit));
                }
            }
        }
        self.interrupt
    }
}

impl AsyncRead for InterruptibleOutput<'_> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.poll_interrupt(cx) {
            Some(Interrupt::TimedOut(limit)) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("command timed out after {:?}", limit),
            ))),
            Some(Interrupt::Cancelled) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "command cancelled by shutdown",
            ))),
            None => Pin::new(&mut *self.inner).poll_read(cx, buf),
        }
    }
}

/// Close the output pipe and reap the child
///
/// On failure paths the child is killed first so the wait cannot hang.
async fn release(child: &mut Child, kill: bool) {
    if kill {
        if let Err(e) = child.start_kill() {
            debug!("Command already exited: {}", e);
        }
    }

    match child.wait().await {
        Ok(status) => debug!("Command exited: {}", status),
        Err(e) => warn!("Failed to reap command: {}", e),
    }
}
