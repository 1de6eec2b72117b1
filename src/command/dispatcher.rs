//! Command dispatcher - receives command messages and runs them one at a time

use super::executor::{CommandExecutor, ShellCommand};
use crate::context::ServiceContext;
use crate::error::ExecError;
use crate::shutdown::Shutdown;
use iotexec_shared::{
    state_machine::{DispatchEvent, DispatchState, DispatchStateMachine, TransitionResult},
    CorrelationId, InboundMessage,
};
use tracing::{debug, info, warn};

/// Receives command messages and hands them to the executor
///
/// Strictly sequential: the next message is not received until the current
/// command has finished and its reply has been streamed.
pub struct CommandDispatcher {
    ctx: ServiceContext,
    executor: CommandExecutor,
    fsm: DispatchStateMachine,
}

impl CommandDispatcher {
    /// Create a new command dispatcher
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            executor: CommandExecutor::new(ctx.clone()),
            ctx,
            fsm: DispatchStateMachine::new(),
        }
    }

    /// Get the current dispatch state
    pub fn state(&self) -> DispatchState {
        self.fsm.state()
    }

    /// Number of messages processed so far
    pub fn cycles(&self) -> u64 {
        self.fsm.cycles()
    }

    /// Wait for and process messages until shutdown is requested
    pub async fn run(&mut self, mut shutdown: Shutdown) {
        info!(
            "Waiting for commands on '{}' via {}",
            self.ctx.config().topic,
            self.ctx.transport().name()
        );

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                received = self.ctx.transport().receive() => received,
            };

            match received {
                Ok(message) => {
                    self.transition(DispatchEvent::MessageReceived);
                    let result = self.process_message(message, &mut shutdown).await;
                    self.transition(DispatchEvent::CycleComplete);

                    match result {
                        Ok(()) => debug!("Command completed"),
                        Err(e) if self.ctx.verbose() => warn!("ProcessMessage: {}", e),
                        Err(e) => debug!("ProcessMessage: {}", e),
                    }
                }
                Err(e) => {
                    if self.ctx.verbose() {
                        warn!("Receive failed: {:#}", e);
                    }
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.ctx.config().receive_retry_delay) => {}
                    }
                }
            }
        }

        self.transition(DispatchEvent::ShutdownRequested);
        info!("Dispatcher stopped after {} commands", self.fsm.cycles());
    }

    /// Validate one message and execute its body as a command
    pub async fn process_message(
        &self,
        message: InboundMessage,
        shutdown: &mut Shutdown,
    ) -> Result<(), ExecError> {
        let max = self.ctx.config().max_message_length;

        debug!(
            header_len = message.header_len(),
            body_len = message.body.len(),
            "Received message"
        );

        if !message.fits_within(max) {
            return Err(ExecError::MessageTooLarge {
                len: message.total_len(),
                max,
            });
        }

        let correlation = message.header.as_deref().and_then(CorrelationId::from_header);
        let command = ShellCommand::from_body(&message.body)?;

        self.executor
            .execute(&command, correlation.as_ref(), shutdown)
            .await
    }

    fn transition(&mut self, event: DispatchEvent) {
        if let TransitionResult::Invalid { from, event } = self.fsm.process_event(event) {
            warn!("Ignoring {:?} while {:?}", event, from);
        }
    }
}
