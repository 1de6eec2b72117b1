//! Dispatch State Machine
//!
//! Defines the valid states of the command dispatch loop and the events
//! that move it between them.

/// States of the dispatch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    /// Blocked waiting for the next command message
    #[default]
    WaitingForMessage,
    /// Processing a single received message
    Dispatching,
    /// Shutdown requested, loop has exited
    Stopped,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEvent {
    /// A message was received from the transport
    MessageReceived,
    /// One processing attempt finished, whatever its outcome
    CycleComplete,
    /// Shutdown was requested
    ShutdownRequested,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(DispatchState),
    /// Transition was invalid from current state
    Invalid {
        from: DispatchState,
        event: DispatchEvent,
    },
}

/// State machine for the dispatch loop
#[derive(Debug, Default)]
pub struct DispatchStateMachine {
    current_state: DispatchState,
    cycles: u64,
}

impl DispatchStateMachine {
    /// Create a new state machine waiting for a message
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> DispatchState {
        self.current_state
    }

    /// Number of completed dispatch cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: DispatchEvent) -> TransitionResult {
        use DispatchEvent::*;
        use DispatchState::*;

        let next = match (self.current_state, event) {
            (Stopped, _) => None,
            // Shutdown is observed between cycles and by the executor
            (_, ShutdownRequested) => Some(Stopped),
            (WaitingForMessage, MessageReceived) => Some(Dispatching),
            (Dispatching, CycleComplete) => {
                self.cycles += 1;
                Some(WaitingForMessage)
            }
            _ => None,
        };

        match next {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }
}
