use thiserror::Error;

/// Error types for sync run state transitions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on event {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Run {operation_id} is not in a processable state: {state}")]
    NotProcessable { operation_id: String, state: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
