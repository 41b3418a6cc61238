//! # Sync Run State Machine
//!
//! `idle → validating → lock_acquiring → counting → running →
//! {completed | failed | cancelled}`, with a `running → running` self loop per
//! committed batch and `running → completing → completed` once the completion
//! predicate holds.

pub mod errors;
pub mod events;
pub mod states;
pub mod sync_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::SyncEvent;
pub use states::SyncStatus;
pub use sync_state_machine::SyncStateMachine;
