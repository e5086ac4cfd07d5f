// Task and session lifecycle.
//
// Transitions are pure functions over task records; the state store persists
// each result with a single-key compare-and-swap.

pub mod events;
pub mod guards;
pub mod states;
pub mod task_state_machine;

pub use events::TaskEvent;
pub use guards::TransitionGuard;
pub use states::{SessionStatus, TaskStatus};
pub use task_state_machine::TaskStateMachine;
