pub mod engine;
pub mod types;

pub use engine::{
    auto_transition_target, transition_to, WorkflowEngine, WorkflowHistoryStore,
};
pub use types::{
    default_states, default_transition_table, TransitionTable, WorkflowState, WorkflowTransition,
};
