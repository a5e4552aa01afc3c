use std::sync::Arc;

use weave_core::{Captures, Promise, QueryFunction, SubinterpreterKey};

/// The lifecycle state of a nested-query request in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Registered, not started yet.
    Waiting,
    /// Handed to a task.
    Running,
    /// The promise has been resolved, successfully or not.
    Finished,
}

/// One nested query registered by a constraint evaluation.
#[derive(Debug)]
pub struct SubinterpreterRequest {
    pub key: SubinterpreterKey,
    pub query: Arc<dyn QueryFunction>,
    pub captures: Captures,
    pub state: RequestState,
    pub promise: Promise,
}

impl SubinterpreterRequest {
    pub fn new(
        key: SubinterpreterKey,
        query: Arc<dyn QueryFunction>,
        captures: Captures,
    ) -> Self {
        Self {
            key,
            query,
            captures,
            state: RequestState::Waiting,
            promise: Promise::new(),
        }
    }
}
