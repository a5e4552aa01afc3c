//! Weave scheduler: registers nested queries raised by constraint
//! evaluation and runs them to completion.

pub mod request;
pub mod subinterpreter;

pub use request::{RequestState, SubinterpreterRequest};
pub use subinterpreter::{SchedulerConfig, SubinterpreterScheduler};
