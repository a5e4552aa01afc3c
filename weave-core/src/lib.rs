//! Weave core types, traits, and error definitions.

pub mod error;
pub mod query;
pub mod scheduler;
pub mod types;

pub use error::{Result, WeaveError};
pub use query::{BoxFuture, Captures, FunctionContext, QueryFunction, QueryOutput, Scope};
pub use scheduler::{
    Promise, Resolution, Runtime, Scheduler, SubinterpreterKey, SubinterpreterResults,
};
pub use types::*;
