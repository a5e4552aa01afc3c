//! Weave runtime: pattern derivatives, constraint graphs, and the engine
//! loop that evaluates them token by token.

pub mod constraints;
pub mod engine;
pub mod pattern;
pub mod state;

pub use constraints::{Argument, CallerScope, ConstraintGraph, InlineCallOp, Node, NodeRef};
pub use engine::{Engine, EngineConfig, EngineEvent, Outcome};
pub use pattern::{Derivation, Regex};
pub use state::{PatternState, ProgramState, Variable};
