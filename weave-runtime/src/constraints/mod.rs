//! Constraint graphs over the variables of a query template.
//!
//! A where-clause is compiled into a DAG of [`Node`]s. Each generated token
//! produces a new [`ProgramState`] snapshot and the root is evaluated
//! against it:
//! - **`false`**: the partial output can no longer satisfy the clause,
//!   generation stops.
//! - **`true`**: keep generating.
//! - **pending**: a nested query is still running; the caller must publish
//!   its result and evaluate again.
//!
//! When generation stops, [`ConstraintGraph::postprocess`] decides the final
//! value of every constrained variable.

pub mod inline_call;
pub mod node;
pub mod postprocess;
pub mod regex;

use std::collections::BTreeMap;

use weave_core::{Eval, Result, Runtime, SubinterpreterKey, Value};

use crate::state::ProgramState;

pub use inline_call::{Argument, CallerScope, InlineCallOp};
pub use node::{walk, EvalContext, Node, NodeRef, Op};
pub use regex::RegexOp;

/// A constraint root together with its nodes in declaration order.
#[derive(Debug, Clone)]
pub struct ConstraintGraph {
    root: NodeRef,
    nodes: Vec<NodeRef>,
}

impl ConstraintGraph {
    pub fn new(root: NodeRef) -> Self {
        let nodes = walk(&root);
        Self { root, nodes }
    }

    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn forward(&self, state: &ProgramState, runtime: &dyn Runtime) -> Result<Eval> {
        self.root.forward(&EvalContext::new(state, runtime))
    }

    /// Appends `token_text` to `variable` and re-evaluates.
    ///
    /// Pattern leaves on `variable` step their retained derivative by the new
    /// text only, and the advanced state is stored in the returned snapshot.
    pub fn follow(
        &self,
        prev: &ProgramState,
        variable: &str,
        token_text: &str,
        runtime: &dyn Runtime,
    ) -> Result<(Eval, ProgramState)> {
        let mut next = prev.with_token(variable, token_text);
        let text = next
            .variable(variable)
            .map(|v| v.text.clone())
            .unwrap_or_default();

        for node in &self.nodes {
            if let Op::Regex(op) = node.op() {
                if op.variable() == variable {
                    let advanced = op.follow(prev.pattern_state(node.id()), &text);
                    next.set_pattern_state(node.id(), advanced);
                }
            }
        }

        let result = self.forward(&next, runtime)?;
        Ok((result, next))
    }

    /// Keys of the nested queries this graph issues under `state`, in
    /// declaration order. Nothing is registered with the runtime, and other
    /// graphs sharing the runtime are not included.
    pub fn subinterpreter_keys(&self, state: &ProgramState) -> Vec<SubinterpreterKey> {
        self.nodes
            .iter()
            .filter(|node| matches!(node.op(), Op::InlineCall(_)))
            .map(|node| SubinterpreterKey::new(node.id(), state.prompt()))
            .collect()
    }

    pub fn inline_calls(&self) -> Vec<NodeRef> {
        InlineCallOp::collect(&self.root)
    }

    pub fn postprocess(
        &self,
        state: &ProgramState,
        runtime: &dyn Runtime,
        variables: &[&str],
    ) -> Result<BTreeMap<String, Value>> {
        postprocess::resolve(&self.root, &EvalContext::new(state, runtime), variables)
    }
}
