//! Constraint graph nodes and pull-based evaluation.
//!
//! A node is a closed set of operator kinds over a fixed list of
//! predecessors. The graph's shape never changes after construction; only
//! the [`ProgramState`] it is evaluated against does.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use weave_core::{Eval, NodeId, Result, Runtime, Value, WeaveError};

use crate::pattern::Regex;
use crate::state::ProgramState;

use super::inline_call::InlineCallOp;
use super::regex::RegexOp;

pub type NodeRef = Arc<Node>;

#[derive(Debug)]
pub enum Op {
    And,
    Or,
    Not,
    /// Current text of a template variable.
    Var(String),
    Const(Value),
    /// Pattern membership of a variable.
    Regex(RegexOp),
    /// Nested query invoked as a constraint.
    InlineCall(InlineCallOp),
}

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    predecessors: Vec<NodeRef>,
    op: Op,
}

/// Everything one evaluation pass reads. Values computed during the pass are
/// memoized per node, so a node shared by several parents runs once.
pub struct EvalContext<'a> {
    state: &'a ProgramState,
    runtime: &'a dyn Runtime,
    memo: RefCell<HashMap<NodeId, Eval>>,
}

impl<'a> EvalContext<'a> {
    pub fn new(state: &'a ProgramState, runtime: &'a dyn Runtime) -> Self {
        Self {
            state,
            runtime,
            memo: RefCell::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> &'a ProgramState {
        self.state
    }

    pub fn runtime(&self) -> &'a dyn Runtime {
        self.runtime
    }
}

impl Node {
    fn build(predecessors: Vec<NodeRef>, op: Op) -> NodeRef {
        Arc::new(Self {
            id: NodeId::next(),
            predecessors,
            op,
        })
    }

    pub fn and(operands: Vec<NodeRef>) -> NodeRef {
        Self::build(operands, Op::And)
    }

    pub fn or(operands: Vec<NodeRef>) -> NodeRef {
        Self::build(operands, Op::Or)
    }

    pub fn not(operand: NodeRef) -> NodeRef {
        Self::build(vec![operand], Op::Not)
    }

    pub fn var(name: impl Into<String>) -> NodeRef {
        Self::build(Vec::new(), Op::Var(name.into()))
    }

    pub fn constant(value: Value) -> NodeRef {
        Self::build(Vec::new(), Op::Const(value))
    }

    /// `variable` must match `regex`.
    pub fn regex(variable: impl Into<String>, regex: Regex) -> NodeRef {
        let variable = variable.into();
        let var = Self::var(variable.clone());
        Self::build(vec![var], Op::Regex(RegexOp::new(variable, regex)))
    }

    pub fn inline_call(call: InlineCallOp) -> NodeRef {
        Self::build(Vec::new(), Op::InlineCall(call))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn predecessors(&self) -> &[NodeRef] {
        &self.predecessors
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.op, Op::And | Op::Or | Op::Not)
    }

    /// Evaluates this node, pulling every predecessor first.
    ///
    /// Predecessors are never skipped, even when the result is already
    /// decided: evaluating an inline call is what registers its nested query
    /// with the runtime.
    pub fn forward(&self, ctx: &EvalContext<'_>) -> Result<Eval> {
        if let Some(done) = ctx.memo.borrow().get(&self.id) {
            return Ok(done.clone());
        }

        let inputs = self
            .predecessors
            .iter()
            .map(|p| p.forward(ctx))
            .collect::<Result<Vec<_>>>()?;

        let result = if inputs.iter().any(Eval::is_pending) {
            Eval::Pending
        } else {
            self.apply(ctx, &inputs)?
        };

        ctx.memo.borrow_mut().insert(self.id, result.clone());
        Ok(result)
    }

    fn apply(&self, ctx: &EvalContext<'_>, inputs: &[Eval]) -> Result<Eval> {
        let truth = || inputs.iter().filter_map(Eval::as_bool);
        let result = match &self.op {
            Op::And => Eval::from(truth().all(|b| b)),
            Op::Or => Eval::from(truth().any(|b| b)),
            Op::Not => Eval::from(!truth().next().unwrap_or(false)),
            Op::Var(name) => match ctx.state.variable(name) {
                Some(var) => Eval::Value(Value::String(var.text.clone())),
                None => Eval::Pending,
            },
            Op::Const(value) => Eval::Value(value.clone()),
            Op::Regex(op) => op.forward(self.id, ctx)?,
            Op::InlineCall(op) => op.forward(self.id, ctx),
        };
        Ok(result)
    }

    /// Whether this node decides the final value of `variable`.
    pub fn postprocess_var(&self, variable: &str) -> bool {
        match &self.op {
            Op::Regex(op) => op.variable() == variable,
            Op::InlineCall(op) => op.variable() == variable,
            Op::And | Op::Or | Op::Not | Op::Var(_) | Op::Const(_) => false,
        }
    }

    /// Final value of the variable this node owns.
    pub fn postprocess(&self, ctx: &EvalContext<'_>) -> Result<Value> {
        match &self.op {
            Op::Regex(op) => op.postprocess(ctx),
            Op::InlineCall(op) => op.postprocess(self.id, ctx),
            Op::And | Op::Or | Op::Not | Op::Var(_) | Op::Const(_) => Err(WeaveError::Internal(
                format!("node {} does not own a variable", self.id),
            )),
        }
    }

    /// Precedence between two owners of the same variable. `Some(Greater)`
    /// means `self` wins over `other`; `None` means no preference.
    ///
    /// No kind currently declares a preference: nested-call results and
    /// pattern results are incomparable.
    pub fn postprocess_order(&self, _other: &Node) -> Option<Ordering> {
        None
    }
}

/// Every node reachable from `root`, depth-first pre-order, each once.
pub fn walk(root: &NodeRef) -> Vec<NodeRef> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.id) {
            continue;
        }
        stack.extend(node.predecessors.iter().rev().cloned());
        out.push(node);
    }
    out
}
