//! Nested queries used as constraints.
//!
//! `IS_VALID(ANSWER)` in a where-clause becomes an inline call: the first
//! argument names the variable under test, the remaining ones are passed
//! positionally, and every other parameter the nested query declares is
//! bound from the calling scope when the node is built.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use weave_core::{
    Captures, Eval, NodeId, QueryFunction, Result, Runtime, SubinterpreterKey, Value, WeaveError,
};

use super::node::{EvalContext, NodeRef, Op};
use crate::state::ProgramState;

/// One call-site argument.
#[derive(Debug, Clone)]
pub enum Argument {
    /// A reference to a template variable or a caller symbol.
    Var(String),
    Value(Value),
}

/// Symbols visible at the call site.
#[derive(Debug, Clone, Default)]
pub struct CallerScope {
    pub locals: HashMap<String, Value>,
    pub globals: HashMap<String, Value>,
}

impl CallerScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local(mut self, name: impl Into<String>, value: Value) -> Self {
        self.locals.insert(name.into(), value);
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    /// Locals shadow globals.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.locals.get(name).or_else(|| self.globals.get(name))
    }
}

pub struct InlineCallOp {
    query: Arc<dyn QueryFunction>,
    variable: String,
    captures: Captures,
}

impl fmt::Debug for InlineCallOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineCallOp")
            .field("query", &self.query.name())
            .field("variable", &self.variable)
            .field("captures", &self.captures)
            .finish()
    }
}

impl InlineCallOp {
    /// Binds a call site.
    ///
    /// Fails with [`WeaveError::Binding`] when the first argument is not a
    /// variable reference, when positional arity does not match the query's
    /// function context, or when a declared parameter cannot be resolved.
    pub fn new(
        query: Arc<dyn QueryFunction>,
        args: Vec<Argument>,
        caller: &CallerScope,
    ) -> Result<Self> {
        let mut args = args.into_iter();
        let variable = match args.next() {
            Some(Argument::Var(name)) => name,
            other => {
                return Err(WeaveError::Binding(format!(
                    "inline query '{}' must be called with a variable as its first argument, got {other:?}",
                    query.name()
                )))
            }
        };

        let positional = args
            .map(|arg| match arg {
                Argument::Value(v) => Ok(v),
                Argument::Var(name) => caller.lookup(&name).cloned().ok_or_else(|| {
                    WeaveError::Binding(format!(
                        "argument '{name}' of inline query '{}' is not defined in the calling scope",
                        query.name()
                    ))
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        let captures = bind_captures(query.as_ref(), positional, caller)?;
        debug!(
            query = query.name(),
            variable = %variable,
            captures = captures.len(),
            "bound inline call"
        );

        Ok(Self {
            query,
            variable,
            captures,
        })
    }

    pub fn query(&self) -> &Arc<dyn QueryFunction> {
        &self.query
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn captures(&self) -> &Captures {
        &self.captures
    }

    /// Registers the nested query with the runtime and returns its result
    /// when one has been published into the current state.
    /// Registers the call made at `id` under `state` and returns its key.
    fn register(
        &self,
        id: NodeId,
        state: &ProgramState,
        runtime: &dyn Runtime,
    ) -> SubinterpreterKey {
        runtime.subinterpreter(id, state.prompt(), &self.query, &self.captures)
    }

    pub(super) fn forward(&self, id: NodeId, ctx: &EvalContext<'_>) -> Eval {
        let key = self.register(id, ctx.state(), ctx.runtime());
        match ctx.state().results().get(&key) {
            Some(value) => Eval::Value(value.clone()),
            None => Eval::Pending,
        }
    }

    pub(super) fn postprocess(&self, id: NodeId, ctx: &EvalContext<'_>) -> Result<Value> {
        let key = self.register(id, ctx.state(), ctx.runtime());
        ctx.state().results().get(&key).cloned().ok_or_else(|| {
            WeaveError::Unresolved(format!(
                "result of inline query '{}' for '{}' ({key})",
                self.query.name(),
                self.variable
            ))
        })
    }

    /// Inline calls reachable from `root` through boolean connectives only,
    /// in encounter order, each node once.
    pub fn collect(root: &NodeRef) -> Vec<NodeRef> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        collect_into(root, &mut seen, &mut out);
        out
    }
}

fn collect_into(node: &NodeRef, seen: &mut HashSet<NodeId>, out: &mut Vec<NodeRef>) {
    match node.op() {
        Op::InlineCall(_) => {
            if seen.insert(node.id()) {
                out.push(node.clone());
            }
        }
        Op::And | Op::Or | Op::Not => {
            for p in node.predecessors() {
                collect_into(p, seen, out);
            }
        }
        Op::Var(_) | Op::Const(_) | Op::Regex(_) => {}
    }
}

/// Positional arguments first, then caller locals, caller globals, and the
/// query's defining scope.
fn bind_captures(
    query: &dyn QueryFunction,
    positional: Vec<Value>,
    caller: &CallerScope,
) -> Result<Captures> {
    let context = query.function_context();
    let mut captures = Captures::new();

    match context {
        Some(ctx) => {
            if ctx.argnames.len() != positional.len() {
                return Err(WeaveError::Binding(format!(
                    "inline query '{}' takes {} argument(s) after the variable ({}), got {}",
                    query.name(),
                    ctx.argnames.len(),
                    ctx.argnames.join(", "),
                    positional.len()
                )));
            }
            captures.extend(ctx.argnames.iter().cloned().zip(positional));
        }
        None if !positional.is_empty() => {
            warn!(
                query = query.name(),
                count = positional.len(),
                "ignoring positional arguments: query declares no argument names"
            );
        }
        None => {}
    }

    let mut unresolved = Vec::new();
    for param in query.params() {
        if captures.contains_key(param) {
            continue;
        }
        let value = caller
            .locals
            .get(param)
            .or_else(|| caller.globals.get(param))
            .or_else(|| context.and_then(|c| c.scope.resolve(param)));
        match value {
            Some(v) => {
                captures.insert(param.clone(), v.clone());
            }
            None => unresolved.push(param.as_str()),
        }
    }

    if !unresolved.is_empty() {
        return Err(WeaveError::Binding(format!(
            "cannot resolve {} of inline query '{}' from the calling scope",
            unresolved.join(", "),
            query.name()
        )));
    }
    Ok(captures)
}
