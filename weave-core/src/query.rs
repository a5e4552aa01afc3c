//! The query-callable capability: anything that can be invoked as a nested
//! query from inside a constraint.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Result, Value};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Resolved parameter → value bindings handed to a nested query.
pub type Captures = BTreeMap<String, Value>;

/// Lexical scope with an optional parent, searched innermost first.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    symbols: HashMap<String, Value>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Arc<Scope>) -> Self {
        Self {
            symbols: HashMap::new(),
            parent: Some(parent),
        }
    }

    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.symbols.insert(name.into(), value);
    }

    pub fn resolve(&self, name: &str) -> Option<&Value> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(v) = s.symbols.get(name) {
                return Some(v);
            }
            scope = s.parent.as_deref();
        }
        None
    }
}

/// Static context of a query defined as a function: its positional
/// parameter names and the scope it was defined in.
#[derive(Debug, Clone, Default)]
pub struct FunctionContext {
    pub argnames: Vec<String>,
    pub scope: Scope,
}

/// Named outputs produced by one nested query run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub variables: BTreeMap<String, Value>,
}

impl QueryOutput {
    pub fn new(variables: BTreeMap<String, Value>) -> Self {
        Self { variables }
    }

    pub fn single(name: impl Into<String>, value: Value) -> Self {
        let mut variables = BTreeMap::new();
        variables.insert(name.into(), value);
        Self { variables }
    }

    /// The value a caller sees for this run: a `RESULT` variable (trimmed when
    /// it is a string), otherwise the only output, otherwise all outputs as
    /// an object.
    pub fn result(&self) -> Value {
        if let Some(result) = self.variables.get("RESULT") {
            return match result {
                Value::String(s) => Value::String(s.trim().to_string()),
                other => other.clone(),
            };
        }
        if self.variables.len() == 1 {
            if let Some(v) = self.variables.values().next() {
                return v.clone();
            }
        }
        Value::Object(
            self.variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// A nested query that constraints can call.
pub trait QueryFunction: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Names of every free parameter the query declares.
    fn params(&self) -> &[String];

    fn function_context(&self) -> Option<&FunctionContext> {
        None
    }

    /// Static source text, used to key cached results.
    fn source(&self) -> &str;

    fn invoke(&self, bindings: Captures) -> BoxFuture<'static, Result<QueryOutput>>;
}
