use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Values flowing through the constraint graph and out of nested queries.
pub type Value = serde_json::Value;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a constraint node. Doubles as the call-site
/// identity of inline calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of evaluating one node against one program state.
#[derive(Debug, Clone, PartialEq)]
pub enum Eval {
    /// Not yet determined (e.g. a nested query has not been resolved).
    Pending,
    Value(Value),
}

impl Eval {
    pub fn is_pending(&self) -> bool {
        matches!(self, Eval::Pending)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Eval::Pending => None,
            Eval::Value(v) => Some(v),
        }
    }

    /// Truthiness of a definite value; `None` while pending.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().map(truthy)
    }
}

impl From<bool> for Eval {
    fn from(b: bool) -> Self {
        Eval::Value(Value::Bool(b))
    }
}

/// `false`, `null`, zero, and empty strings/arrays/objects are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Generation parameters forwarded to a token stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: usize,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<BTreeMap<u32, f32>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.0,
            top_logprobs: None,
            logit_bias: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[serde(rename = "length")]
    MaxTokens,
    #[serde(rename = "stop")]
    EosToken,
    ConstraintViolated,
    Cancelled,
}

/// One event of a token stream, tagged with the stream it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEvent {
    pub stream_id: u64,
    pub token: u32,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub logprob: Option<f32>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl TokenEvent {
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}
