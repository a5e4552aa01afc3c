use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use crate::query::{BoxFuture, Captures, QueryFunction};
use crate::{NodeId, Result, Value, WeaveError};

/// Identifies one nested-query run: the call site plus the prompt it was
/// issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubinterpreterKey {
    pub call_site: NodeId,
    pub prompt_fingerprint: u64,
}

impl SubinterpreterKey {
    pub fn new(call_site: NodeId, prompt: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        prompt.hash(&mut hasher);
        Self {
            call_site,
            prompt_fingerprint: hasher.finish(),
        }
    }
}

impl std::fmt::Display for SubinterpreterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:016x}", self.call_site, self.prompt_fingerprint)
    }
}

/// The scheduling side of nested queries, as seen by the constraint graph.
///
/// Implementations must be idempotent: repeated calls with the same call site
/// and prompt register at most one request and return the same key.
pub trait Runtime: Send + Sync {
    fn subinterpreter(
        &self,
        call_site: NodeId,
        prompt: &str,
        query: &Arc<dyn QueryFunction>,
        captures: &Captures,
    ) -> SubinterpreterKey;
}

/// A [`Runtime`] that also executes the requests registered with it.
pub trait Scheduler: Runtime {
    /// Whether any registered request has not been resolved yet.
    fn has_pending(&self) -> bool;

    /// Runs every unresolved request to completion. Returns how many
    /// requests this call resolved.
    fn run_pending(&self) -> BoxFuture<'_, Result<usize>>;

    /// The resolution of one request, once it has been reached.
    fn resolution(&self, key: &SubinterpreterKey) -> Option<Resolution>;

    /// Drops the requests behind `keys`, e.g. those of a discarded branch.
    /// Tasks already running finish, but their results become unreachable.
    /// Returns how many requests were removed.
    fn forget(&self, keys: &[SubinterpreterKey]) -> usize;
}

/// Per-branch table of published nested-query results. Append-only: a key is
/// published at most once.
#[derive(Debug, Clone, Default)]
pub struct SubinterpreterResults {
    results: HashMap<SubinterpreterKey, Value>,
}

impl SubinterpreterResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, key: SubinterpreterKey, value: Value) -> Result<()> {
        if self.results.contains_key(&key) {
            return Err(WeaveError::Scheduler(format!(
                "result for {key} already published"
            )));
        }
        self.results.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &SubinterpreterKey) -> Option<&Value> {
        self.results.get(key)
    }

    pub fn contains(&self, key: &SubinterpreterKey) -> bool {
        self.results.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Ready(Value),
    Failed(String),
}

/// Write-once slot for the outcome of one nested query.
#[derive(Debug, Clone, Default)]
pub struct Promise {
    cell: Arc<OnceLock<Resolution>>,
}

impl Promise {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, resolution: Resolution) -> Result<()> {
        self.cell
            .set(resolution)
            .map_err(|_| WeaveError::Scheduler("promise resolved twice".into()))
    }

    /// Current state; never blocks.
    pub fn peek(&self) -> Option<&Resolution> {
        self.cell.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }
}
