//! Cache keys: query source text plus the canonical JSON of its arguments.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("arguments cannot be keyed: {0}")]
    Unhashable(String),
}

impl CacheKey {
    /// Key for `source` applied to `args`.
    ///
    /// Arguments go through `serde_json::Value`, whose objects keep their keys
    /// sorted, so two maps with the same entries produce the same key
    /// regardless of insertion order.
    pub fn new<A: Serialize + ?Sized>(source: &str, args: &A) -> Result<Self, KeyError> {
        let canonical = serde_json::to_value(args)
            .and_then(|v| serde_json::to_string(&v))
            .map_err(|e| KeyError::Unhashable(e.to_string()))?;
        Ok(Self(format!("{source}\u{0}{canonical}")))
    }

    /// Deterministic key from the `Debug` rendering of `args`, for arguments
    /// that have no JSON form.
    pub fn fallback<A: fmt::Debug + ?Sized>(source: &str, args: &A) -> Self {
        Self(format!("{source}\u{0}debug:{args:?}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_raw(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.replace('\u{0}', " | "))
    }
}
