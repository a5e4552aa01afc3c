//! Whole-string validation using `regex-automata`.
//!
//! Used only once generation has stopped; derivative stepping never calls it.
//! The host regex is compiled from the serialized syntax tree rather than the
//! source text, so both sides read every construct the same way: a `{` that
//! is not a quantifier is escaped, `{,m}` is written `{0,m}`, and class set
//! operators (`&&`, `--`, `~~`) are written as escaped literals.

use regex_automata::meta;

use weave_core::{Result, WeaveError};

use super::ast::Pattern;

/// Maximum NFA size in bytes (10 MB).
const MAX_NFA_SIZE: usize = 10 * 1024 * 1024;

/// A compiled, fully anchored matcher for one pattern.
#[derive(Debug, Clone)]
pub struct FullMatcher {
    regex: meta::Regex,
}

impl FullMatcher {
    pub fn new(pattern: &Pattern) -> Result<Self> {
        let anchored = format!(r"\A(?:{pattern})\z");
        let regex = meta::Builder::new()
            .configure(meta::Config::new().nfa_size_limit(Some(MAX_NFA_SIZE)))
            .build(&anchored)
            .map_err(|e| WeaveError::Internal(format!("regex compilation error: {e}")))?;

        Ok(Self { regex })
    }

    pub fn is_full_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}
