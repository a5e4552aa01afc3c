//! Pattern derivative engine.
//!
//! Instead of re-matching a growing string from scratch, a [`Regex`] is
//! stepped one character at a time: each step rewrites the syntax tree into
//! the residual pattern that the rest of the input must match.
//!
//! ```text
//! "(a|bb)c"  --'b'-->  "bc"  --'b'-->  "c"  --'c'-->  ""
//! ```
//!
//! Residuals are canonicalized after every step, so two residuals compare
//! equal when their serialized forms are identical. That equality is
//! syntactic only; no language-equivalence check is attempted.

pub mod ast;
pub mod derive;
pub mod fullmatch;
pub mod parser;
pub mod simplify;

use std::sync::OnceLock;

use weave_core::Result;

/// Maximum accepted pattern length, in characters.
pub(crate) const MAX_PATTERN_LEN: usize = 8192;

pub use ast::{CharClass, ClassItem, Node, Pattern};
pub use fullmatch::FullMatcher;
pub use parser::parse;
pub use simplify::simplify;

/// Outcome of deriving a pattern by some input. `Rejected` is an ordinary
/// result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Derivation {
    Residual(Pattern),
    Rejected,
}

impl Derivation {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Derivation::Rejected)
    }

    pub fn residual(&self) -> Option<&Pattern> {
        match self {
            Derivation::Residual(p) => Some(p),
            Derivation::Rejected => None,
        }
    }

    /// Continue deriving by more input.
    pub fn derive(&self, text: &str) -> Derivation {
        match self {
            Derivation::Residual(p) => derive_str(p, text),
            Derivation::Rejected => Derivation::Rejected,
        }
    }

    /// Whether the input consumed so far is itself a complete match.
    pub fn is_accepting(&self) -> bool {
        self.residual().map(Pattern::accepts_empty).unwrap_or(false)
    }

    pub fn into_regex(self) -> Option<Regex> {
        match self {
            Derivation::Residual(p) => Some(Regex::from_ast(p)),
            Derivation::Rejected => None,
        }
    }
}

/// Derivative by one character, canonicalized.
pub fn derive(pattern: &Pattern, c: char) -> Derivation {
    match derive::derive_char(pattern, c) {
        Some(residual) => Derivation::Residual(simplify(&residual)),
        None => Derivation::Rejected,
    }
}

/// Folds [`derive`] over `text`, stopping at the first rejected character.
pub fn derive_str(pattern: &Pattern, text: &str) -> Derivation {
    let mut current = pattern.clone();
    for c in text.chars() {
        match derive(&current, c) {
            Derivation::Residual(next) => current = next,
            Derivation::Rejected => return Derivation::Rejected,
        }
    }
    Derivation::Residual(current)
}

/// A parsed pattern together with its source text.
#[derive(Debug, Clone)]
pub struct Regex {
    pattern: String,
    ast: Pattern,
    compiled: OnceLock<FullMatcher>,
}

impl Regex {
    /// Parses `pattern`, failing on anything outside the supported grammar.
    pub fn new(pattern: &str) -> Result<Self> {
        let ast = parse(pattern)?;
        Ok(Self {
            pattern: pattern.to_string(),
            ast,
            compiled: OnceLock::new(),
        })
    }

    pub fn from_ast(ast: Pattern) -> Self {
        Self {
            pattern: ast.to_string(),
            ast,
            compiled: OnceLock::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn ast(&self) -> &Pattern {
        &self.ast
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    pub fn derive(&self, text: &str) -> Derivation {
        derive_str(&self.ast, text)
    }

    /// Serialized canonical form.
    pub fn canonical(&self) -> String {
        simplify(&self.ast).to_string()
    }

    /// Syntactic equivalence with another pattern text.
    pub fn compare_pattern(&self, other: &str) -> Result<bool> {
        Ok(self.canonical() == Regex::new(other)?.canonical())
    }

    /// Anchored match of the whole of `text` against the pattern.
    pub fn fullmatch(&self, text: &str) -> Result<bool> {
        let matcher = match self.compiled.get() {
            Some(m) => m,
            None => {
                let m = FullMatcher::new(&self.ast)?;
                self.compiled.get_or_init(|| m)
            }
        };
        Ok(matcher.is_full_match(text))
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Regex {}

impl std::fmt::Display for Regex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}
