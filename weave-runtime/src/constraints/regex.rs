//! Pattern membership constraint on one variable.
//!
//! While the variable is still being generated the check is incremental: the
//! node keeps the derivative of its pattern by the text seen so far and steps
//! it by each new token. Once generation stops, the whole value is validated
//! with an anchored match instead.

use tracing::trace;

use weave_core::{Eval, NodeId, Result, Value, WeaveError};

use crate::pattern::Regex;
use crate::state::PatternState;

use super::node::EvalContext;

#[derive(Debug)]
pub struct RegexOp {
    variable: String,
    regex: Regex,
}

impl RegexOp {
    pub fn new(variable: String, regex: Regex) -> Self {
        Self { variable, regex }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Derivative state for `text`, extending `retained` when it covers a
    /// prefix of `text`.
    pub fn follow(&self, retained: Option<&PatternState>, text: &str) -> PatternState {
        let derivation = match retained {
            Some(st) if st.consumed <= text.len() && text.is_char_boundary(st.consumed) => {
                st.derivation.derive(&text[st.consumed..])
            }
            _ => self.regex.derive(text),
        };
        PatternState {
            consumed: text.len(),
            derivation,
        }
    }

    pub(super) fn forward(&self, id: NodeId, ctx: &EvalContext<'_>) -> Result<Eval> {
        let Some(var) = ctx.state().variable(&self.variable) else {
            return Ok(Eval::Pending);
        };

        if var.finished {
            return Ok(Eval::from(self.regex.fullmatch(&var.text)?));
        }

        let viable = match ctx.state().pattern_state(id) {
            Some(st) if st.consumed == var.text.len() => !st.derivation.is_rejected(),
            _ => !self.follow(None, &var.text).derivation.is_rejected(),
        };
        trace!(node = %id, pattern = self.regex.as_str(), text = %var.text, viable, "regex forward");
        Ok(Eval::from(viable))
    }

    pub(super) fn postprocess(&self, ctx: &EvalContext<'_>) -> Result<Value> {
        let text = ctx
            .state()
            .variable(&self.variable)
            .map(|v| v.text.as_str())
            .ok_or_else(|| WeaveError::Unresolved(format!("variable '{}'", self.variable)))?;

        if self.regex.fullmatch(text)? {
            Ok(Value::String(text.to_string()))
        } else {
            Err(WeaveError::ConstraintViolated(format!(
                "value {text:?} of '{}' does not match /{}/",
                self.variable, self.regex
            )))
        }
    }
}
