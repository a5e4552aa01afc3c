//! Per-branch program state: the evaluation context of the constraint graph.
//!
//! A `ProgramState` is an immutable snapshot. Every update returns a new
//! snapshot, so decoding branches that diverge from a common state never
//! observe each other's tokens or nested-query results.

use std::collections::{BTreeMap, HashMap};

use weave_core::{NodeId, Result, SubinterpreterKey, SubinterpreterResults, Value};

use crate::pattern::Derivation;

/// Generated text of one template variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variable {
    pub text: String,
    /// Set once generation of the variable has stopped.
    pub finished: bool,
}

/// Derivative state retained by a pattern leaf between tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternState {
    /// Byte length of the variable text already consumed.
    pub consumed: usize,
    pub derivation: Derivation,
}

#[derive(Debug, Clone, Default)]
pub struct ProgramState {
    prompt: String,
    variables: BTreeMap<String, Variable>,
    results: SubinterpreterResults,
    pattern_states: HashMap<NodeId, PatternState>,
}

impl ProgramState {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// The prompt preceding the variable being generated.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn results(&self) -> &SubinterpreterResults {
        &self.results
    }

    pub fn pattern_state(&self, node: NodeId) -> Option<&PatternState> {
        self.pattern_states.get(&node)
    }

    /// Starts `name` with empty text; an already started variable is kept.
    pub fn begin_variable(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.variables.entry(name.to_string()).or_default();
        next
    }

    /// Sets a variable outright, e.g. one decoded before this state.
    pub fn with_variable(&self, name: &str, text: impl Into<String>, finished: bool) -> Self {
        let mut next = self.clone();
        next.variables.insert(
            name.to_string(),
            Variable {
                text: text.into(),
                finished,
            },
        );
        next
    }

    /// Appends one token's text to `name`.
    pub fn with_token(&self, name: &str, token_text: &str) -> Self {
        let mut next = self.clone();
        next.variables
            .entry(name.to_string())
            .or_default()
            .text
            .push_str(token_text);
        next
    }

    pub fn finish_variable(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.variables.entry(name.to_string()).or_default().finished = true;
        next
    }

    /// Publishes a nested-query result into a new snapshot.
    pub fn with_result(&self, key: SubinterpreterKey, value: Value) -> Result<Self> {
        let mut next = self.clone();
        next.results.publish(key, value)?;
        Ok(next)
    }

    pub(crate) fn set_pattern_state(&mut self, node: NodeId, state: PatternState) {
        self.pattern_states.insert(node, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_updates_do_not_touch_the_original() {
        let base = ProgramState::new("Q: ").begin_variable("ANSWER");
        let a = base.with_token("ANSWER", "yes");
        let b = base.with_token("ANSWER", "no");

        assert_eq!(base.variable("ANSWER").unwrap().text, "");
        assert_eq!(a.variable("ANSWER").unwrap().text, "yes");
        assert_eq!(b.variable("ANSWER").unwrap().text, "no");
        assert_eq!(a.prompt(), "Q: ");
    }

    #[test]
    fn test_finish_and_publish() {
        let key = SubinterpreterKey::new(NodeId::next(), "Q: ");
        let state = ProgramState::new("Q: ")
            .with_token("X", "1")
            .finish_variable("X")
            .with_result(key, json!(true))
            .unwrap();

        assert!(state.variable("X").unwrap().finished);
        assert_eq!(state.results().get(&key), Some(&json!(true)));
        assert!(state.with_result(key, json!(false)).is_err());
    }
}
