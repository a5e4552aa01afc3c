//! Tests for constraint graphs: pattern leaves, inline calls, and
//! postprocessing, evaluated against a real scheduler.

use std::sync::Arc;

use serde_json::json;
use weave_core::{
    BoxFuture, Captures, Eval, FunctionContext, QueryFunction, QueryOutput, Result, Scheduler,
    Scope, WeaveError,
};
use weave_runtime::constraints::{walk, Op};
use weave_runtime::{
    Argument, CallerScope, ConstraintGraph, InlineCallOp, Node, ProgramState, Regex,
};
use weave_scheduler::SubinterpreterScheduler;

/// Answers `true` when the checked value has `min_len` characters or more.
#[derive(Debug)]
struct LengthCheck {
    params: Vec<String>,
    context: FunctionContext,
}

impl LengthCheck {
    fn new() -> Arc<dyn QueryFunction> {
        Arc::new(Self {
            params: vec!["min_len".into(), "value".into()],
            context: FunctionContext {
                argnames: vec!["min_len".into()],
                scope: Scope::new(),
            },
        })
    }
}

impl QueryFunction for LengthCheck {
    fn name(&self) -> &str {
        "long_enough"
    }
    fn params(&self) -> &[String] {
        &self.params
    }
    fn function_context(&self) -> Option<&FunctionContext> {
        Some(&self.context)
    }
    fn source(&self) -> &str {
        "argmax \"{value}\" from \"judge\" where len(value) >= min_len"
    }
    fn invoke(&self, bindings: Captures) -> BoxFuture<'static, Result<QueryOutput>> {
        Box::pin(async move {
            let min = bindings["min_len"].as_u64().unwrap_or(0) as usize;
            let value = bindings["value"].as_str().unwrap_or_default().chars().count();
            Ok(QueryOutput::single("RESULT", json!(value >= min)))
        })
    }
}

fn inline_call(variable: &str, caller: &CallerScope) -> Result<InlineCallOp> {
    InlineCallOp::new(
        LengthCheck::new(),
        vec![Argument::Var(variable.into()), Argument::Value(json!(3))],
        caller,
    )
}

// ===== Pattern leaves =====

#[test]
fn test_pattern_leaf_tracks_prefixes() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let graph = ConstraintGraph::new(Node::regex("DATE", Regex::new("[0-9]{4}-[0-9]{2}").unwrap()));

    let state = ProgramState::new("Date: ").begin_variable("DATE");
    let (verdict, state) = graph.follow(&state, "DATE", "19", &scheduler).unwrap();
    assert_eq!(verdict, Eval::from(true));
    let (verdict, state) = graph.follow(&state, "DATE", "93-", &scheduler).unwrap();
    assert_eq!(verdict, Eval::from(true));

    let (verdict, _) = graph.follow(&state, "DATE", "x", &scheduler).unwrap();
    assert_eq!(verdict, Eval::from(false));
}

#[test]
fn test_pattern_leaf_checks_full_match_when_finished() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let graph = ConstraintGraph::new(Node::regex("N", Regex::new("[0-9]{2}").unwrap()));

    let partial = ProgramState::default().with_token("N", "1");
    assert_eq!(graph.forward(&partial, &scheduler).unwrap(), Eval::from(true));
    assert_eq!(
        graph.forward(&partial.finish_variable("N"), &scheduler).unwrap(),
        Eval::from(false)
    );

    let complete = partial.with_token("N", "2").finish_variable("N");
    assert_eq!(graph.forward(&complete, &scheduler).unwrap(), Eval::from(true));
}

#[test]
fn test_literal_brace_pattern_checks_finished_value() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let graph = ConstraintGraph::new(Node::regex("X", Regex::new("a{").unwrap()));

    let state = ProgramState::default().begin_variable("X");
    let (verdict, state) = graph.follow(&state, "X", "a{", &scheduler).unwrap();
    assert_eq!(verdict, Eval::from(true));
    assert_eq!(
        graph.forward(&state.finish_variable("X"), &scheduler).unwrap(),
        Eval::from(true)
    );
}

#[test]
fn test_retained_state_matches_fresh_derivation() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let root = Node::regex("X", Regex::new("(ab|cd)+e").unwrap());
    let graph = ConstraintGraph::new(root.clone());

    let mut state = ProgramState::default().begin_variable("X");
    for token in ["a", "bc", "d"] {
        state = graph.follow(&state, "X", token, &scheduler).unwrap().1;
    }
    let retained = state.pattern_state(root.id()).unwrap();
    assert_eq!(retained.consumed, 4);
    assert_eq!(retained.derivation, Regex::new("(ab|cd)+e").unwrap().derive("abcd"));
}

#[test]
fn test_follow_leaves_previous_snapshot_untouched() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let graph = ConstraintGraph::new(Node::regex("X", Regex::new("a+").unwrap()));

    let base = ProgramState::default().begin_variable("X");
    let (_, a) = graph.follow(&base, "X", "a", &scheduler).unwrap();
    let (rejected, _) = graph.follow(&base, "X", "b", &scheduler).unwrap();

    assert_eq!(rejected, Eval::from(false));
    assert_eq!(a.variable("X").unwrap().text, "a");
    assert_eq!(base.variable("X").unwrap().text, "");
}

// ===== Inline calls =====

#[test]
fn test_unresolvable_parameter_is_binding_error() {
    let err = inline_call("ANSWER", &CallerScope::new()).unwrap_err();
    assert!(matches!(err, WeaveError::Binding(_)), "got {err:?}");
}

#[tokio::test]
async fn test_inline_call_pending_until_published() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let caller = CallerScope::new().with_local("value", json!("abcd"));
    let root = Node::inline_call(inline_call("ANSWER", &caller).unwrap());
    let graph = ConstraintGraph::new(root);

    let state = ProgramState::new("Q: ").begin_variable("ANSWER");
    assert_eq!(graph.forward(&state, &scheduler).unwrap(), Eval::Pending);
    // Evaluating again does not register a second request.
    assert_eq!(graph.forward(&state, &scheduler).unwrap(), Eval::Pending);
    assert_eq!(scheduler.len(), 1);

    scheduler.run_pending().await.unwrap();
    // Still pending: the result has not been published into this snapshot.
    assert_eq!(graph.forward(&state, &scheduler).unwrap(), Eval::Pending);

    let (key, resolution) = scheduler.resolutions().remove(0);
    let value = match resolution {
        weave_core::Resolution::Ready(v) => v,
        other => panic!("unexpected resolution {other:?}"),
    };
    let state = state.with_result(key, value).unwrap();
    assert_eq!(graph.forward(&state, &scheduler).unwrap(), Eval::Value(json!(true)));
}

#[test]
fn test_pending_call_keeps_conjunction_pending() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let caller = CallerScope::new().with_global("value", json!("ab"));
    let call = Node::inline_call(inline_call("ANSWER", &caller).unwrap());
    let root = Node::and(vec![Node::constant(json!(false)), call]);

    let state = ProgramState::new("Q: ").begin_variable("ANSWER");
    let graph = ConstraintGraph::new(root);
    assert_eq!(graph.forward(&state, &scheduler).unwrap(), Eval::Pending);
    // No short circuit: the call was registered despite the false operand.
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn test_collect_only_through_boolean_links() {
    let caller = CallerScope::new().with_local("value", json!("x"));
    let a = Node::inline_call(inline_call("A", &caller).unwrap());
    let b = Node::inline_call(inline_call("B", &caller).unwrap());
    let root = Node::or(vec![
        Node::not(b.clone()),
        a.clone(),
        Node::regex("C", Regex::new("c+").unwrap()),
        b.clone(),
    ]);

    let graph = ConstraintGraph::new(root);
    let ids: Vec<_> = graph.inline_calls().iter().map(|n| n.id()).collect();
    assert_eq!(ids, vec![b.id(), a.id()]);
}

// ===== Postprocessing =====

#[test]
fn test_postprocess_without_owner_keeps_text() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let graph = ConstraintGraph::new(Node::not(Node::var("X")));
    let state = ProgramState::default().with_variable("X", "raw", true);

    let values = graph.postprocess(&state, &scheduler, &["X", "MISSING"]).unwrap();
    assert_eq!(values.get("X"), Some(&json!("raw")));
    assert!(!values.contains_key("MISSING"));
}

#[test]
fn test_postprocess_pattern_owner_validates() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let graph = ConstraintGraph::new(Node::regex("N", Regex::new("[0-9]+").unwrap()));

    let ok = ProgramState::default().with_variable("N", "42", true);
    assert_eq!(graph.postprocess(&ok, &scheduler, &["N"]).unwrap()["N"], json!("42"));

    let bad = ProgramState::default().with_variable("N", "4x", true);
    let err = graph.postprocess(&bad, &scheduler, &["N"]).unwrap_err();
    assert!(matches!(err, WeaveError::ConstraintViolated(_)));
}

#[test]
fn test_postprocess_tie_keeps_declaration_order() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let caller = CallerScope::new().with_local("value", json!("x"));
    let call = Node::inline_call(inline_call("X", &caller).unwrap());
    let pattern = Node::regex("X", Regex::new("[a-z]+").unwrap());
    let graph = ConstraintGraph::new(Node::and(vec![pattern.clone(), call]));

    let owners: Vec<_> = walk(graph.root())
        .into_iter()
        .filter(|n| n.postprocess_var("X"))
        .collect();
    assert_eq!(owners.len(), 2);
    assert!(matches!(owners[0].op(), Op::Regex(_)));
    assert_eq!(owners[0].postprocess_order(&owners[1]), None);
    assert_eq!(owners[1].postprocess_order(&owners[0]), None);

    // The pattern leaf is declared first, so it decides the value.
    let state = ProgramState::new("Q: ").with_variable("X", "abc", true);
    assert_eq!(graph.postprocess(&state, &scheduler, &["X"]).unwrap()["X"], json!("abc"));
}

#[test]
fn test_postprocess_unresolved_call() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let caller = CallerScope::new().with_local("value", json!("x"));
    let graph = ConstraintGraph::new(Node::inline_call(inline_call("X", &caller).unwrap()));
    let state = ProgramState::new("Q: ").with_variable("X", "abc", true);

    let err = graph.postprocess(&state, &scheduler, &["X"]).unwrap_err();
    assert!(matches!(err, WeaveError::Unresolved(_)));
}

#[test]
fn test_subinterpreter_keys_match_registered_calls() {
    let scheduler = SubinterpreterScheduler::new(Default::default());
    let caller = CallerScope::new().with_local("value", json!("ab"));
    let first = Node::inline_call(inline_call("ANSWER", &caller).unwrap());
    let second = Node::inline_call(inline_call("ANSWER", &caller).unwrap());
    let graph = ConstraintGraph::new(Node::or(vec![first, second]));
    let state = ProgramState::new("Q: ").begin_variable("ANSWER");

    let keys = graph.subinterpreter_keys(&state);
    assert_eq!(keys.len(), 2);
    // Deriving keys registers nothing.
    assert!(scheduler.is_empty());

    graph.forward(&state, &scheduler).unwrap();
    let registered: Vec<_> = keys.iter().filter_map(|k| scheduler.state(k)).collect();
    assert_eq!(registered.len(), 2);
    assert_ne!(keys, graph.subinterpreter_keys(&ProgramState::new("other prompt")));
}
