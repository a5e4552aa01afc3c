use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use weave_core::{
    BoxFuture, Captures, FinishReason, QueryFunction, QueryOutput, Result, TokenEvent, WeaveError,
};
use weave_runtime::{
    Argument, CallerScope, ConstraintGraph, Engine, EngineConfig, EngineEvent, InlineCallOp, Node,
    ProgramState, Regex,
};
use weave_scheduler::SubinterpreterScheduler;

#[derive(Debug)]
struct Verdict {
    answer: Option<bool>,
}

impl QueryFunction for Verdict {
    fn name(&self) -> &str {
        "verdict"
    }
    fn params(&self) -> &[String] {
        &[]
    }
    fn source(&self) -> &str {
        "argmax \"[RESULT]\" from \"judge\""
    }
    fn invoke(&self, _bindings: Captures) -> BoxFuture<'static, Result<QueryOutput>> {
        let answer = self.answer;
        Box::pin(async move {
            match answer {
                Some(v) => Ok(QueryOutput::single("RESULT", json!(v))),
                None => Err(WeaveError::Internal("judge offline".into())),
            }
        })
    }
}

fn token(stream_id: u64, token: u32, text: &str) -> TokenEvent {
    TokenEvent {
        stream_id,
        token,
        text: Some(text.to_string()),
        logprob: None,
        finish_reason: None,
    }
}

async fn feed(events: Vec<TokenEvent>) -> mpsc::Receiver<TokenEvent> {
    let (tx, rx) = mpsc::channel(events.len().max(1));
    for e in events {
        tx.send(e).await.unwrap();
    }
    rx
}

fn engine(root: weave_runtime::NodeRef, config: EngineConfig) -> (Engine, mpsc::Receiver<EngineEvent>) {
    let (event_tx, event_rx) = mpsc::channel(64);
    let scheduler = Arc::new(SubinterpreterScheduler::new(Default::default()));
    let engine = Engine::new(ConstraintGraph::new(root), "N", scheduler, config, event_tx);
    (engine, event_rx)
}

fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(e) = rx.try_recv() {
        out.push(e);
    }
    out
}

#[tokio::test]
async fn test_accepts_and_postprocesses_on_stop() {
    let (engine, mut events) = engine(Node::regex("N", Regex::new("[0-9]+").unwrap()), Default::default());
    let mut last = token(7, 3, "3");
    last.finish_reason = Some(FinishReason::EosToken);
    let tokens = feed(vec![token(7, 1, "1"), token(7, 2, "2"), last]).await;

    let outcome = engine.run(ProgramState::new("N: "), tokens).await.unwrap();
    assert_eq!(outcome.reason, FinishReason::EosToken);
    assert!(outcome.accepted);
    assert_eq!(outcome.values.unwrap()["N"], json!("123"));
    assert!(outcome.state.variable("N").unwrap().finished);

    let events = drain(&mut events);
    assert_eq!(events.len(), 4);
    assert!(matches!(
        events[3],
        EngineEvent::Finish { stream_id: 7, reason: FinishReason::EosToken }
    ));
}

#[tokio::test]
async fn test_stops_on_violation_and_drops_offending_token() {
    let (engine, mut events) = engine(Node::regex("N", Regex::new("[0-9]+").unwrap()), Default::default());
    let tokens = feed(vec![token(1, 1, "4"), token(1, 2, "x"), token(1, 3, "5")]).await;

    let outcome = engine.run(ProgramState::default(), tokens).await.unwrap();
    assert_eq!(outcome.reason, FinishReason::ConstraintViolated);
    assert_eq!(outcome.state.variable("N").unwrap().text, "4");
    assert!(outcome.accepted);

    let tokens: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::Token { .. }))
        .collect();
    assert_eq!(tokens.len(), 1);
}

#[tokio::test]
async fn test_max_tokens_leaves_prefix_unaccepted() {
    let config = EngineConfig {
        max_tokens: 2,
        ..Default::default()
    };
    let (engine, _events) = engine(Node::regex("N", Regex::new("[0-9]{4}").unwrap()), config);
    let tokens = feed(vec![token(1, 1, "1"), token(1, 2, "2"), token(1, 3, "3")]).await;

    let outcome = engine.run(ProgramState::default(), tokens).await.unwrap();
    assert_eq!(outcome.reason, FinishReason::MaxTokens);
    assert!(!outcome.accepted);
    assert!(outcome.values.is_none());
}

#[tokio::test]
async fn test_closed_stream_is_cancelled() {
    let (engine, _events) = engine(Node::regex("N", Regex::new("a*").unwrap()), Default::default());
    let tokens = feed(vec![token(1, 1, "a")]).await;

    let outcome = engine.run(ProgramState::default(), tokens).await.unwrap();
    assert_eq!(outcome.reason, FinishReason::Cancelled);
    assert!(outcome.accepted);
}

#[tokio::test]
async fn test_nested_query_resolved_between_tokens() {
    let call = InlineCallOp::new(
        Arc::new(Verdict { answer: Some(true) }),
        vec![Argument::Var("N".into())],
        &CallerScope::new(),
    )
    .unwrap();
    let root = Node::and(vec![
        Node::regex("N", Regex::new("[a-z]+").unwrap()),
        Node::inline_call(call),
    ]);
    let (engine, _events) = engine(root, Default::default());
    let mut last = token(2, 2, "k");
    last.finish_reason = Some(FinishReason::EosToken);
    let tokens = feed(vec![token(2, 1, "o"), last]).await;

    let outcome = engine.run(ProgramState::new("Q: "), tokens).await.unwrap();
    assert!(outcome.accepted);
    assert_eq!(outcome.state.results().len(), 1);
    // The pattern leaf is declared before the call and owns the variable.
    assert_eq!(outcome.values.unwrap()["N"], json!("ok"));
}

#[tokio::test]
async fn test_nested_query_rejection_stops_generation() {
    let call = InlineCallOp::new(
        Arc::new(Verdict { answer: Some(false) }),
        vec![Argument::Var("N".into())],
        &CallerScope::new(),
    )
    .unwrap();
    let (engine, _events) = engine(Node::inline_call(call), Default::default());
    let tokens = feed(vec![token(3, 1, "anything")]).await;

    let outcome = engine.run(ProgramState::new("Q: "), tokens).await.unwrap();
    assert_eq!(outcome.reason, FinishReason::ConstraintViolated);
    assert!(!outcome.accepted);
}

#[tokio::test]
async fn test_failed_nested_query_is_an_error() {
    let call = InlineCallOp::new(
        Arc::new(Verdict { answer: None }),
        vec![Argument::Var("N".into())],
        &CallerScope::new(),
    )
    .unwrap();
    let (engine, mut events) = engine(Node::inline_call(call), Default::default());
    let tokens = feed(vec![token(4, 1, "x")]).await;

    let err = engine.run(ProgramState::new("Q: "), tokens).await.unwrap_err();
    assert!(matches!(err, WeaveError::Scheduler(_)), "got {err:?}");
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::Error { .. })));
}

fn verdict_call(answer: Option<bool>) -> weave_runtime::NodeRef {
    let call = InlineCallOp::new(
        Arc::new(Verdict { answer }),
        vec![Argument::Var("N".into())],
        &CallerScope::new(),
    )
    .unwrap();
    Node::inline_call(call)
}

fn shared_engine(root: weave_runtime::NodeRef, scheduler: Arc<SubinterpreterScheduler>) -> Engine {
    let (event_tx, _event_rx) = mpsc::channel(64);
    Engine::new(ConstraintGraph::new(root), "N", scheduler, Default::default(), event_tx)
}

#[tokio::test]
async fn test_branches_sharing_a_scheduler_do_not_interfere() {
    let scheduler = Arc::new(SubinterpreterScheduler::new(Default::default()));
    let failing = shared_engine(verdict_call(None), scheduler.clone());
    let healthy = shared_engine(verdict_call(Some(true)), scheduler.clone());

    let err = failing
        .run(ProgramState::new("A: "), feed(vec![token(1, 1, "x")]).await)
        .await
        .unwrap_err();
    assert!(matches!(err, WeaveError::Scheduler(_)), "got {err:?}");

    let mut last = token(2, 1, "y");
    last.finish_reason = Some(FinishReason::EosToken);
    let outcome = healthy
        .run(ProgramState::new("B: "), feed(vec![last]).await)
        .await
        .unwrap();
    assert!(outcome.accepted);
    // Only this branch's own result was published.
    assert_eq!(outcome.state.results().len(), 1);
    assert_eq!(scheduler.len(), 2);
}

#[tokio::test]
async fn test_concurrent_branches_settle_independently() {
    let scheduler = Arc::new(SubinterpreterScheduler::new(Default::default()));
    let accepting = shared_engine(verdict_call(Some(true)), scheduler.clone());
    let rejecting = shared_engine(verdict_call(Some(false)), scheduler.clone());

    let (a, b) = tokio::join!(
        accepting.run(ProgramState::new("A: "), feed(vec![token(1, 1, "x")]).await),
        rejecting.run(ProgramState::new("B: "), feed(vec![token(2, 1, "x")]).await),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.accepted);
    assert_eq!(a.reason, FinishReason::Cancelled);
    assert!(!b.accepted);
    assert_eq!(b.reason, FinishReason::ConstraintViolated);
}

#[tokio::test]
async fn test_discard_forgets_the_branch_requests() {
    let scheduler = Arc::new(SubinterpreterScheduler::new(Default::default()));
    let kept = shared_engine(verdict_call(Some(true)), scheduler.clone());
    let abandoned = shared_engine(verdict_call(Some(true)), scheduler.clone());

    let tokens = feed(vec![token(1, 1, "x")]).await;
    kept.run(ProgramState::new("A: "), tokens).await.unwrap();
    let tokens = feed(vec![token(2, 1, "x")]).await;
    let outcome = abandoned.run(ProgramState::new("B: "), tokens).await.unwrap();
    assert_eq!(scheduler.len(), 2);

    assert_eq!(abandoned.discard(&outcome.state), 1);
    assert_eq!(scheduler.len(), 1);
    assert_eq!(abandoned.discard(&outcome.state), 0);
}
