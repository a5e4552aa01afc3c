//! Engine: drives one constrained variable through a token stream,
//! evaluating the constraint graph after every token and resolving nested
//! queries whenever the verdict is pending.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use weave_core::{
    Eval, FinishReason, Resolution, Result, Runtime, Scheduler, TokenEvent, Value, WeaveError,
};

use crate::constraints::ConstraintGraph;
use crate::state::ProgramState;

/// Events emitted by the engine to consumers (CLI, transport).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Token {
        stream_id: u64,
        token: u32,
        text: String,
    },
    Finish {
        stream_id: u64,
        reason: FinishReason,
    },
    Error {
        stream_id: u64,
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_tokens: usize,
    /// Scheduler rounds allowed to settle one pending verdict.
    pub max_resolve_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            max_resolve_rounds: 8,
        }
    }
}

/// Result of one [`Engine::run`].
#[derive(Debug, Clone)]
pub struct Outcome {
    pub state: ProgramState,
    pub reason: FinishReason,
    /// Whether the finished variable satisfies the constraint.
    pub accepted: bool,
    /// Postprocessed values, present only when `accepted`.
    pub values: Option<BTreeMap<String, Value>>,
}

pub struct Engine {
    graph: ConstraintGraph,
    variable: String,
    scheduler: Arc<dyn Scheduler>,
    config: EngineConfig,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(
        graph: ConstraintGraph,
        variable: impl Into<String>,
        scheduler: Arc<dyn Scheduler>,
        config: EngineConfig,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            graph,
            variable: variable.into(),
            scheduler,
            config,
            event_tx,
        }
    }

    pub fn graph(&self) -> &ConstraintGraph {
        &self.graph
    }

    /// Drops the scheduler's requests for the nested queries this graph
    /// issued under `state`. Call it when the branch is abandoned.
    pub fn discard(&self, state: &ProgramState) -> usize {
        let keys = self.graph.subinterpreter_keys(state);
        self.scheduler.forget(&keys)
    }

    fn runtime(&self) -> &dyn Runtime {
        self.scheduler.as_ref()
    }

    /// Consumes `tokens` until the stream finishes, the constraint is
    /// violated, `max_tokens` is reached, or the sender side is dropped.
    pub async fn run(
        &self,
        state: ProgramState,
        tokens: mpsc::Receiver<TokenEvent>,
    ) -> Result<Outcome> {
        let mut stream_id = 0;
        match self.drive(state, tokens, &mut stream_id).await {
            Ok(outcome) => {
                let _ = self
                    .event_tx
                    .send(EngineEvent::Finish {
                        stream_id,
                        reason: outcome.reason,
                    })
                    .await;
                Ok(outcome)
            }
            Err(e) => {
                error!(stream_id, variable = %self.variable, error = %e, "generation failed");
                let _ = self
                    .event_tx
                    .send(EngineEvent::Error {
                        stream_id,
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        state: ProgramState,
        mut tokens: mpsc::Receiver<TokenEvent>,
        stream_id: &mut u64,
    ) -> Result<Outcome> {
        let mut state = state.begin_variable(&self.variable);
        let verdict = self.graph.forward(&state, self.runtime())?;
        let (verdict, settled) = self.settle(verdict, state).await?;
        state = settled;

        let mut generated = 0usize;
        let reason = if verdict.as_bool() == Some(false) {
            FinishReason::ConstraintViolated
        } else {
            loop {
                if generated >= self.config.max_tokens {
                    break FinishReason::MaxTokens;
                }
                let Some(event) = tokens.recv().await else {
                    warn!(variable = %self.variable, "token stream closed before finishing");
                    break FinishReason::Cancelled;
                };
                *stream_id = event.stream_id;

                let text = event.text.as_deref().unwrap_or_default();
                if !text.is_empty() {
                    let (verdict, next) =
                        self.graph
                            .follow(&state, &self.variable, text, self.runtime())?;
                    let (verdict, next) = self.settle(verdict, next).await?;

                    if verdict.as_bool() == Some(false) {
                        debug!(token = event.token, text, "token violates constraint");
                        break FinishReason::ConstraintViolated;
                    }
                    state = next;
                    generated += 1;
                    let _ = self
                        .event_tx
                        .send(EngineEvent::Token {
                            stream_id: event.stream_id,
                            token: event.token,
                            text: text.to_string(),
                        })
                        .await;
                }

                if let Some(reason) = event.finish_reason {
                    break reason;
                }
            }
        };

        self.finish(state, reason).await
    }

    /// Marks the variable finished, re-checks the whole value and
    /// postprocesses when it is accepted.
    async fn finish(&self, state: ProgramState, reason: FinishReason) -> Result<Outcome> {
        let state = state.finish_variable(&self.variable);
        let verdict = self.graph.forward(&state, self.runtime())?;
        let (verdict, state) = self.settle(verdict, state).await?;
        let accepted = verdict.as_bool().unwrap_or(false);

        let values = if accepted {
            Some(
                self.graph
                    .postprocess(&state, self.runtime(), &[self.variable.as_str()])?,
            )
        } else {
            None
        };

        info!(variable = %self.variable, ?reason, accepted, "generation finished");
        Ok(Outcome {
            state,
            reason,
            accepted,
            values,
        })
    }

    /// Runs nested queries until `verdict` is no longer pending, publishing
    /// each ready result into the returned snapshot.
    async fn settle(&self, mut verdict: Eval, mut state: ProgramState) -> Result<(Eval, ProgramState)> {
        let mut rounds = 0;
        while verdict.is_pending() {
            if rounds == self.config.max_resolve_rounds {
                return Err(WeaveError::Unresolved(format!(
                    "constraint on '{}' still pending after {rounds} resolve rounds",
                    self.variable
                )));
            }
            rounds += 1;

            let completed = self.scheduler.run_pending().await?;
            let mut published = 0;
            let mut outstanding = 0;
            for key in self.graph.subinterpreter_keys(&state) {
                if state.results().contains(&key) {
                    continue;
                }
                match self.scheduler.resolution(&key) {
                    Some(Resolution::Ready(value)) => {
                        state = state.with_result(key, value)?;
                        published += 1;
                    }
                    Some(Resolution::Failed(reason)) => {
                        return Err(WeaveError::Scheduler(format!(
                            "nested query {key} failed: {reason}"
                        )));
                    }
                    None => outstanding += 1,
                }
            }
            debug!(round = rounds, completed, published, outstanding, "resolved nested queries");

            if published == 0 {
                if outstanding == 0 {
                    return Err(WeaveError::Unresolved(format!(
                        "constraint on '{}' is pending but no nested query is outstanding",
                        self.variable
                    )));
                }
                // Another caller is running the outstanding requests.
                tokio::task::yield_now().await;
            }
            verdict = self.graph.forward(&state, self.runtime())?;
        }
        Ok((verdict, state))
    }
}
