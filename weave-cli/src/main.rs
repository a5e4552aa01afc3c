//! `weave`: inspect pattern derivatives and run constrained decoding over
//! a fixed token stream.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use weave_cache::ResultCache;
use weave_cli::tokenizer::{IncrementalDecoder, UnifiedTokenizer};
use weave_core::{FinishReason, TokenEvent};
use weave_runtime::{
    ConstraintGraph, Derivation, Engine, EngineConfig, EngineEvent, Node, ProgramState, Regex,
};
use weave_scheduler::{SchedulerConfig, SubinterpreterScheduler};

/// Variable every `check` run constrains.
const VARIABLE: &str = "VALUE";

#[derive(Parser)]
#[command(name = "weave", about = "Incremental constraint evaluation for guided generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the residual of PATTERN after consuming TEXT
    Derive { pattern: String, text: String },

    /// Feed TEXT token by token through a pattern constraint
    Check {
        pattern: String,
        text: String,

        /// Path to a Hugging Face tokenizer.json (byte-level when omitted)
        #[arg(long)]
        tokenizer: Option<PathBuf>,

        /// Maximum tokens accepted before stopping
        #[arg(long, default_value = "256")]
        max_tokens: usize,

        /// Persist nested query results to this file
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Maximum nested queries running at once
        #[arg(long, default_value = "8")]
        max_concurrent: usize,
    },

    /// Print the token ids of TEXT
    Tokenize {
        text: String,

        #[arg(long)]
        tokenizer: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Derive { pattern, text } => derive(&pattern, &text),
        Command::Check {
            pattern,
            text,
            tokenizer,
            max_tokens,
            cache,
            max_concurrent,
        } => {
            let scheduler = SubinterpreterScheduler::new(SchedulerConfig { max_concurrent });
            let scheduler = match cache {
                Some(path) => scheduler.with_cache(Arc::new(ResultCache::open(path))),
                None => scheduler,
            };
            check(&pattern, &text, tokenizer, max_tokens, Arc::new(scheduler)).await
        }
        Command::Tokenize { text, tokenizer } => {
            let (mut tok, choice) = UnifiedTokenizer::load(tokenizer.as_deref())?;
            info!(backend = %choice, "tokenizer selected");
            let ids = tok.encode(&text)?;
            println!("{}", serde_json::to_string(&ids)?);
            Ok(())
        }
    }
}

fn derive(pattern: &str, text: &str) -> anyhow::Result<()> {
    let regex = Regex::new(pattern)?;
    match regex.derive(text) {
        Derivation::Residual(residual) => {
            let accepting = Derivation::Residual(residual.clone()).is_accepting();
            println!("residual:  {residual}");
            println!("accepting: {accepting}");
        }
        Derivation::Rejected => println!("rejected"),
    }
    Ok(())
}

async fn check(
    pattern: &str,
    text: &str,
    tokenizer: Option<PathBuf>,
    max_tokens: usize,
    scheduler: Arc<SubinterpreterScheduler>,
) -> anyhow::Result<()> {
    let (mut tok, choice) = UnifiedTokenizer::load(tokenizer.as_deref())?;
    info!(backend = %choice, "tokenizer selected");

    let events = token_events(&mut tok, text)?;
    debug!(count = events.len(), "tokenized input");

    let graph = ConstraintGraph::new(Node::regex(VARIABLE, Regex::new(pattern)?));
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let engine = Engine::new(
        graph,
        VARIABLE,
        scheduler,
        EngineConfig {
            max_tokens,
            ..Default::default()
        },
        event_tx,
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                EngineEvent::Token { token, text, .. } => println!("token {token:>6} {text:?}"),
                EngineEvent::Finish { reason, .. } => println!("finish    {reason:?}"),
                EngineEvent::Error { error, .. } => println!("error     {error}"),
            }
        }
    });

    let (token_tx, token_rx) = mpsc::channel(events.len().max(1));
    for event in events {
        if token_tx.send(event).await.is_err() {
            break;
        }
    }
    drop(token_tx);

    let outcome = engine.run(ProgramState::new(""), token_rx).await;
    drop(engine);
    printer.await?;
    let outcome = outcome?;

    println!("accepted  {}", outcome.accepted);
    if let Some(values) = outcome.values {
        println!("values    {}", serde_json::to_string(&values)?);
    }
    Ok(())
}

/// Tokenizes `text` into the events a streaming server would send for it.
fn token_events(tok: &mut UnifiedTokenizer, text: &str) -> anyhow::Result<Vec<TokenEvent>> {
    let ids = tok.encode(text)?;
    let mut decoder = IncrementalDecoder::new();
    let mut events = Vec::with_capacity(ids.len());

    for &id in &ids {
        events.push(TokenEvent {
            stream_id: 1,
            token: id,
            text: decoder.add_token(id, tok)?,
            logprob: None,
            finish_reason: None,
        });
    }
    if let Some(last) = events.last_mut() {
        if let Some(rest) = decoder.flush(tok)? {
            last.text.get_or_insert_with(String::new).push_str(&rest);
        }
        last.finish_reason = Some(FinishReason::EosToken);
    }
    Ok(events)
}
