//! Text frames exchanged with a token streaming server.
//!
//! Every frame is `COMMAND <json>`. Requests are `GENERATE` and `SCORE`
//! objects; the server answers with `TOKEN` arrays whose entries carry the
//! `stream_id` of the request they belong to.

use serde::{Deserialize, Serialize};

use weave_core::{GenerationParams, Result, TokenEvent, WeaveError};

pub const GENERATE: &str = "GENERATE";
pub const SCORE: &str = "SCORE";
pub const TOKEN: &str = "TOKEN";

/// A prompt as text or as already tokenized ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Tokens(Vec<u32>),
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<Vec<u32>> for Prompt {
    fn from(ids: Vec<u32>) -> Self {
        Prompt::Tokens(ids)
    }
}

#[derive(Debug, Serialize)]
struct GeneratePayload<'a> {
    model: &'a str,
    prompt: &'a Prompt,
    stream_id: u64,
    #[serde(flatten)]
    params: &'a GenerationParams,
}

#[derive(Debug, Serialize)]
struct ScorePayload<'a> {
    model: &'a str,
    prompt: &'a Prompt,
    scored: &'a Prompt,
    stream_id: u64,
    #[serde(flatten)]
    params: &'a GenerationParams,
}

pub fn encode_generate(
    model: &str,
    stream_id: u64,
    prompt: &Prompt,
    params: &GenerationParams,
) -> Result<String> {
    let payload = GeneratePayload {
        model,
        prompt,
        stream_id,
        params,
    };
    Ok(format!("{GENERATE} {}", serde_json::to_string(&payload)?))
}

pub fn encode_score(
    model: &str,
    stream_id: u64,
    prompt: &Prompt,
    scored: &Prompt,
    params: &GenerationParams,
) -> Result<String> {
    let payload = ScorePayload {
        model,
        prompt,
        scored,
        stream_id,
        params,
    };
    Ok(format!("{SCORE} {}", serde_json::to_string(&payload)?))
}

/// Splits a frame into its command and payload.
pub fn split(frame: &str) -> Result<(&str, &str)> {
    frame
        .split_once(' ')
        .ok_or_else(|| WeaveError::Transport(format!("frame without payload: {frame:?}")))
}

pub fn decode_tokens(payload: &str) -> Result<Vec<TokenEvent>> {
    Ok(serde_json::from_str(payload)?)
}

pub fn encode_tokens(events: &[TokenEvent]) -> Result<String> {
    Ok(format!("{TOKEN} {}", serde_json::to_string(events)?))
}
