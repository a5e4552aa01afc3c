use std::fmt;
use std::path::Path;

use tokenizers::Tokenizer as HfTokenizer;
use tracing::{info, warn};

use weave_core::{Result, WeaveError};

/// A concrete tokenizer implementation.
pub trait TokenizerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Number of entries the backend reports for its vocabulary.
    fn vocab_size(&self) -> usize;

    /// Highest id assigned to any vocabulary entry.
    fn max_token_id(&self) -> Option<u32>;

    fn eos_token_id(&self) -> Option<u32>;
}

pub struct HfBackend {
    inner: HfTokenizer,
    eos_token_id: Option<u32>,
}

impl HfBackend {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner =
            HfTokenizer::from_file(path).map_err(|e| WeaveError::Tokenizer(e.to_string()))?;

        // tokenizer_config.json next to the tokenizer is the most reliable source.
        let config_eos = path.parent().and_then(|dir| {
            let text = std::fs::read_to_string(dir.join("tokenizer_config.json")).ok()?;
            let value: serde_json::Value = serde_json::from_str(&text).ok()?;
            if let Some(id) = value.get("eos_token_id").and_then(|v| v.as_u64()) {
                return u32::try_from(id).ok();
            }
            // eos_token can be a string or {"content": "..."}
            let eos = value.get("eos_token").and_then(|v| {
                v.as_str()
                    .or_else(|| v.get("content").and_then(|c| c.as_str()))
                    .map(String::from)
            })?;
            inner.token_to_id(&eos)
        });

        let eos_token_id = config_eos.or_else(|| {
            ["</s>", "<|endoftext|>", "<|im_end|>", "<|eot_id|>"]
                .iter()
                .find_map(|t| inner.token_to_id(t))
        });

        Ok(Self {
            inner,
            eos_token_id,
        })
    }

    pub fn from_inner(inner: HfTokenizer, eos_token_id: Option<u32>) -> Self {
        Self {
            inner,
            eos_token_id,
        }
    }
}

impl TokenizerBackend for HfBackend {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| WeaveError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| WeaveError::Tokenizer(e.to_string()))
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn max_token_id(&self) -> Option<u32> {
        self.inner.get_vocab(true).values().copied().max()
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
}

/// One token per byte. Always available.
#[derive(Debug, Default)]
pub struct ByteLevelBackend;

impl TokenizerBackend for ByteLevelBackend {
    fn name(&self) -> &'static str {
        "byte-level"
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let bytes = ids
            .iter()
            .map(|&id| {
                u8::try_from(id).map_err(|_| {
                    WeaveError::Tokenizer(format!("id {id} is not a byte-level token"))
                })
            })
            .collect::<Result<Vec<u8>>>()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn vocab_size(&self) -> usize {
        256
    }

    fn max_token_id(&self) -> Option<u32> {
        Some(255)
    }

    fn eos_token_id(&self) -> Option<u32> {
        None
    }
}

/// Which backend was loaded, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    HuggingFace,
    /// No usable tokenizer file; `reason` says what went wrong.
    ByteLevel { reason: String },
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendChoice::HuggingFace => f.write_str("huggingface"),
            BackendChoice::ByteLevel { reason } => write!(f, "byte-level ({reason})"),
        }
    }
}

/// Loads the Hugging Face tokenizer at `path`, falling back to the
/// byte-level backend when there is none or it cannot be read.
pub fn load_backend(path: Option<&Path>) -> (Box<dyn TokenizerBackend>, BackendChoice) {
    let Some(path) = path else {
        let reason = "no tokenizer file given".to_string();
        info!(%reason, "using byte-level tokenizer");
        return (Box::new(ByteLevelBackend), BackendChoice::ByteLevel { reason });
    };

    match HfBackend::from_file(path) {
        Ok(backend) => {
            info!(path = %path.display(), eos = ?backend.eos_token_id(), "loaded tokenizer");
            (Box::new(backend), BackendChoice::HuggingFace)
        }
        Err(e) => {
            let reason = format!("{}: {e}", path.display());
            warn!(%reason, "tokenizer unavailable, falling back to byte-level");
            (Box::new(ByteLevelBackend), BackendChoice::ByteLevel { reason })
        }
    }
}
