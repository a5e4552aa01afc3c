//! One tokenizer surface over interchangeable backends, with `<weave:NAME/>`
//! markers mapped to ids outside the model vocabulary.

mod backend;
mod special;

use std::path::Path;

use tracing::debug;

use weave_core::Result;

pub use backend::{load_backend, BackendChoice, ByteLevelBackend, HfBackend, TokenizerBackend};
pub use special::SpecialTokenRegistry;

const MARKER_OPEN: &str = "<weave:";
const MARKER_CLOSE: &str = "/>";

pub struct UnifiedTokenizer {
    backend: Box<dyn TokenizerBackend>,
    registry: SpecialTokenRegistry,
    vocab_range: usize,
}

impl UnifiedTokenizer {
    pub fn new(backend: Box<dyn TokenizerBackend>) -> Result<Self> {
        let max_id = backend.max_token_id().map_or(0, |id| id as usize + 1);
        let vocab_range = max_id.max(backend.vocab_size());
        let registry = SpecialTokenRegistry::new(vocab_range)?;
        debug!(
            backend = backend.name(),
            vocab_range,
            special_base = registry.base(),
            "tokenizer ready"
        );
        Ok(Self {
            backend,
            registry,
            vocab_range,
        })
    }

    /// Loads from a `tokenizer.json`, or the byte-level backend without one.
    pub fn load(path: Option<&Path>) -> Result<(Self, BackendChoice)> {
        let (backend, choice) = load_backend(path);
        Ok((Self::new(backend)?, choice))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn vocab_range(&self) -> usize {
        self.vocab_range
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.backend.eos_token_id()
    }

    pub fn registry(&self) -> &SpecialTokenRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SpecialTokenRegistry {
        &mut self.registry
    }

    /// Encodes `text`, giving every `<weave:NAME/>` marker its special id.
    /// Text between markers goes through the backend.
    pub fn encode(&mut self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find(MARKER_OPEN) {
            let after_open = &rest[start + MARKER_OPEN.len()..];
            let Some(end) = after_open.find(MARKER_CLOSE) else {
                break;
            };
            let name = &after_open[..end];
            // "<weave:" must be followed by a plain name to count as a marker
            if name.is_empty() || name.contains('<') {
                let skip = start + MARKER_OPEN.len();
                ids.extend(self.backend.encode(&rest[..skip])?);
                rest = &rest[skip..];
                continue;
            }

            if start > 0 {
                ids.extend(self.backend.encode(&rest[..start])?);
            }
            ids.push(self.registry.id_for(&format!("weave:{name}"))?);
            rest = &after_open[end + MARKER_CLOSE.len()..];
        }

        if !rest.is_empty() {
            ids.extend(self.backend.encode(rest)?);
        }
        Ok(ids)
    }

    /// Decodes `ids`, writing registered special ids back as markers.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        let mut out = String::new();
        let mut run_start = 0;

        for (i, &id) in ids.iter().enumerate() {
            if let Some(name) = self.registry.name_of(id) {
                if run_start < i {
                    out.push_str(&self.backend.decode(&ids[run_start..i])?);
                }
                out.push('<');
                out.push_str(name);
                out.push_str(MARKER_CLOSE);
                run_start = i + 1;
            }
        }
        if run_start < ids.len() {
            out.push_str(&self.backend.decode(&ids[run_start..])?);
        }
        Ok(out)
    }
}

/// Turns a token-at-a-time stream into text chunks, holding back ids that
/// end in an incomplete UTF-8 sequence.
#[derive(Default)]
pub struct IncrementalDecoder {
    pending_ids: Vec<u32>,
    prev_text_len: usize,
}

impl IncrementalDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_token(&mut self, token_id: u32, tokenizer: &UnifiedTokenizer) -> Result<Option<String>> {
        self.pending_ids.push(token_id);
        let decoded = tokenizer.decode(&self.pending_ids)?;
        if decoded.ends_with('\u{FFFD}') {
            return Ok(None);
        }

        // Some backends rewrite earlier text once more tokens arrive.
        if decoded.len() < self.prev_text_len || !decoded.is_char_boundary(self.prev_text_len) {
            self.prev_text_len = 0;
        }
        let new_text = decoded[self.prev_text_len..].to_string();

        // Keep a short tail as context for multi-byte boundaries.
        if self.pending_ids.len() > 4 {
            let keep = self.pending_ids.len().saturating_sub(2);
            self.pending_ids.drain(..keep);
            self.prev_text_len = tokenizer.decode(&self.pending_ids)?.len();
        } else {
            self.prev_text_len = decoded.len();
        }

        Ok((!new_text.is_empty()).then_some(new_text))
    }

    /// Emits whatever is still held back and clears the decoder.
    pub fn flush(&mut self, tokenizer: &UnifiedTokenizer) -> Result<Option<String>> {
        if self.pending_ids.is_empty() {
            return Ok(None);
        }
        let decoded = tokenizer.decode(&self.pending_ids)?;
        let start = if decoded.len() < self.prev_text_len || !decoded.is_char_boundary(self.prev_text_len) {
            0
        } else {
            self.prev_text_len
        };
        let new_text = decoded[start..].to_string();
        self.pending_ids.clear();
        self.prev_text_len = 0;
        Ok((!new_text.is_empty()).then_some(new_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_level() -> UnifiedTokenizer {
        UnifiedTokenizer::new(Box::new(ByteLevelBackend)).unwrap()
    }

    #[test]
    fn test_markers_become_special_ids() {
        let mut tok = byte_level();
        assert_eq!(tok.vocab_range(), 256);
        let ids = tok.encode("a<weave:sep/>b<weave:end/>").unwrap();
        assert_eq!(ids, vec![97, 1000, 98, 1001]);
        assert_eq!(tok.decode(&ids).unwrap(), "a<weave:sep/>b<weave:end/>");
    }

    #[test]
    fn test_unterminated_marker_is_plain_text() {
        let mut tok = byte_level();
        let ids = tok.encode("x<weave:open").unwrap();
        assert_eq!(ids.len(), "x<weave:open".len());
        assert!(tok.registry().is_empty());
    }

    #[test]
    fn test_empty_marker_name_is_plain_text() {
        let mut tok = byte_level();
        let ids = tok.encode("<weave:/>").unwrap();
        assert_eq!(ids.len(), "<weave:/>".len());
        assert_eq!(tok.decode(&ids).unwrap(), "<weave:/>");
    }

    #[test]
    fn test_incremental_decoder_waits_for_full_char() {
        let tok = byte_level();
        let mut dec = IncrementalDecoder::new();
        let bytes = "é!".as_bytes();
        assert_eq!(dec.add_token(bytes[0] as u32, &tok).unwrap(), None);
        assert_eq!(dec.add_token(bytes[1] as u32, &tok).unwrap().as_deref(), Some("é"));
        assert_eq!(dec.add_token(bytes[2] as u32, &tok).unwrap().as_deref(), Some("!"));
        assert_eq!(dec.flush(&tok).unwrap(), None);
    }
}
