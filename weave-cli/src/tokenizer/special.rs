use std::collections::HashMap;

use weave_core::{Result, WeaveError};

/// Ids for special markers that are not part of the model vocabulary.
///
/// Ids start at the first power of ten with more digits than the vocabulary
/// range (`10^digits(vocab_range)`), so they never collide with real tokens,
/// and grow by one per new name. Allocation is stable until [`reset`].
///
/// [`reset`]: SpecialTokenRegistry::reset
#[derive(Debug, Clone)]
pub struct SpecialTokenRegistry {
    base: u32,
    by_name: HashMap<String, u32>,
    by_id: HashMap<u32, String>,
}

impl SpecialTokenRegistry {
    pub fn new(vocab_range: usize) -> Result<Self> {
        let digits = vocab_range.to_string().len() as u32;
        let base = 10u32.checked_pow(digits).ok_or_else(|| {
            WeaveError::Tokenizer(format!(
                "vocabulary range {vocab_range} leaves no room for special token ids"
            ))
        })?;
        Ok(Self {
            base,
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// The id of `name`, allocating the next free one on first use.
    pub fn id_for(&mut self, name: &str) -> Result<u32> {
        if let Some(&id) = self.by_name.get(name) {
            return Ok(id);
        }
        let id = self
            .base
            .checked_add(self.by_name.len() as u32)
            .ok_or_else(|| WeaveError::Tokenizer("special token ids exhausted".into()))?;
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, name.to_string());
        Ok(id)
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn is_special(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Forgets every allocation; the next name gets `base` again.
    pub fn reset(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
    }
}
