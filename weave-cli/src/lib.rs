//! Weave command-line support: the tokenizer layer shared by the `weave`
//! binary and its tests.

pub mod tokenizer;
