//! Weave transport: token streaming client that multiplexes concurrent
//! generation and scoring streams over one text connection.

pub mod client;
pub mod frame;

pub use client::{StreamClient, STREAM_CAPACITY};
pub use frame::Prompt;
