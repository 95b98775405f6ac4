//! OpenAI-compatible chat completions for the LLM-backed plugins.

pub mod client;
pub mod types;

pub use client::LlmClient;
pub use types::*;
