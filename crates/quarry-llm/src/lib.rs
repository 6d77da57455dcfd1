//! OpenAI-compatible LLM client used by Quarry for SQL generation, LLM-backed
//! checks, explanations and embeddings.
//!
//! Provides the `ProviderAdapter` trait, the OpenAI-compatible adapter, and
//! `LlmClient`, which fills in default models and runs the middleware chain.

mod client;
mod openai;
mod provider;
mod types;

pub use client::*;
pub use openai::OpenAiAdapter;
pub use provider::*;
pub use types::*;
