//! LLM service adapter
//!
//! Features:
//! - `LlmClient` trait hiding the provider behind chat + embedding calls
//! - OpenAI-compatible HTTP backend
//! - Token counting with tiktoken
//! - Message-queue truncation with a hard prompt ceiling
//!
//! Only `role` and `content` ever reach the wire; everything the engine
//! attaches to its chat records stays local.

pub mod client;
pub mod params;
pub mod tokens;

pub use client::{ChatRequest, LlmClient, OpenAiClient, OpenAiConfig, WireMessage};
pub use params::ChatParameters;
pub use tokens::{num_tokens_from_messages, num_tokens_from_string};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for corpus_chat_core::Error {
    fn from(err: LlmError) -> Self {
        corpus_chat_core::Error::Llm(err.to_string())
    }
}
