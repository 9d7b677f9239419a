//! Workspace-wide error type
//!
//! Each crate keeps its own `thiserror` enum; this is the aggregate the
//! engine signatures use. Conversions from the per-crate enums live next to
//! those enums.

use thiserror::Error;

/// Top-level error for corpus chat operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),
}

/// Result type alias using the workspace error
pub type Result<T> = std::result::Result<T, Error>;
