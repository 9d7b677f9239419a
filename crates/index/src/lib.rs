//! Corpus index
//!
//! Features:
//! - Cosine search over the three index tables (definitions, sections,
//!   workflow triggers)
//! - Reranking of section candidates (none / most-common / LLM shortlist)
//! - Materialization of section text with a token cap

pub mod corpus_index;
pub mod rerank;
pub mod search;

pub use corpus_index::{CorpusIndex, InMemoryCorpusIndex};
pub use rerank::{LlmRerankConfig, Reranker};
pub use search::{closest_definitions, closest_sections, closest_workflows, cosine_distance};

use thiserror::Error;

/// Index errors
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Unknown document key: {0}")]
    UnknownDocument(String),

    #[error("Corpus error: {0}")]
    Corpus(#[from] corpus_chat_corpus::CorpusError),

    #[error("LLM error: {0}")]
    Llm(#[from] corpus_chat_llm::LlmError),
}

impl From<IndexError> for corpus_chat_core::Error {
    fn from(err: IndexError) -> Self {
        corpus_chat_core::Error::Index(err.to_string())
    }
}
