//! Hierarchical document model
//!
//! Features:
//! - Reference grammars for legal-style section numbering (per-level regexes
//!   plus exclusion literals for irregular headings)
//! - Read-only documents assembled from ordered rows, with footnote handling
//!   and markdown decoration
//! - Tables of content with token-bounded chunking
//! - A corpus mapping document keys to documents, with an optional primary
//!   document

pub mod corpus;
pub mod document;
pub mod reference;
pub mod toc;

pub use corpus::Corpus;
pub use document::{Document, DocumentRow, StandardDocument, TextOptions};
pub use reference::{
    EmptyReferenceChecker, MultiReferenceChecker, ReferenceChecker, StandardReferenceChecker,
};
pub use toc::{SectionChunk, TableOfContents, TocNode};

use thiserror::Error;

/// Corpus errors
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("No table of content node for reference: {0}")]
    NodeNotFound(String),

    #[error("Section {reference} has no children but holds {token_count} tokens, above the split limit")]
    Unsplittable { reference: String, token_count: usize },

    #[error("Invalid index pattern: {0}")]
    Pattern(String),

    #[error("Malformed document rows: {0}")]
    MalformedRows(String),
}

impl From<CorpusError> for corpus_chat_core::Error {
    fn from(err: CorpusError) -> Self {
        corpus_chat_core::Error::Corpus(err.to_string())
    }
}
