//! Retrieval row types
//!
//! The index tables hold three kinds of rows, each with a precomputed
//! embedding: definitions, section candidates, and workflow triggers. A
//! similarity search scores rows into `*Hit` values carrying the cosine
//! distance; section hits additionally carry the materialized regulation text
//! and its token count once capping has run.

use serde::{Deserialize, Serialize};

/// A definition row in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    /// Key of the document the definition comes from
    pub document: String,
    /// Section reference within that document, empty when unreferenced
    pub section_reference: String,
    /// Index text the embedding was computed from
    pub text: String,
    /// The definition itself, shown to the LLM as an extract
    pub definition: String,
    /// Precomputed embedding of `text`
    pub embedding: Vec<f32>,
}

/// A section candidate row in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionEntry {
    /// Key of the document the section lives in
    pub document: String,
    /// Full hierarchical reference of the section
    pub section_reference: String,
    /// Where the index text came from (summary, question, heading, ...)
    pub source: String,
    /// Index text the embedding was computed from
    pub text: String,
    /// Precomputed embedding of `text`
    pub embedding: Vec<f32>,
}

/// A workflow trigger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    /// Name of the workflow to run when triggered
    pub workflow: String,
    /// Trigger text the embedding was computed from
    pub text: String,
    /// Precomputed embedding of `text`
    pub embedding: Vec<f32>,
}

/// A definition scored against a query embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionHit {
    pub document: String,
    pub section_reference: String,
    pub text: String,
    pub definition: String,
    pub cosine_distance: f32,
}

/// A section candidate scored against a query embedding
///
/// `regulation_text` and `token_count` are filled in once the index has
/// materialized the section body and applied the token cap. `count` is the
/// occurrence count attached by frequency-based reranking (1 otherwise).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionHit {
    pub document: String,
    pub section_reference: String,
    pub source: String,
    pub text: String,
    pub cosine_distance: f32,
    #[serde(default)]
    pub regulation_text: String,
    #[serde(default)]
    pub token_count: usize,
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

/// A workflow trigger scored against a query embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowHit {
    pub workflow: String,
    pub text: String,
    pub cosine_distance: f32,
}

impl SectionHit {
    /// Build a hit from an index row and its score
    pub fn from_entry(entry: &SectionEntry, cosine_distance: f32) -> Self {
        Self {
            document: entry.document.clone(),
            section_reference: entry.section_reference.clone(),
            source: entry.source.clone(),
            text: entry.text.clone(),
            cosine_distance,
            regulation_text: String::new(),
            token_count: 0,
            count: 1,
        }
    }
}

impl DefinitionHit {
    /// Build a hit from an index row and its score
    pub fn from_entry(entry: &Definition, cosine_distance: f32) -> Self {
        Self {
            document: entry.document.clone(),
            section_reference: entry.section_reference.clone(),
            text: entry.text.clone(),
            definition: entry.definition.clone(),
            cosine_distance,
        }
    }
}
