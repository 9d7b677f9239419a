//! Session orchestrator
//!
//! A user utterance enters the session state machine, which retrieves
//! reference material, drives a constrained dialogue with the LLM, validates
//! every reply against the material and the corpus's reference grammars, and
//! records a classified answer, non-answer or error on the transcript.
//!
//! Paths:
//! - `PathSearch` embeds the question and decides whether a workflow
//!   supersedes retrieval
//! - `PathRag` runs the tagged-response protocol over retrieved material,
//!   including the "request additional section" loop
//! - `PathNoRagData` is the permissive-mode fallback when retrieval is empty

pub mod chat;
pub mod path_no_rag;
pub mod path_rag;
pub mod path_search;

pub use chat::{CorpusChat, SessionState, WorkflowHandler};
pub use path_no_rag::PathNoRagData;
pub use path_rag::{CheckedResponse, PathRag, PathRagOutcome};
pub use path_search::PathSearch;
