//! Core types shared across the corpus chat crates:
//! - Chat records and roles
//! - The assistant response sum type and its classifications
//! - Retrieval row types (definitions, section candidates, workflow triggers)
//! - Error types

pub mod error;
pub mod message;
pub mod response;
pub mod retrieval;

pub use error::{Error, Result};
pub use message::{ChatRecord, ReferenceMaterial, Role};
pub use response::{
    no_rag_caveat, AssistantResponse, ErrorClassification, NoAnswerClassification, UsedReference,
};
pub use retrieval::{
    Definition, DefinitionHit, SectionEntry, SectionHit, WorkflowHit, WorkflowTrigger,
};
