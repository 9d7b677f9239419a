//! Chat records
//!
//! The session transcript is a list of `ChatRecord`s in an OpenAI-style
//! format with two extra fields: the reference material retrieved for a user
//! turn, and the classified response attached to an assistant turn. Only
//! `role` and `content` ever cross the wire; the extra fields are stripped by
//! the LLM adapter before a call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::response::AssistantResponse;
use crate::retrieval::{DefinitionHit, SectionHit};

/// Speaker role of a chat record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The definitions and sections retrieved for one user turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceMaterial {
    pub definitions: Vec<DefinitionHit>,
    pub sections: Vec<SectionHit>,
}

impl ReferenceMaterial {
    pub fn new(definitions: Vec<DefinitionHit>, sections: Vec<SectionHit>) -> Self {
        Self { definitions, sections }
    }

    /// Total number of extracts the LLM will be shown
    pub fn extract_count(&self) -> usize {
        self.definitions.len() + self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty() && self.sections.is_empty()
    }
}

/// One entry in the session transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Material retrieved for a user turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_material: Option<ReferenceMaterial>,
    /// Classified outcome attached to an assistant turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_response: Option<AssistantResponse>,
}

impl ChatRecord {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            reference_material: None,
            assistant_response: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn user_with_material(content: impl Into<String>, material: ReferenceMaterial) -> Self {
        let mut record = Self::new(Role::User, content);
        record.reference_material = Some(material);
        record
    }

    pub fn assistant(content: impl Into<String>, response: AssistantResponse) -> Self {
        let mut record = Self::new(Role::Assistant, content);
        record.assistant_response = Some(response);
        record
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// True when two records would duplicate each other in the transcript
    pub fn duplicates(&self, other: &ChatRecord) -> bool {
        self.role == other.role && self.content == other.content
    }
}
