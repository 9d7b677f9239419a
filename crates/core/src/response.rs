//! Assistant response sum type
//!
//! Every public engine return produces exactly one of these variants. The
//! variant carries the parts of the answer so callers can format them
//! differently from the flat chat `content`, plus the classification of a
//! non-answer or error.

use serde::{Deserialize, Serialize};

/// Caveat attached to any answer produced without reference material.
pub fn no_rag_caveat() -> &'static str {
    "NOTE: The following answer is provided without references and should therefore be treated with caution."
}

/// Why the assistant declined to answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoAnswerClassification {
    /// Strict RAG was requested but retrieval produced no data
    NoData,
    /// Retrieval produced data but none of it was deemed relevant
    NoRelevantData,
    /// The question itself is not about the corpus
    QuestionNotRelevant,
    /// The model tapped out of answering without references
    UnableToAnswer,
}

impl NoAnswerClassification {
    /// Text recorded as the assistant's chat content for this classification
    pub fn message(&self) -> &'static str {
        match self {
            NoAnswerClassification::NoData => {
                "The model was asked to perform strict RAG without any data being provided"
            },
            NoAnswerClassification::NoRelevantData => {
                "The model was asked to perform strict RAG but the data provided was not deemed relevant"
            },
            NoAnswerClassification::QuestionNotRelevant => {
                "The model determined that the question was not relevant to the corpus"
            },
            NoAnswerClassification::UnableToAnswer => {
                "The model was unable to answer the question"
            },
        }
    }
}

/// What went wrong when the turn could not be completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// Unexpected failure; the session is placed in the stuck state
    Error,
    /// Two consecutive LLM replies failed validation
    NotFollowingInstructions,
    /// The model requested an additional section that could not be retrieved
    CallForMoreDocumentsFailed,
    /// The session is in the stuck state and must be reset
    Stuck,
    /// A workflow was triggered but no handler is registered for it
    WorkflowNotImplemented,
}

impl ErrorClassification {
    /// Text recorded as the assistant's chat content for this classification
    pub fn message(&self) -> &'static str {
        match self {
            ErrorClassification::Error | ErrorClassification::Stuck => {
                "Unfortunately the system is in an unrecoverable state. Please clear the chat \
                 history and retry your query"
            },
            ErrorClassification::NotFollowingInstructions => {
                "Behind the scenes, instructions are issued to a Large Language Model (LLM) and \
                 then verified. Occasionally, due to the statistical nature of the model, the LLM \
                 may not follow instructions correctly. In such cases the system is programmed \
                 not to respond but to ask you to clear the conversation history and try asking \
                 your question again. If the same error persists in the same spot, it likely \
                 indicates a bug rather than a statistical anomaly. For now, please clear the \
                 conversation history and retry your query."
            },
            ErrorClassification::CallForMoreDocumentsFailed => {
                "While accessing the source documents, the system requested additional material. \
                 There was an error in retrieving this additional material."
            },
            ErrorClassification::WorkflowNotImplemented => {
                "A workflow was triggered but there is no implementation registered for it"
            },
        }
    }
}

/// One row of the provenance table attached to a referenced answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsedReference {
    /// Corpus key of the document
    pub document_key: String,
    /// Display name of the document
    pub document_name: String,
    /// Section reference within the document, empty when unreferenced
    pub section_reference: String,
    /// True when the extract was a definition rather than a section
    pub is_definition: bool,
    /// Full text of the cited material
    pub text: String,
}

/// The classified outcome of a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssistantResponse {
    /// An answer supported by cited extracts
    AnswerWithRag {
        /// Answer text stripped of the tag prefix and the reference tail
        answer: String,
        /// The extracts actually cited, in citation order
        references: Vec<UsedReference>,
    },
    /// An answer produced without reference material, always caveated
    AnswerWithoutRag { answer: String, caveat: String },
    /// A classified refusal to answer
    NoAnswer {
        classification: NoAnswerClassification,
        /// Extra explanation, e.g. the relevance gate's reason
        additional_text: String,
    },
    /// A classified failure
    Error { classification: ErrorClassification },
}

impl AssistantResponse {
    pub fn no_answer(classification: NoAnswerClassification) -> Self {
        AssistantResponse::NoAnswer {
            classification,
            additional_text: String::new(),
        }
    }

    pub fn error(classification: ErrorClassification) -> Self {
        AssistantResponse::Error { classification }
    }

    /// Render the response as flat chat history content.
    ///
    /// Referenced answers include the full text of every citation so later
    /// turns can build on it; classified outcomes use their canned message.
    pub fn chat_content(&self) -> String {
        match self {
            AssistantResponse::AnswerWithRag { answer, references } => {
                let mut reference_string = String::new();
                for used in references {
                    if used.is_definition {
                        if used.section_reference.is_empty() {
                            reference_string += &format!(
                                "The definitions in {}: \n\n{}  \n\n",
                                used.document_name, used.text
                            );
                        } else {
                            reference_string += &format!(
                                "Definition {} from {}: \n\n{}  \n\n",
                                used.section_reference, used.document_name, used.text
                            );
                        }
                    } else if used.section_reference.is_empty() {
                        reference_string += &format!(
                            "The document {}: \n\n{}  \n\n",
                            used.document_name, used.text
                        );
                    } else {
                        reference_string += &format!(
                            "Section {} from {}: \n\n{}  \n\n",
                            used.section_reference, used.document_name, used.text
                        );
                    }
                }
                if references.is_empty() {
                    answer.clone()
                } else {
                    format!("{} \n\nReference: \n\n{}", answer, reference_string)
                }
            },
            AssistantResponse::AnswerWithoutRag { answer, caveat } => {
                format!("{} \n\n{}", caveat, answer)
            },
            AssistantResponse::NoAnswer { classification, .. } => {
                classification.message().to_string()
            },
            AssistantResponse::Error { classification } => classification.message().to_string(),
        }
    }

    /// True for the refusal variant with the given classification
    pub fn is_no_answer(&self, classification: NoAnswerClassification) -> bool {
        matches!(
            self,
            AssistantResponse::NoAnswer { classification: c, .. } if *c == classification
        )
    }
}
