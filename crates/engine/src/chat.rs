//! The session state machine
//!
//! A session is a list of chat records plus a state. Each user input runs the
//! search path, then either a workflow hook, the RAG path, or the no-data
//! fallback, and appends the user and assistant records to the transcript. A
//! system message is generated per path and never stored, so any list sent to
//! the provider holds at most one.
//!
//! Unrecoverable conditions (null input, missing workflow handler) place the
//! session in the sticky `Stuck` state; only `reset` leaves it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use corpus_chat_config::{EmbeddingSettings, RagSettings, RerankStrategy};
use corpus_chat_core::{
    AssistantResponse, ChatRecord, Error, ErrorClassification, NoAnswerClassification,
    ReferenceMaterial,
};
use corpus_chat_index::{CorpusIndex, LlmRerankConfig, Reranker};
use corpus_chat_llm::{ChatParameters, LlmClient};

use crate::path_no_rag::PathNoRagData;
use crate::path_rag::PathRag;
use crate::path_search::{PathSearch, NO_WORKFLOW};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Normal operation
    Rag,
    /// Unrecoverable; sticky until `reset`
    Stuck,
}

/// User-supplied behavior for a triggered workflow. The returned record is
/// appended as the assistant's reply and the session stays in `Rag`.
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    async fn run(&self, workflow: &str, user_content: &str) -> ChatRecord;
}

/// One conversation over one corpus
pub struct CorpusChat {
    user_id: String,
    strict_rag: bool,
    state: SessionState,
    messages: Vec<ChatRecord>,
    execution_path: Vec<String>,
    path_search: PathSearch,
    path_no_rag: PathNoRagData,
    path_rag: PathRag,
    workflow_handlers: HashMap<String, Arc<dyn WorkflowHandler>>,
}

impl CorpusChat {
    /// Wire up the three paths over a shared index and LLM client.
    pub fn new(
        index: Arc<dyn CorpusIndex>,
        llm: Arc<dyn LlmClient>,
        chat_parameters: ChatParameters,
        embedding: EmbeddingSettings,
        rag: RagSettings,
    ) -> Result<Self, Error> {
        let reranker = match rag.rerank {
            RerankStrategy::None => Reranker::None,
            RerankStrategy::MostCommon => Reranker::MostCommon,
            RerankStrategy::Llm => Reranker::Llm(LlmRerankConfig {
                client: Arc::clone(&llm),
                model: chat_parameters.model.clone(),
                user_type: index.user_type().to_string(),
                corpus_description: index.corpus_description().to_string(),
            }),
        };

        Ok(Self {
            user_id: "test_user".to_string(),
            strict_rag: rag.strict_rag,
            state: SessionState::Rag,
            messages: Vec::new(),
            execution_path: Vec::new(),
            path_search: PathSearch::new(
                Arc::clone(&index),
                Arc::clone(&llm),
                embedding,
                reranker,
            )?,
            path_no_rag: PathNoRagData::new(
                Arc::clone(&index),
                Arc::clone(&llm),
                chat_parameters.clone(),
            ),
            path_rag: PathRag::new(index, llm, chat_parameters),
            workflow_handlers: HashMap::new(),
        })
    }

    /// Label used in audit logs
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Register a handler for a named workflow.
    pub fn register_workflow(
        &mut self,
        workflow: impl Into<String>,
        handler: Arc<dyn WorkflowHandler>,
    ) {
        self.workflow_handlers.insert(workflow.into(), handler);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn strict_rag(&self) -> bool {
        self.strict_rag
    }

    pub fn set_strict_rag(&mut self, strict_rag: bool) {
        self.strict_rag = strict_rag;
    }

    pub fn messages(&self) -> &[ChatRecord] {
        &self.messages
    }

    /// Tagged step names of everything that ran for the last input
    pub fn execution_path(&self) -> &[String] {
        &self.execution_path
    }

    /// Clear the transcript and return to `Rag`. Idempotent.
    pub fn reset(&mut self) {
        tracing::debug!(target: "dev", user = %self.user_id, "reset conversation history");
        self.messages.clear();
        self.state = SessionState::Rag;
    }

    fn track(&mut self, step: &str) {
        self.execution_path.push(step.to_string());
    }

    fn drain_path_steps(&mut self) {
        let mut steps = Vec::new();
        steps.append(&mut self.path_search.execution_path);
        steps.append(&mut self.path_rag.execution_path);
        steps.append(&mut self.path_no_rag.execution_path);
        self.execution_path.extend(steps);
    }

    /// Append unless it duplicates the previous record (same role and
    /// content).
    fn append_record(&mut self, record: ChatRecord) {
        if let Some(last) = self.messages.last() {
            if last.duplicates(&record) {
                tracing::debug!(
                    target: "dev",
                    role = %record.role,
                    "not adding a duplicate message"
                );
                return;
            }
        }
        self.messages.push(record);
    }

    /// Record the error, park the session. Sticky until `reset`.
    fn place_in_stuck_state(&mut self, classification: ErrorClassification) -> ChatRecord {
        tracing::error!(
            user = %self.user_id,
            classification = ?classification,
            "placing the session in the stuck state"
        );
        self.track("CorpusChat.place_in_stuck_state");
        let response = AssistantResponse::error(classification);
        let record = ChatRecord::assistant(response.chat_content(), response);
        self.append_record(record.clone());
        self.state = SessionState::Stuck;
        record
    }

    /// Process one user input and return the assistant record for the turn.
    ///
    /// Retrieval infrastructure failures (embedding call, index) propagate as
    /// errors and leave the session unchanged; everything else is classified
    /// into the returned record.
    pub async fn user_provides_input(&mut self, input: Option<&str>) -> Result<ChatRecord, Error> {
        self.execution_path.clear();
        self.track("CorpusChat.user_provides_input");

        let user_content = match input {
            Some(content) if !content.trim().is_empty() => content,
            _ => {
                tracing::error!(
                    user = %self.user_id,
                    "user_provides_input received an empty input, parking the session"
                );
                return Ok(self.place_in_stuck_state(ErrorClassification::Error));
            },
        };

        match self.state {
            SessionState::Stuck => Ok(self.place_in_stuck_state(ErrorClassification::Stuck)),
            SessionState::Rag => {
                tracing::info!(target: "analysis", user = %self.user_id, content = user_content, "user input");

                let search = self.path_search.similarity_search(user_content).await;
                self.drain_path_steps();
                let (workflow_triggered, definitions, sections) = search?;

                if workflow_triggered != NO_WORKFLOW {
                    tracing::info!(
                        target: "analysis",
                        user = %self.user_id,
                        workflow = %workflow_triggered,
                        "triggering workflow"
                    );
                    return Ok(self
                        .execute_path_workflow(&workflow_triggered, user_content)
                        .await);
                }

                Ok(self
                    .run_base_rag_path(
                        user_content,
                        ReferenceMaterial::new(definitions, sections),
                    )
                    .await)
            },
        }
    }

    async fn run_base_rag_path(
        &mut self,
        user_content: &str,
        material: ReferenceMaterial,
    ) -> ChatRecord {
        self.track("CorpusChat.run_base_rag_path");

        if material.is_empty() {
            // No hits at all; history may still let a subclassed flow phrase
            // a better question, so the two cases stay separate hooks.
            return if self.messages.len() < 2 {
                self.execute_path_no_retrieval_no_conversation_history(user_content)
                    .await
            } else {
                self.execute_path_no_retrieval_with_conversation_history(user_content)
                    .await
            };
        }

        tracing::info!(target: "analysis", user = %self.user_id, "performing RAG");
        let outcome = self
            .path_rag
            .perform_rag_path(&self.messages, user_content, material)
            .await;
        self.drain_path_steps();

        if !self.strict_rag {
            if let Some(AssistantResponse::NoAnswer { classification, .. }) =
                &outcome.record.assistant_response
            {
                if *classification == NoAnswerClassification::QuestionNotRelevant {
                    // Known not relevant; no point re-testing without data.
                    self.append_record(ChatRecord::user_with_material(
                        user_content,
                        outcome.material,
                    ));
                    self.append_record(outcome.record.clone());
                    tracing::info!(
                        target: "analysis",
                        user = %self.user_id,
                        "RAG returned a question-not-relevant response"
                    );
                    return outcome.record;
                }
                tracing::info!(
                    target: "analysis",
                    user = %self.user_id,
                    "RAG returned a no-answer response, trying without the retrieved data"
                );
                return self
                    .execute_path_answer_question_with_no_data(user_content)
                    .await;
            }
        }

        self.append_record(ChatRecord::user_with_material(user_content, outcome.material));
        self.append_record(outcome.record.clone());
        tracing::info!(target: "analysis", user = %self.user_id, "RAG returned the response");
        outcome.record
    }

    async fn execute_path_workflow(&mut self, workflow: &str, user_content: &str) -> ChatRecord {
        self.track("CorpusChat.execute_path_workflow");
        self.append_record(ChatRecord::user(user_content));

        match self.workflow_handlers.get(workflow).cloned() {
            Some(handler) => {
                let record = handler.run(workflow, user_content).await;
                self.append_record(record.clone());
                record
            },
            None => {
                tracing::error!(
                    user = %self.user_id,
                    workflow,
                    "a workflow was triggered but no handler is registered"
                );
                self.place_in_stuck_state(ErrorClassification::WorkflowNotImplemented)
            },
        }
    }

    /// No retrieval hits and no usable history. Strict mode answers
    /// `NoData` without calling the LLM; permissive mode tries the fallback
    /// path.
    async fn execute_path_no_retrieval_no_conversation_history(
        &mut self,
        user_content: &str,
    ) -> ChatRecord {
        if self.strict_rag {
            self.track("CorpusChat.execute_path_no_retrieval_no_conversation_history. Strict RAG");
            tracing::info!(
                target: "analysis",
                user = %self.user_id,
                "no retrieval hits under strict RAG, returning a no-answer response"
            );
            self.append_record(ChatRecord::user(user_content));
            let response = AssistantResponse::no_answer(NoAnswerClassification::NoData);
            let record = ChatRecord::assistant(response.chat_content(), response);
            self.append_record(record.clone());
            record
        } else {
            self.track(
                "CorpusChat.execute_path_no_retrieval_no_conversation_history. Permissive RAG",
            );
            tracing::info!(
                target: "analysis",
                user = %self.user_id,
                "no retrieval hits, trying to answer without supporting documents"
            );
            let record = self
                .path_no_rag
                .query_no_rag_data(&self.messages, user_content)
                .await;
            self.drain_path_steps();
            self.append_record(ChatRecord::user(user_content));
            self.append_record(record.clone());
            record
        }
    }

    /// No retrieval hits but the conversation has history. The default
    /// behavior does not try to use it.
    async fn execute_path_no_retrieval_with_conversation_history(
        &mut self,
        user_content: &str,
    ) -> ChatRecord {
        self.track("CorpusChat.execute_path_no_retrieval_with_conversation_history");
        self.execute_path_no_retrieval_no_conversation_history(user_content)
            .await
    }

    /// The retrieved material was not useful; try without it (permissive) or
    /// report `NoData` (strict).
    async fn execute_path_answer_question_with_no_data(
        &mut self,
        user_content: &str,
    ) -> ChatRecord {
        if !self.strict_rag {
            self.track("CorpusChat.execute_path_answer_question_with_no_data. Permissive RAG");
            let record = self
                .path_no_rag
                .query_no_rag_data(&self.messages, user_content)
                .await;
            self.drain_path_steps();
            tracing::info!(target: "analysis", user = %self.user_id, "query_no_rag_data returned the response");
            self.append_record(ChatRecord::user(user_content));
            self.append_record(record.clone());
            record
        } else {
            self.track("CorpusChat.execute_path_answer_question_with_no_data. Strict RAG");
            tracing::info!(
                target: "analysis",
                user = %self.user_id,
                "strict RAG, returning a no-answer response"
            );
            self.append_record(ChatRecord::user(user_content));
            let response = AssistantResponse::no_answer(NoAnswerClassification::NoData);
            let record = ChatRecord::assistant(response.chat_content(), response);
            self.append_record(record.clone());
            record
        }
    }
}
