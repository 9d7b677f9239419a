//! Fallback path when retrieval is empty
//!
//! Two steps, both only reachable in permissive mode: a relevance gate that
//! decides whether to engage at all, then an uncited answer attempt where the
//! model may tap out with a designated phrase. Any answer produced here is
//! caveated because it has no supporting references.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use corpus_chat_core::{
    no_rag_caveat, AssistantResponse, ChatRecord, ErrorClassification, NoAnswerClassification,
};
use corpus_chat_index::CorpusIndex;
use corpus_chat_llm::{ChatParameters, LlmClient, WireMessage};

/// Phrase the model is instructed to emit when it cannot answer
const TAP_OUT_PHRASE: &str = "No Answer";

static NOT_RELEVANT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)not\s+relevant").expect("static regex"));

pub struct PathNoRagData {
    index: Arc<dyn CorpusIndex>,
    llm: Arc<dyn LlmClient>,
    chat: ChatParameters,
    pub(crate) execution_path: Vec<String>,
}

impl PathNoRagData {
    pub fn new(index: Arc<dyn CorpusIndex>, llm: Arc<dyn LlmClient>, chat: ChatParameters) -> Self {
        Self {
            index,
            llm,
            chat,
            execution_path: Vec::new(),
        }
    }

    fn track(&mut self, step: &str) {
        self.execution_path.push(step.to_string());
    }

    fn strip_history(history: &[ChatRecord]) -> Vec<WireMessage> {
        history.iter().map(WireMessage::from).collect()
    }

    fn error_record() -> ChatRecord {
        ChatRecord::assistant(
            ErrorClassification::NotFollowingInstructions.message(),
            AssistantResponse::error(ErrorClassification::NotFollowingInstructions),
        )
    }

    /// System prompt for the relevance gate.
    fn relevance_system_content(&self) -> String {
        format!(
            "You are assisting a user answer technical questions about the {}. \nYour task is to \
             determine if their question is about this subject matter or not. It is possible the \
             user may be engaging in pleasantries, small talk, may just be testing the bounds of \
             the system or may be asking about how to circumvent the topic. For now please \
             respond with one of only two responses: Relevant if the question, with the \
             conversation history, is about the subject matter or how to comply with the \
             regulations; or Not Relevant if the topic of the question is anything else. If the \
             question is Not Relevant, please provide a short explanation why this is the case \
             after the words Not Relevant.",
            self.index.corpus_description()
        )
    }

    /// System prompt for the uncited answer attempt.
    fn no_rag_system_content(&self) -> String {
        tracing::debug!(target: "dev", "using the default system content for RAG without supporting data");
        format!(
            "You are answering questions about {} for {}. Based on an initial search of the \
             relevant document database, no reference documents could be found to assist in \
             answering the users question. Please review the user question. If you are able to \
             answer the question, please do so. If you are not able to answer the question, \
             respond with the words {TAP_OUT_PHRASE} without punctuation or any other text.",
            self.index.corpus_description(),
            self.index.user_type()
        )
    }

    /// The relevance gate. A reply folding to "relevant" passes; anything
    /// else fails with the reply (minus the "Not Relevant" prefix) as the
    /// reason.
    async fn is_user_content_relevant(
        &mut self,
        history: &[ChatRecord],
        user_content: &str,
    ) -> Result<(bool, String), corpus_chat_llm::LlmError> {
        tracing::debug!(target: "dev", "checking whether to engage with the user or not");
        let system = WireMessage::system(self.relevance_system_content());
        let mut messages = Self::strip_history(history);
        messages.push(WireMessage::user(user_content));

        let response = self
            .chat
            .respond(self.llm.as_ref(), Some(&system), &messages)
            .await?;

        if response.trim().to_lowercase() == "relevant" {
            tracing::debug!(target: "dev", "the question was deemed relevant");
            Ok((true, String::new()))
        } else {
            tracing::debug!(target: "dev", response = %response, "the question was deemed not relevant");
            let stripped = NOT_RELEVANT.replace_all(&response, "").trim().to_string();
            Ok((false, stripped))
        }
    }

    /// Run the gate, then (when relevant) the uncited answer attempt.
    pub async fn query_no_rag_data(
        &mut self,
        history: &[ChatRecord],
        user_content: &str,
    ) -> ChatRecord {
        tracing::debug!(target: "dev", "query_no_rag_data called");

        let (relevant, reason) = match self.is_user_content_relevant(history, user_content).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "relevance gate chat call failed");
                return Self::error_record();
            },
        };

        if !relevant {
            self.track("PathNoRagData.query_no_rag_data. Not relevant");
            let reason = reason
                .trim_start_matches(['.', ',', ';', ':', '!', '?', ' ', '\t', '\n', '\r'])
                .to_string();
            return ChatRecord::assistant(
                reason.clone(),
                AssistantResponse::NoAnswer {
                    classification: NoAnswerClassification::QuestionNotRelevant,
                    additional_text: reason,
                },
            );
        }

        self.track("PathNoRagData.query_no_rag_data. Relevant");
        let system = WireMessage::system(self.no_rag_system_content());
        let mut messages = Self::strip_history(history);
        messages.push(WireMessage::user(user_content));

        let response = match self
            .chat
            .respond(self.llm.as_ref(), Some(&system), &messages)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "uncited answer chat call failed");
                return Self::error_record();
            },
        };

        if response.trim().to_lowercase() == TAP_OUT_PHRASE.to_lowercase() {
            self.track("PathNoRagData.query_no_rag_data. Relevant. No answer");
            tracing::debug!(target: "dev", "the model tapped out of answering without references");
            return ChatRecord::assistant(
                TAP_OUT_PHRASE,
                AssistantResponse::no_answer(NoAnswerClassification::UnableToAnswer),
            );
        }

        self.track("PathNoRagData.query_no_rag_data. Relevant. Answer");
        let caveat = no_rag_caveat().to_string();
        ChatRecord::assistant(
            format!("{caveat}\n\n{response}"),
            AssistantResponse::AnswerWithoutRag {
                answer: response,
                caveat,
            },
        )
    }
}
