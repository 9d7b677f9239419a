//! The corpus index
//!
//! Serves the retrieval side of a question: definitions, section candidates
//! and workflow triggers close to the query embedding. Section candidates are
//! materialized against the corpus and capped by token count so the reference
//! material handed to the LLM stays inside the prompt budget.

use async_trait::async_trait;

use corpus_chat_config::RagSettings;
use corpus_chat_core::{
    Definition, DefinitionHit, SectionEntry, SectionHit, WorkflowHit, WorkflowTrigger,
};
use corpus_chat_corpus::{Corpus, TextOptions};
use corpus_chat_llm::num_tokens_from_string;

use crate::rerank::Reranker;
use crate::search::{closest_definitions, closest_sections, closest_workflows};
use crate::IndexError;

/// Read-only retrieval interface over one corpus
#[async_trait]
pub trait CorpusIndex: Send + Sync {
    /// Who the model is assisting, quoted in system prompts
    fn user_type(&self) -> &str;

    /// What the corpus covers, quoted in system prompts
    fn corpus_description(&self) -> &str;

    fn corpus(&self) -> &Corpus;

    /// Definitions closer than the threshold, nearest first
    fn relevant_definitions(
        &self,
        user_question: &str,
        question_embedding: &[f32],
        threshold: f32,
    ) -> Vec<DefinitionHit>;

    /// Section candidates: cosine filter, initial cap, rerank, materialize,
    /// token cap, then the top five by distance
    async fn relevant_sections(
        &self,
        user_question: &str,
        question_embedding: &[f32],
        threshold: f32,
        reranker: &Reranker,
    ) -> Result<Vec<SectionHit>, IndexError>;

    /// Workflow triggers closer than the threshold; empty without a workflow
    /// table
    fn relevant_workflow(
        &self,
        user_question: &str,
        question_embedding: &[f32],
        threshold: f32,
    ) -> Vec<WorkflowHit>;
}

/// Index over in-memory row collections
pub struct InMemoryCorpusIndex {
    user_type: String,
    corpus_description: String,
    corpus: Corpus,
    definitions: Vec<Definition>,
    sections: Vec<SectionEntry>,
    workflows: Vec<WorkflowTrigger>,
    rag: RagSettings,
}

impl InMemoryCorpusIndex {
    pub fn new(
        user_type: impl Into<String>,
        corpus_description: impl Into<String>,
        corpus: Corpus,
        definitions: Vec<Definition>,
        sections: Vec<SectionEntry>,
        workflows: Vec<WorkflowTrigger>,
        rag: RagSettings,
    ) -> Self {
        Self {
            user_type: user_type.into(),
            corpus_description: corpus_description.into(),
            corpus,
            definitions,
            sections,
            workflows,
            rag,
        }
    }

    /// Fill in `regulation_text` and `token_count`, then walk the list in
    /// rerank order accumulating tokens: keep everything up to the row that
    /// would breach the cap. When even the first row breaches it, keep that
    /// row alone. Finally return the `min(kept, 5)` rows closest by cosine
    /// distance, ascending.
    fn cap_section_token_length(
        &self,
        mut sections: Vec<SectionHit>,
    ) -> Result<Vec<SectionHit>, IndexError> {
        for section in &mut sections {
            let text = self
                .corpus
                .get_text(
                    &section.document,
                    &section.section_reference,
                    &TextOptions::default().with_markdown(false),
                )
                .ok_or_else(|| IndexError::UnknownDocument(section.document.clone()))??;
            section.token_count = num_tokens_from_string(&text);
            section.regulation_text = text;
        }

        let cap = self.rag.final_token_cap;
        let mut cumulative = 0usize;
        let mut kept = 0usize;
        let mut breached = false;
        for section in &sections {
            if cumulative + section.token_count > cap {
                breached = true;
                break;
            }
            cumulative += section.token_count;
            kept += 1;
        }
        if kept == 0 {
            // Either the first section alone breaches the cap (keep it
            // anyway, one section) or the list is empty.
            kept = if sections.is_empty() { 0 } else { 1 };
        }
        if breached {
            tracing::debug!(
                target: "dev",
                from = sections.len(),
                to = kept,
                "token capping reduced the number of reference sections"
            );
        }

        let final_rows = kept.min(5);
        let mut by_distance = sections;
        by_distance.sort_by(|a, b| {
            a.cosine_distance
                .partial_cmp(&b.cosine_distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        by_distance.truncate(final_rows);
        Ok(by_distance)
    }
}

#[async_trait]
impl CorpusIndex for InMemoryCorpusIndex {
    fn user_type(&self) -> &str {
        &self.user_type
    }

    fn corpus_description(&self) -> &str {
        &self.corpus_description
    }

    fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    fn relevant_definitions(
        &self,
        _user_question: &str,
        question_embedding: &[f32],
        threshold: f32,
    ) -> Vec<DefinitionHit> {
        let hits = closest_definitions(&self.definitions, question_embedding, threshold);
        if hits.is_empty() {
            tracing::debug!(target: "dev", "no relevant definitions found");
        } else {
            for hit in &hits {
                tracing::debug!(
                    target: "dev",
                    cosine_distance = hit.cosine_distance,
                    text = %hit.text,
                    "relevant definition"
                );
            }
        }
        hits
    }

    async fn relevant_sections(
        &self,
        user_question: &str,
        question_embedding: &[f32],
        threshold: f32,
        reranker: &Reranker,
    ) -> Result<Vec<SectionHit>, IndexError> {
        let mut hits = closest_sections(&self.sections, question_embedding, threshold);
        if hits.is_empty() {
            tracing::debug!(target: "dev", "no relevant sections found");
            return Ok(hits);
        }

        hits.truncate(self.rag.initial_section_number_cap);
        tracing::debug!(
            target: "dev",
            top = self.rag.initial_section_number_cap,
            found = hits.len(),
            "selected the top items by cosine-similarity score"
        );
        for hit in &hits {
            tracing::debug!(
                target: "dev",
                cosine_distance = hit.cosine_distance,
                document = %hit.document,
                reference = %hit.section_reference,
                source = %hit.source,
                "section candidate"
            );
        }

        let reranked = reranker.rerank(hits, user_question).await?;
        if reranked.is_empty() {
            tracing::debug!(target: "dev", "re-ranking concluded there were no relevant sections");
            return Ok(reranked);
        }

        self.cap_section_token_length(reranked)
    }

    fn relevant_workflow(
        &self,
        _user_question: &str,
        question_embedding: &[f32],
        threshold: f32,
    ) -> Vec<WorkflowHit> {
        if self.workflows.is_empty() {
            return Vec::new();
        }
        closest_workflows(&self.workflows, question_embedding, threshold)
    }
}
