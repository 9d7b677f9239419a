//! Similarity search path
//!
//! Embeds the question once, then queries workflow triggers, definitions and
//! sections in that order. A workflow supersedes retrieval only when its
//! cosine distance is strictly below both the best definition's and the best
//! section's.

use std::sync::Arc;

use corpus_chat_config::EmbeddingSettings;
use corpus_chat_core::{DefinitionHit, Error, SectionHit};
use corpus_chat_index::{CorpusIndex, Reranker};
use corpus_chat_llm::LlmClient;

/// Name reported when no workflow is triggered
pub const NO_WORKFLOW: &str = "none";

pub struct PathSearch {
    index: Arc<dyn CorpusIndex>,
    llm: Arc<dyn LlmClient>,
    embedding: EmbeddingSettings,
    threshold_sections: f32,
    threshold_definitions: f32,
    reranker: Reranker,
    pub(crate) execution_path: Vec<String>,
}

impl PathSearch {
    pub fn new(
        index: Arc<dyn CorpusIndex>,
        llm: Arc<dyn LlmClient>,
        embedding: EmbeddingSettings,
        reranker: Reranker,
    ) -> Result<Self, Error> {
        let thresholds = embedding
            .thresholds()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            index,
            llm,
            embedding,
            threshold_sections: thresholds.sections,
            threshold_definitions: thresholds.definitions,
            reranker,
            execution_path: Vec::new(),
        })
    }

    fn track(&mut self, step: &str) {
        self.execution_path.push(step.to_string());
    }

    /// Returns the triggered workflow name (or `"none"`), the relevant
    /// definitions and the relevant sections.
    pub async fn similarity_search(
        &mut self,
        user_question: &str,
    ) -> Result<(String, Vec<DefinitionHit>, Vec<SectionHit>), Error> {
        tracing::debug!(target: "dev", "similarity_search called");
        self.track("PathSearch.similarity_search");

        let question_embedding = self
            .llm
            .embed(
                &self.embedding.model,
                user_question,
                self.embedding.dimensions_param(),
            )
            .await
            .map_err(corpus_chat_core::Error::from)?;

        let workflows =
            self.index
                .relevant_workflow(user_question, &question_embedding, self.threshold_sections);
        let (mut workflow_triggered, workflow_score) = match workflows.first() {
            Some(best) => {
                tracing::info!(
                    target: "analysis",
                    workflow = %best.workflow,
                    "found a potentially relevant workflow"
                );
                (best.workflow.clone(), best.cosine_distance)
            },
            None => (NO_WORKFLOW.to_string(), 1.0),
        };

        let definitions = self.index.relevant_definitions(
            user_question,
            &question_embedding,
            self.threshold_definitions,
        );
        if let Some(best) = definitions.first() {
            if workflow_triggered != NO_WORKFLOW && workflow_score >= best.cosine_distance {
                tracing::debug!(
                    target: "dev",
                    workflow = %workflow_triggered,
                    "a definition is at least as relevant as the workflow"
                );
                workflow_triggered = NO_WORKFLOW.to_string();
            }
        }

        let sections = self
            .index
            .relevant_sections(
                user_question,
                &question_embedding,
                self.threshold_sections,
                &self.reranker,
            )
            .await
            .map_err(corpus_chat_core::Error::from)?;
        if let Some(best) = sections.first() {
            if workflow_triggered != NO_WORKFLOW && workflow_score >= best.cosine_distance {
                tracing::debug!(
                    target: "dev",
                    workflow = %workflow_triggered,
                    "a section is at least as relevant as the workflow"
                );
                workflow_triggered = NO_WORKFLOW.to_string();
            }
        }

        Ok((workflow_triggered, definitions, sections))
    }
}
