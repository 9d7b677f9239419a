//! Section candidate reranking
//!
//! After the cosine filter, candidates can be reordered before the token cap
//! is applied:
//! - `None` keeps the distance order
//! - `MostCommon` prioritizes references retrieved repeatedly (one section
//!   indexed under several summaries or questions is a strong signal)
//! - `Llm` asks the model to shortlist the candidates likely to contain the
//!   answer

use std::sync::Arc;

use corpus_chat_core::SectionHit;
use corpus_chat_llm::{ChatRequest, LlmClient, WireMessage};

use crate::IndexError;

/// Configuration for the LLM shortlist strategy
#[derive(Clone)]
pub struct LlmRerankConfig {
    pub client: Arc<dyn LlmClient>,
    pub model: String,
    pub user_type: String,
    pub corpus_description: String,
}

/// Reorder strategy for retrieved section candidates
#[derive(Clone, Default)]
pub enum Reranker {
    #[default]
    None,
    MostCommon,
    Llm(LlmRerankConfig),
}

impl Reranker {
    /// Apply the strategy. The input is sorted by ascending cosine distance;
    /// the output carries a `count` per emitted row where the strategy
    /// computes one.
    pub async fn rerank(
        &self,
        sections: Vec<SectionHit>,
        user_question: &str,
    ) -> Result<Vec<SectionHit>, IndexError> {
        if sections.is_empty() {
            return Ok(sections);
        }
        match self {
            Reranker::None => {
                tracing::debug!(target: "dev", "no re-ranking of the relevant sections");
                Ok(sections)
            },
            Reranker::MostCommon => {
                tracing::debug!(target: "dev", "re-ranking using most_common");
                Ok(rerank_most_common(sections))
            },
            Reranker::Llm(config) => {
                tracing::debug!(target: "dev", "re-ranking using the LLM");
                rerank_llm(sections, user_question, config).await
            },
        }
    }
}

/// Frequency of each reference, in first-appearance order.
fn reference_counts(sections: &[SectionHit]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for section in sections {
        match counts
            .iter_mut()
            .find(|(reference, _)| reference == &section.section_reference)
        {
            Some((_, count)) => *count += 1,
            None => counts.push((section.section_reference.clone(), 1)),
        }
    }
    counts
}

fn first_with_reference<'a>(sections: &'a [SectionHit], reference: &str) -> &'a SectionHit {
    sections
        .iter()
        .find(|s| s.section_reference == reference)
        .unwrap_or(&sections[0])
}

/// Emit, each at most once: the top result, the unique mode (when distinct
/// from the top result), then every other reference retrieved more than once;
/// backfill with up to two next-best singletons when only the top result made
/// it but more candidates exist.
fn rerank_most_common(sections: Vec<SectionHit>) -> Vec<SectionHit> {
    let counts = reference_counts(&sections);
    let mut selected: Vec<SectionHit> = Vec::new();

    let mut top_result = sections[0].clone();
    top_result.count = counts
        .iter()
        .find(|(r, _)| r == &top_result.section_reference)
        .map(|(_, c)| *c)
        .unwrap_or(1);
    tracing::debug!(
        target: "dev",
        reference = %top_result.section_reference,
        cosine_distance = top_result.cosine_distance,
        "top result"
    );
    selected.push(top_result.clone());

    // Unique mode; ties mean no mode.
    let max_count = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
    let modes: Vec<&(String, usize)> = counts.iter().filter(|(_, c)| *c == max_count).collect();
    let mode_reference = if modes.len() == 1 {
        Some(modes[0].0.clone())
    } else {
        tracing::debug!(target: "dev", "multiple modes found, treated as no unique mode");
        None
    };

    if let Some(reference) = &mode_reference {
        if reference != &top_result.section_reference {
            let mut mode_result = first_with_reference(&sections, reference).clone();
            mode_result.count = max_count;
            selected.push(mode_result);
        }
    }

    // Remaining repeatedly retrieved references, in first-appearance order.
    for (reference, count) in &counts {
        if *count > 1
            && reference != &top_result.section_reference
            && Some(reference) != mode_reference.as_ref()
        {
            let mut repeat_find = first_with_reference(&sections, reference).clone();
            repeat_find.count = *count;
            selected.push(repeat_find);
        }
    }

    // Keep some diversity when only the top result was selected.
    if selected.len() == 1 && sections.len() > 1 {
        tracing::debug!(
            target: "dev",
            "only the top result added but more were found, adding the next most likely"
        );
        let mut added = 0;
        for section in &sections {
            if added >= 2 {
                break;
            }
            if section.section_reference == top_result.section_reference {
                continue;
            }
            let mut next_most_likely = section.clone();
            next_most_likely.count = 1;
            selected.push(next_most_likely);
            added += 1;
        }
    }

    selected
}

/// Ask the model which candidates likely contain the answer and keep that
/// subset, deduplicated by (document, section reference), in its order.
async fn rerank_llm(
    sections: Vec<SectionHit>,
    user_question: &str,
    config: &LlmRerankConfig,
) -> Result<Vec<SectionHit>, IndexError> {
    let listing: Vec<String> = sections
        .iter()
        .enumerate()
        .map(|(i, section)| format!("Index {}: {}", i + 1, section.text))
        .collect();

    let system_content = format!(
        "You are helping {} answer questions on {}. You will be given the users question \
         followed by a list of index items. An index item is a description of what is contained \
         in a document. It is either a summary of the document or a question that is answered in \
         the document. Your job is to use the index items to determine which documents are likely \
         to contain an answer to the users question. List the number of the index items in a pipe \
         delimited list. Do not respond with any other text. Just the pipe delimited list of \
         integer index numbers.",
        config.user_type, config.corpus_description
    );
    let user_content = format!(
        "### Question: {user_question}\n### Index items: \n{}",
        listing.join("\n")
    );

    let response = config
        .client
        .chat(ChatRequest {
            model: config.model.clone(),
            temperature: 0.0,
            max_output_tokens: 500,
            messages: vec![
                WireMessage::system(system_content),
                WireMessage::user(user_content),
            ],
        })
        .await?;

    let mut unique_keys: Vec<String> = Vec::new();
    let mut selected_rows: Vec<usize> = Vec::new();
    for item in response.split('|') {
        let item = item.trim();
        match item.parse::<i64>() {
            Ok(value) if value >= 1 && value <= sections.len() as i64 => {
                let row = (value - 1) as usize;
                let key = format!(
                    "{}_{}",
                    sections[row].document, sections[row].section_reference
                );
                if !unique_keys.contains(&key) {
                    unique_keys.push(key);
                    selected_rows.push(row);
                }
            },
            _ => {
                tracing::debug!(
                    target: "dev",
                    item,
                    candidates = sections.len(),
                    "discarding rerank item that is not a valid index"
                );
            },
        }
    }

    Ok(selected_rows
        .into_iter()
        .map(|row| sections[row].clone())
        .collect())
}
