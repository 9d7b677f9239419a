//! The constrained RAG dialogue
//!
//! The LLM must begin its reply with exactly one of `ANSWER:`, `SECTION:` or
//! `NONE:`. Every reply is validated against the reference material and the
//! corpus's reference grammars before anything is recorded. Formatting
//! failures earn the model one follow-up instruction; a well-formed section
//! request triggers the augmentation loop; two consecutive invalid replies
//! end the turn with `NotFollowingInstructions`.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use corpus_chat_core::{
    no_rag_caveat, AssistantResponse, ChatRecord, ErrorClassification, NoAnswerClassification,
    ReferenceMaterial, SectionHit, UsedReference,
};
use corpus_chat_corpus::TextOptions;
use corpus_chat_index::CorpusIndex;
use corpus_chat_llm::{num_tokens_from_string, ChatParameters, LlmClient, WireMessage};

/// Keyword that introduces the citation list at the end of an answer. Used in
/// the system prompt, the validator and the follow-up instructions; defined
/// once so none of them drift.
const REFERENCE_KEYWORD: &str = "Reference:";

const ANSWER_PREFIX: &str = "ANSWER:";
const SECTION_PREFIX: &str = "SECTION:";
const NONE_PREFIX: &str = "NONE:";

static SECTION_REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^extract\s*:?\s*(\d+).*reference\s*:?\s*(.+)").expect("static regex")
});
static FIRST_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static regex"));

/// Outcome of validating one LLM reply
#[derive(Debug)]
pub enum CheckedResponse {
    /// Nothing more to do; the record goes straight onto the transcript
    Final(ChatRecord),
    /// The reply broke the protocol; `instruction` tells the model exactly
    /// what to fix
    Followup { content: String, instruction: String },
    /// A well-formed request for the full text of a section
    Section {
        extract: usize,
        document: String,
        section: String,
    },
}

/// What `perform_rag_path` hands back to the orchestrator: the assistant
/// record plus the reference material actually used (a granted section
/// request appends to it).
#[derive(Debug)]
pub struct PathRagOutcome {
    pub record: ChatRecord,
    pub material: ReferenceMaterial,
}

enum SectionAddition {
    Added(ReferenceMaterial),
    AlreadyPresent,
    Failed,
}

pub struct PathRag {
    index: Arc<dyn CorpusIndex>,
    llm: Arc<dyn LlmClient>,
    chat: ChatParameters,
    pub(crate) execution_path: Vec<String>,
}

impl PathRag {
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

    fn error_record(classification: ErrorClassification, content: impl Into<String>) -> ChatRecord {
        ChatRecord::assistant(content, AssistantResponse::error(classification))
    }

    /// Strip reference material off the history for the wire.
    fn strip_history(history: &[ChatRecord]) -> Vec<WireMessage> {
        history.iter().map(WireMessage::from).collect()
    }

    /// The user question followed by every definition then every section,
    /// numbered "Extract 1:", "Extract 2:", ... contiguously across both.
    pub fn format_user_question(question: &str, material: &ReferenceMaterial) -> String {
        let mut user_content = format!("Question: {question}\n\n");
        let mut counter = 1;
        for definition in &material.definitions {
            user_content.push_str(&format!("Extract {counter}:\n{}\n", definition.definition));
            counter += 1;
        }
        for section in &material.sections {
            user_content.push_str(&format!("Extract {counter}:\n{}\n", section.regulation_text));
            counter += 1;
        }
        user_content
    }

    /// System prompt enumerating the response options.
    ///
    /// `number_of_options` is 3 (answer, request a section, none) or 2
    /// (answer, none), the latter used when a requested section was already
    /// on hand and the model must now commit. Any other value is forced back
    /// to 3. The `review` variant re-prompts after a malformed reply.
    pub fn create_system_message(&self, number_of_options: usize, review: bool) -> String {
        let mut instruction = if review {
            format!(
                "Please review your answer. You were asked to assist the user by responding to \
                 their question in 1 of {number_of_options} ways but your response does not \
                 follow the expected format. Please reformat your response so that it follows \
                 the requested format.\n"
            )
        } else {
            format!(
                "You are answering questions about {} for {} based only on the reference \
                 extracts provided. You have {number_of_options} options:\n",
                self.index.corpus_description(),
                self.index.user_type()
            )
        };

        let corpus = self.index.corpus();
        let sample_reference = if corpus.primary_document().is_empty() {
            "[Insert Reference Value Here]".to_string()
        } else {
            corpus
                .get_document(corpus.primary_document())
                .map(|doc| doc.reference_checker().pattern_description().to_string())
                .unwrap_or_else(|| "[Insert Reference Value Here]".to_string())
        };

        let option_answer = format!(
            "Answer the question. Preface an answer with the tag '{ANSWER_PREFIX}'. All \
             referenced extracts must be quoted at the end of the answer, not in the body, by \
             number, in a comma separated list starting after the keyword '{REFERENCE_KEYWORD}'. \
             Do not include the word Extract, only provide the number(s).\n"
        );
        let option_section = format!(
            "Request additional documentation. If, in the body of the extract(s) provided, there \
             is a reference to another section that is directly relevant and not already \
             provided, respond with the word '{SECTION_PREFIX}' followed by 'Extract \
             extract_number, {REFERENCE_KEYWORD} section_reference' - for example SECTION: \
             Extract 1, {REFERENCE_KEYWORD} {sample_reference}.\n"
        );
        let option_none = format!("State '{NONE_PREFIX}' and nothing else in all other cases\n");

        match number_of_options {
            2 => instruction.push_str(&format!("1) {option_answer}2) {option_none}")),
            3 => instruction.push_str(&format!(
                "1) {option_answer}2) {option_section}3) {option_none}"
            )),
            other => {
                tracing::debug!(
                    target: "dev",
                    requested = other,
                    "forcing the number of options in the system message to be 3"
                );
                instruction.push_str(&format!(
                    "1) {option_answer}2) {option_section}3) {option_none}"
                ));
            },
        }
        instruction
    }

    /// One pass of the LLM over the history plus the formatted question.
    async fn resource_augmented_query(
        &mut self,
        history: &[ChatRecord],
        question: &str,
        material: &ReferenceMaterial,
        number_of_options: usize,
    ) -> Result<String, corpus_chat_llm::LlmError> {
        self.track("PathRag.resource_augmented_query");

        let system_content = self.create_system_message(number_of_options, false);
        tracing::debug!(target: "dev", system = %system_content, "resource_augmented_query system prompt");

        let user_question = Self::format_user_question(question, material);
        tracing::debug!(target: "dev", user = %user_question, "resource_augmented_query user prompt");

        let mut messages = Self::strip_history(history);
        messages.push(WireMessage::user(user_question));

        self.chat
            .respond(
                self.llm.as_ref(),
                Some(&WireMessage::system(system_content)),
                &messages,
            )
            .await
    }

    /// Validate one LLM reply against the reference material.
    pub fn check_response(
        &mut self,
        llm_text: &str,
        material: &ReferenceMaterial,
    ) -> CheckedResponse {
        self.track("PathRag.check_response");
        let extract_count = material.extract_count();

        if let Some(rest) = llm_text.strip_prefix(ANSWER_PREFIX) {
            return self.check_answer(llm_text, rest.trim(), material, extract_count);
        }

        if let Some(rest) = llm_text.strip_prefix(SECTION_PREFIX) {
            return self.check_section_request(llm_text, rest.trim(), material, extract_count);
        }

        if llm_text.starts_with(NONE_PREFIX) {
            return CheckedResponse::Final(ChatRecord::assistant(
                "The system was not able to answer the question using the provided documents",
                AssistantResponse::no_answer(NoAnswerClassification::NoRelevantData),
            ));
        }

        CheckedResponse::Followup {
            content: llm_text.to_string(),
            instruction: format!(
                "Your response, did not begin with one of the keywords, '{ANSWER_PREFIX}', \
                 '{SECTION_PREFIX}' or '{NONE_PREFIX}'. Please review the question and provide \
                 an answer in the required format. Also make sure the referenced extracts are \
                 quoted at the end of the answer, not in the body, by number, in a comma \
                 separated list starting after the keyword '{REFERENCE_KEYWORD}'. Do not include \
                 the word Extract, only provide the number(s).\n"
            ),
        }
    }

    fn check_answer(
        &mut self,
        full_text: &str,
        answer_body: &str,
        material: &ReferenceMaterial,
        extract_count: usize,
    ) -> CheckedResponse {
        // The citation list must appear exactly once, at the end, or the
        // filtered reference table will not line up with the prose.
        let keyword_count = answer_body.matches(REFERENCE_KEYWORD).count();
        if keyword_count > 1 {
            return CheckedResponse::Followup {
                content: full_text.to_string(),
                instruction: format!(
                    "When answering the question, you used the keyword '{REFERENCE_KEYWORD}' \
                     more than once. It is vitally important that this keyword is only used once \
                     in your answer and then only at the end of the answer followed only by an \
                     integer, comma separated list of the extracts used. Please reformat your \
                     response so that there is only one instance of the keyword \
                     '{REFERENCE_KEYWORD}' and it is at the end of the answer."
                ),
            };
        }

        let (answer_text, cleaned_references): (String, Vec<String>) =
            match answer_body.rfind(REFERENCE_KEYWORD) {
                Some(position) => {
                    let tail = &answer_body[position + REFERENCE_KEYWORD.len()..];
                    let references = tail
                        .split(',')
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty())
                        .collect();
                    (answer_body[..position].trim().to_string(), references)
                },
                None => (answer_body.to_string(), Vec::new()),
            };

        // No citations at all is within the instructions; the answer goes out
        // caveated instead of referenced.
        if cleaned_references.is_empty() {
            let response = AssistantResponse::AnswerWithoutRag {
                answer: answer_text,
                caveat: no_rag_caveat().to_string(),
            };
            return CheckedResponse::Final(ChatRecord::assistant(
                response.chat_content(),
                response,
            ));
        }

        let mut references_as_integers: Vec<usize> = Vec::new();
        for item in &cleaned_references {
            let parsed = match item.parse::<i64>() {
                Ok(value) => value,
                Err(_) => match FIRST_INTEGER
                    .find(item)
                    .and_then(|m| m.as_str().parse::<i64>().ok())
                {
                    Some(value) => value,
                    None => {
                        return CheckedResponse::Followup {
                            content: full_text.to_string(),
                            instruction: "When answering the question, you have made reference \
                                          to an extract but I am unable to extract the number \
                                          from your reference. Please re-write your answer using \
                                          integer extract number(s)"
                                .to_string(),
                        };
                    },
                },
            };
            if parsed < 1 || parsed > extract_count as i64 {
                return CheckedResponse::Followup {
                    content: full_text.to_string(),
                    instruction: "When answering the question, you made reference to an extract \
                                  number that was not provided. Please re-write your answer and \
                                  only refer to the extracts provided by their number"
                        .to_string(),
                };
            }
            references_as_integers.push(parsed as usize);
        }

        let used_references = self.extract_used_references(&references_as_integers, material);
        let response = AssistantResponse::AnswerWithRag {
            answer: answer_text,
            references: used_references,
        };
        CheckedResponse::Final(ChatRecord::assistant(response.chat_content(), response))
    }

    fn check_section_request(
        &mut self,
        full_text: &str,
        request: &str,
        material: &ReferenceMaterial,
        extract_count: usize,
    ) -> CheckedResponse {
        let Some(captures) = SECTION_REQUEST.captures(request) else {
            return CheckedResponse::Followup {
                content: full_text.to_string(),
                instruction: r#"When requesting an additional section, you did not use the format "Extract (\d+), Reference (.+)" or you included additional text. Please re-write your response using this format"#
                    .to_string(),
            };
        };

        let out_of_range = CheckedResponse::Followup {
            content: full_text.to_string(),
            instruction: "When requesting an additional section, you have made reference to an \
                          extract number that was not provided. Please re-write your answer and \
                          use a valid extract number"
                .to_string(),
        };
        let Ok(extract_number) = captures[1].parse::<usize>() else {
            return out_of_range;
        };
        if extract_number < 1 || extract_number > extract_count {
            return out_of_range;
        }

        let document_key = if extract_number <= material.definitions.len() {
            material.definitions[extract_number - 1].document.clone()
        } else {
            material.sections[extract_number - material.definitions.len() - 1]
                .document
                .clone()
        };
        let section_reference = captures[2].trim();

        let corpus = self.index.corpus();
        let mut document_index = String::new();
        if let Some(doc) = corpus.get_document(&document_key) {
            document_index = doc.reference_checker().pattern_description().to_string();
            if doc.reference_checker().is_valid(section_reference) {
                if let Some(extracted) = doc
                    .reference_checker()
                    .extract_valid_reference(section_reference)
                {
                    return CheckedResponse::Section {
                        extract: extract_number,
                        document: document_key,
                        section: extracted,
                    };
                }
            } else if !corpus.primary_document().is_empty()
                && document_key != corpus.primary_document()
            {
                // Sections in other documents routinely cite the primary
                // document, so its grammar is accepted as a fallback.
                if let Some(primary_doc) = corpus.get_document(corpus.primary_document()) {
                    if primary_doc.reference_checker().is_valid(section_reference) {
                        if let Some(extracted) = primary_doc
                            .reference_checker()
                            .extract_valid_reference(section_reference)
                        {
                            return CheckedResponse::Section {
                                extract: extract_number,
                                document: corpus.primary_document().to_string(),
                                section: extracted,
                            };
                        }
                    }
                    let primary_description =
                        primary_doc.reference_checker().pattern_description();
                    if document_index.is_empty() {
                        document_index = primary_description.to_string();
                    } else {
                        document_index = format!("{document_index}, or {primary_description}");
                    }
                }
            }
        }

        CheckedResponse::Followup {
            content: full_text.to_string(),
            instruction: format!(
                "The reference {section_reference} does not appear to be a valid reference for \
                 the document. Try using the format {document_index}"
            ),
        }
    }

    /// The provenance table for the cited extracts, in citation order.
    /// Section citations are re-materialized with full markdown, headings and
    /// children; definition text is preserved as provided.
    fn extract_used_references(
        &mut self,
        references: &[usize],
        material: &ReferenceMaterial,
    ) -> Vec<UsedReference> {
        self.track("PathRag.extract_used_references");
        let corpus = self.index.corpus();
        let number_of_definitions = material.definitions.len();

        let mut used = Vec::with_capacity(references.len());
        for &reference in references {
            if reference <= number_of_definitions {
                let row = &material.definitions[reference - 1];
                let document_name = corpus
                    .get_document(&row.document)
                    .map(|d| d.name().to_string())
                    .unwrap_or_else(|| row.document.clone());
                used.push(UsedReference {
                    document_key: row.document.clone(),
                    document_name,
                    section_reference: row.section_reference.clone(),
                    is_definition: true,
                    text: row.definition.clone(),
                });
            } else {
                let row = &material.sections[reference - number_of_definitions - 1];
                let document_name = corpus
                    .get_document(&row.document)
                    .map(|d| d.name().to_string())
                    .unwrap_or_else(|| row.document.clone());
                let text = corpus
                    .get_text(&row.document, &row.section_reference, &TextOptions::default())
                    .and_then(|result| result.ok())
                    .unwrap_or_else(|| row.regulation_text.clone());
                used.push(UsedReference {
                    document_key: row.document.clone(),
                    document_name,
                    section_reference: row.section_reference.clone(),
                    is_definition: false,
                    text,
                });
            }
        }
        used
    }

    /// Fetch the requested section and append it to the material.
    ///
    /// The request collapses to `AlreadyPresent` when the section or any
    /// ancestor is already among the candidate sections of that document.
    fn add_section_to_resource(
        &mut self,
        document_key: &str,
        section: &str,
        material: &ReferenceMaterial,
    ) -> SectionAddition {
        self.track("PathRag.add_section_to_resource");

        let Some(doc) = self.index.corpus().get_document(document_key) else {
            tracing::debug!(target: "dev", document = document_key, "unknown document in section request");
            return SectionAddition::Failed;
        };
        let Some(section_to_add) = doc.reference_checker().extract_valid_reference(section) else {
            tracing::debug!(
                target: "dev",
                section,
                "could not extract a valid reference from the requested section"
            );
            return SectionAddition::Failed;
        };

        let existing: Vec<String> = material
            .sections
            .iter()
            .filter(|s| s.document == document_key)
            .map(|s| s.section_reference.clone())
            .collect();
        if doc
            .reference_checker()
            .any_ancestor_in(&section_to_add, &existing)
        {
            tracing::debug!(
                target: "dev",
                section = %section_to_add,
                "requested section or an ancestor is already among the candidates"
            );
            return SectionAddition::AlreadyPresent;
        }

        let text_to_add = match doc.get_text(&section_to_add, &TextOptions::default()) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(
                    target: "dev",
                    section = %section_to_add,
                    error = %e,
                    "retrieving the requested section failed"
                );
                return SectionAddition::Failed;
            },
        };
        if text_to_add.is_empty() {
            tracing::debug!(
                target: "dev",
                section = %section_to_add,
                "the requested section has no text, is it a valid reference"
            );
            return SectionAddition::Failed;
        }

        let mut updated = material.clone();
        // Keep everything already on hand; the context window is long enough.
        updated.sections.push(SectionHit {
            document: document_key.to_string(),
            section_reference: section_to_add,
            source: "requested".to_string(),
            text: String::new(),
            cosine_distance: 1.0,
            token_count: num_tokens_from_string(&text_to_add),
            regulation_text: text_to_add,
            count: 1,
        });
        SectionAddition::Added(updated)
    }

    /// The full RAG path for one user turn.
    pub async fn perform_rag_path(
        &mut self,
        history: &[ChatRecord],
        question: &str,
        material: ReferenceMaterial,
    ) -> PathRagOutcome {
        self.track("PathRag.perform_rag_path");

        if material.is_empty() {
            tracing::debug!(target: "dev", "perform_rag_path called with no reference material");
            let response = AssistantResponse::no_answer(NoAnswerClassification::NoData);
            return PathRagOutcome {
                record: ChatRecord::assistant(response.chat_content(), response),
                material,
            };
        }

        let llm_text = match self
            .resource_augmented_query(history, question, &material, 3)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "chat call failed during the RAG path");
                return PathRagOutcome {
                    record: Self::error_record(
                        ErrorClassification::NotFollowingInstructions,
                        ErrorClassification::NotFollowingInstructions.message(),
                    ),
                    material,
                };
            },
        };

        match self.check_response(&llm_text, &material) {
            CheckedResponse::Final(record) => PathRagOutcome { record, material },
            CheckedResponse::Followup { content, instruction } => {
                self.handle_followup(history, question, material, content, instruction)
                    .await
            },
            CheckedResponse::Section {
                extract,
                document,
                section,
            } => {
                self.handle_section_request(history, question, material, extract, document, section)
                    .await
            },
        }
    }

    /// One more chance: replay the invalid reply with a specific instruction.
    async fn handle_followup(
        &mut self,
        history: &[ChatRecord],
        question: &str,
        material: ReferenceMaterial,
        invalid_content: String,
        instruction: String,
    ) -> PathRagOutcome {
        self.track("PathRag.process_llm_response");

        let mut messages = Self::strip_history(history);
        messages.push(WireMessage::user(question));
        messages.push(WireMessage::assistant(invalid_content));
        messages.push(WireMessage::user(instruction));

        let response = match self.chat.respond(self.llm.as_ref(), None, &messages).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "follow-up chat call failed");
                return PathRagOutcome {
                    record: Self::error_record(
                        ErrorClassification::NotFollowingInstructions,
                        ErrorClassification::NotFollowingInstructions.message(),
                    ),
                    material,
                };
            },
        };

        match self.check_response(&response, &material) {
            CheckedResponse::Final(record) => PathRagOutcome { record, material },
            // Two invalid replies in a row; no further retries.
            _ => PathRagOutcome {
                record: Self::error_record(ErrorClassification::NotFollowingInstructions, response),
                material,
            },
        }
    }

    /// Grant a section request and re-query over the augmented material.
    async fn handle_section_request(
        &mut self,
        history: &[ChatRecord],
        question: &str,
        material: ReferenceMaterial,
        extract: usize,
        document: String,
        section: String,
    ) -> PathRagOutcome {
        self.track("PathRag.process_llm_response");

        let (updated_material, number_of_options) =
            match self.add_section_to_resource(&document, &section, &material) {
                SectionAddition::Added(updated) => (updated, 3),
                // The model asked for something it already has: force it to
                // commit to ANSWER or NONE on the unchanged material.
                SectionAddition::AlreadyPresent => (material.clone(), 2),
                SectionAddition::Failed => {
                    return PathRagOutcome {
                        record: Self::error_record(
                            ErrorClassification::CallForMoreDocumentsFailed,
                            format!(
                                "The section requested was: {extract} from {document} with \
                                 reference {section}"
                            ),
                        ),
                        material,
                    };
                },
            };

        let response = match self
            .resource_augmented_query(history, question, &updated_material, number_of_options)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "chat call failed after granting the section request");
                return PathRagOutcome {
                    record: Self::error_record(
                        ErrorClassification::NotFollowingInstructions,
                        ErrorClassification::NotFollowingInstructions.message(),
                    ),
                    material: updated_material,
                };
            },
        };

        match self.check_response(&response, &updated_material) {
            CheckedResponse::Final(record) => PathRagOutcome {
                record,
                material: updated_material,
            },
            // Even with the requested section on hand the reply is invalid.
            _ => PathRagOutcome {
                record: Self::error_record(ErrorClassification::NotFollowingInstructions, response),
                material: updated_material,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use corpus_chat_config::RagSettings;
    use corpus_chat_core::{Definition, DefinitionHit, SectionEntry};
    use corpus_chat_corpus::{
        Corpus, DocumentRow, StandardDocument, StandardReferenceChecker,
    };
    use corpus_chat_index::InMemoryCorpusIndex;
    use corpus_chat_llm::{ChatRequest, LlmError};

    struct NeverCalledLlm;

    #[async_trait]
    impl LlmClient for NeverCalledLlm {
        async fn chat(&self, _request: ChatRequest) -> Result<String, LlmError> {
            panic!("the validator must not call the LLM");
        }

        async fn embed(
            &self,
            _model: &str,
            _input: &str,
            _dimensions: Option<u32>,
        ) -> Result<Vec<f32>, LlmError> {
            panic!("the validator must not call the LLM");
        }
    }

    fn checker() -> Arc<StandardReferenceChecker> {
        Arc::new(
            StandardReferenceChecker::new(&[r"^[1-9]", r"^\.[1-9]"], r"[1-9](.[1-9])?", &[])
                .unwrap(),
        )
    }

    fn letters_checker() -> Arc<StandardReferenceChecker> {
        Arc::new(
            StandardReferenceChecker::new(&[r"^[A-Z]\.\d{0,2}", r"^\([a-z]\)"], r"A.1(a)", &[])
                .unwrap(),
        )
    }

    fn corpus() -> Corpus {
        let manual = StandardDocument::new(
            "Site Manual",
            checker(),
            vec![
                DocumentRow::heading("1", "Gates"),
                DocumentRow::body("1", "The site has two gates."),
                DocumentRow::heading("1.1", "West Gate"),
                DocumentRow::body("1.1", "Use the West Gate for deliveries."),
                DocumentRow::heading("2", "Visitors"),
                DocumentRow::body("2", "Visitors must sign in."),
                DocumentRow::heading("3", "Parking"),
                DocumentRow::body("3", "Park in the marked bays."),
            ],
        )
        .unwrap();
        let annexe = StandardDocument::new(
            "Annexe",
            letters_checker(),
            vec![
                DocumentRow::heading("A.1", "Supplementary rules"),
                DocumentRow::body("A.1", "See the Site Manual for gate rules."),
            ],
        )
        .unwrap();
        Corpus::new()
            .with_document("manual", Arc::new(manual))
            .with_document("annexe", Arc::new(annexe))
            .with_primary_document("manual")
            .unwrap()
    }

    fn path_rag() -> PathRag {
        let index = InMemoryCorpusIndex::new(
            "a site user",
            "the site manual",
            corpus(),
            Vec::<Definition>::new(),
            Vec::<SectionEntry>::new(),
            Vec::new(),
            RagSettings::default(),
        );
        PathRag::new(
            Arc::new(index),
            Arc::new(NeverCalledLlm),
            ChatParameters::new("test-model"),
        )
    }

    fn section_hit(document: &str, reference: &str, text: &str) -> SectionHit {
        SectionHit {
            document: document.to_string(),
            section_reference: reference.to_string(),
            source: "summary".to_string(),
            text: text.to_string(),
            cosine_distance: 0.1,
            regulation_text: text.to_string(),
            token_count: 10,
            count: 1,
        }
    }

    fn definition_hit(document: &str, definition: &str) -> DefinitionHit {
        DefinitionHit {
            document: document.to_string(),
            section_reference: String::new(),
            text: definition.to_string(),
            definition: definition.to_string(),
            cosine_distance: 0.1,
        }
    }

    fn material() -> ReferenceMaterial {
        ReferenceMaterial::new(
            vec![definition_hit("manual", "Gate: an entrance to the site.")],
            vec![
                section_hit("manual", "2", "Visitors must sign in."),
                section_hit("manual", "3", "Park in the marked bays."),
            ],
        )
    }

    #[test]
    fn test_format_user_question_numbers_across_both_tables() {
        let formatted = PathRag::format_user_question("How do I get in?", &material());
        assert!(formatted.starts_with("Question: How do I get in?\n\n"));
        assert!(formatted.contains("Extract 1:\nGate: an entrance to the site.\n"));
        assert!(formatted.contains("Extract 2:\nVisitors must sign in.\n"));
        assert!(formatted.contains("Extract 3:\nPark in the marked bays.\n"));
    }

    #[test]
    fn test_system_message_options() {
        let rag = path_rag();
        let three = rag.create_system_message(3, false);
        assert!(three.contains("You have 3 options"));
        assert!(three.contains("SECTION:"));
        let two = rag.create_system_message(2, false);
        assert!(two.contains("You have 2 options"));
        assert!(!two.contains("Request additional documentation"));
        // The primary document's grammar is the sample reference.
        assert!(three.contains("[1-9](.[1-9])?"));
        let review = rag.create_system_message(3, true);
        assert!(review.starts_with("Please review your answer."));
        // Anything else is forced back to three options.
        let forced = rag.create_system_message(7, false);
        assert!(forced.contains("SECTION:"));
    }

    #[test]
    fn test_answer_with_valid_references() {
        let mut rag = path_rag();
        let checked =
            rag.check_response("ANSWER: Sign in at reception. Reference: 2", &material());
        let CheckedResponse::Final(record) = checked else {
            panic!("expected a final record");
        };
        let Some(AssistantResponse::AnswerWithRag { answer, references }) =
            record.assistant_response
        else {
            panic!("expected an answer with references");
        };
        assert_eq!(answer, "Sign in at reception.");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].document_key, "manual");
        assert_eq!(references[0].section_reference, "2");
        assert!(!references[0].is_definition);
        // Full-text lookup, not the index snippet: markdown heading included.
        assert!(references[0].text.contains("# 2 Visitors"));
    }

    #[test]
    fn test_answer_citing_a_definition() {
        let mut rag = path_rag();
        let checked = rag.check_response("ANSWER: Through a gate. Reference: 1", &material());
        let CheckedResponse::Final(record) = checked else {
            panic!("expected a final record");
        };
        let Some(AssistantResponse::AnswerWithRag { references, .. }) = record.assistant_response
        else {
            panic!("expected an answer with references");
        };
        assert!(references[0].is_definition);
        assert_eq!(references[0].text, "Gate: an entrance to the site.");
        assert_eq!(references[0].document_name, "Site Manual");
    }

    #[test]
    fn test_answer_without_references_is_caveated() {
        let mut rag = path_rag();
        for reply in ["ANSWER: I believe so.", "ANSWER: I believe so. Reference: "] {
            let checked = rag.check_response(reply, &material());
            let CheckedResponse::Final(record) = checked else {
                panic!("expected a final record");
            };
            let Some(AssistantResponse::AnswerWithoutRag { answer, caveat }) =
                record.assistant_response
            else {
                panic!("expected a caveated answer");
            };
            assert_eq!(answer, "I believe so.");
            assert_eq!(caveat, no_rag_caveat());
        }
    }

    #[test]
    fn test_answer_with_multiple_reference_keywords() {
        let mut rag = path_rag();
        let checked = rag.check_response(
            "ANSWER: Reference: 1 says so. Reference: 2",
            &material(),
        );
        let CheckedResponse::Followup { instruction, .. } = checked else {
            panic!("expected a follow-up");
        };
        assert!(instruction.contains("more than once"));
    }

    #[test]
    fn test_answer_with_out_of_range_references() {
        let mut rag = path_rag();
        for reply in [
            "ANSWER: Done. Reference: 9",
            "ANSWER: Done. Reference: 0",
            "ANSWER: Done. Reference: -2",
        ] {
            let checked = rag.check_response(reply, &material());
            let CheckedResponse::Followup { instruction, .. } = checked else {
                panic!("expected a follow-up for {reply}");
            };
            assert!(instruction.contains("not provided"), "for {reply}");
        }
    }

    #[test]
    fn test_answer_with_malformed_reference_items() {
        let mut rag = path_rag();
        // A digit buried in the item is recovered.
        let checked = rag.check_response("ANSWER: Done. Reference: Extract 2", &material());
        assert!(matches!(checked, CheckedResponse::Final(_)));

        // No digit at all is a follow-up.
        let checked = rag.check_response("ANSWER: Done. Reference: two", &material());
        let CheckedResponse::Followup { instruction, .. } = checked else {
            panic!("expected a follow-up");
        };
        assert!(instruction.contains("unable to extract the number"));
    }

    #[test]
    fn test_none_reply() {
        let mut rag = path_rag();
        let checked = rag.check_response("NONE:", &material());
        let CheckedResponse::Final(record) = checked else {
            panic!("expected a final record");
        };
        assert!(record
            .assistant_response
            .unwrap()
            .is_no_answer(NoAnswerClassification::NoRelevantData));
    }

    #[test]
    fn test_unknown_prefix() {
        let mut rag = path_rag();
        let checked = rag.check_response("Sure! The answer is the gate.", &material());
        let CheckedResponse::Followup { instruction, .. } = checked else {
            panic!("expected a follow-up");
        };
        assert!(instruction.contains("did not begin with one of the keywords"));
    }

    #[test]
    fn test_section_request_well_formed() {
        let mut rag = path_rag();
        let checked = rag.check_response("SECTION: Extract 2, Reference 1.1", &material());
        let CheckedResponse::Section {
            extract,
            document,
            section,
        } = checked
        else {
            panic!("expected a section request");
        };
        assert_eq!(extract, 2);
        assert_eq!(document, "manual");
        assert_eq!(section, "1.1");
    }

    #[test]
    fn test_section_request_tolerates_case_and_colons() {
        let mut rag = path_rag();
        let checked = rag.check_response("SECTION: extract: 3, reference: 1.1", &material());
        assert!(matches!(checked, CheckedResponse::Section { .. }));
    }

    #[test]
    fn test_section_request_bad_format() {
        let mut rag = path_rag();
        let checked = rag.check_response("SECTION: please send section 1.1", &material());
        let CheckedResponse::Followup { instruction, .. } = checked else {
            panic!("expected a follow-up");
        };
        assert!(instruction.contains("did not use the format"));
    }

    #[test]
    fn test_section_request_out_of_range_extract() {
        let mut rag = path_rag();
        let checked = rag.check_response("SECTION: Extract 9, Reference 1.1", &material());
        let CheckedResponse::Followup { instruction, .. } = checked else {
            panic!("expected a follow-up");
        };
        assert!(instruction.contains("valid extract number"));
    }

    #[test]
    fn test_section_request_invalid_reference_names_the_format() {
        let mut rag = path_rag();
        let checked = rag.check_response("SECTION: Extract 2, Reference X9", &material());
        let CheckedResponse::Followup { instruction, .. } = checked else {
            panic!("expected a follow-up");
        };
        assert!(instruction.contains("does not appear to be a valid reference"));
        assert!(instruction.contains("[1-9](.[1-9])?"));
    }

    #[test]
    fn test_section_request_falls_back_to_the_primary_document() {
        let mut rag = path_rag();
        // The extract comes from the annexe, but the reference follows the
        // primary document's grammar.
        let annexe_material = ReferenceMaterial::new(
            Vec::new(),
            vec![section_hit("annexe", "A.1", "See the Site Manual for gate rules.")],
        );
        let checked = rag.check_response("SECTION: Extract 1, Reference 1.1", &annexe_material);
        let CheckedResponse::Section { document, section, .. } = checked else {
            panic!("expected a section request");
        };
        assert_eq!(document, "manual");
        assert_eq!(section, "1.1");

        // Invalid in both grammars: the follow-up quotes both formats.
        let checked = rag.check_response("SECTION: Extract 1, Reference ???", &annexe_material);
        let CheckedResponse::Followup { instruction, .. } = checked else {
            panic!("expected a follow-up");
        };
        assert!(instruction.contains("A.1(a)"));
        assert!(instruction.contains(", or "));
        assert!(instruction.contains("[1-9](.[1-9])?"));
    }

    #[test]
    fn test_add_section_appends_last() {
        let mut rag = path_rag();
        let material = material();
        let SectionAddition::Added(updated) =
            rag.add_section_to_resource("manual", "1.1", &material)
        else {
            panic!("expected the section to be added");
        };
        assert_eq!(updated.sections.len(), 3);
        let added = updated.sections.last().unwrap();
        assert_eq!(added.section_reference, "1.1");
        assert!(added.regulation_text.contains("West Gate"));
        // The existing candidates are all kept.
        assert_eq!(updated.sections[0].section_reference, "2");
        assert_eq!(updated.sections[1].section_reference, "3");
    }

    #[test]
    fn test_add_section_collapses_duplicates_via_ancestors() {
        let mut rag = path_rag();
        let mut with_parent = material();
        with_parent
            .sections
            .push(section_hit("manual", "1", "The site has two gates."));
        assert!(matches!(
            rag.add_section_to_resource("manual", "1.1", &with_parent),
            SectionAddition::AlreadyPresent
        ));
        assert!(matches!(
            rag.add_section_to_resource("manual", "2", &with_parent),
            SectionAddition::AlreadyPresent
        ));
    }

    #[test]
    fn test_add_section_failures() {
        let mut rag = path_rag();
        let material = material();
        // No extractable reference.
        assert!(matches!(
            rag.add_section_to_resource("manual", "???", &material),
            SectionAddition::Failed
        ));
        // Valid reference with no rows behind it.
        assert!(matches!(
            rag.add_section_to_resource("manual", "9", &material),
            SectionAddition::Failed
        ));
        // Unknown document.
        assert!(matches!(
            rag.add_section_to_resource("ghost", "1", &material),
            SectionAddition::Failed
        ));
    }

    #[tokio::test]
    async fn test_perform_rag_path_with_empty_material() {
        let mut rag = path_rag();
        let outcome = rag
            .perform_rag_path(&[], "anything", ReferenceMaterial::default())
            .await;
        assert!(outcome
            .record
            .assistant_response
            .unwrap()
            .is_no_answer(NoAnswerClassification::NoData));
    }
}
