//! End-to-end session scenarios driven by a scripted LLM client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use corpus_chat_config::{EmbeddingSettings, RagSettings};
use corpus_chat_core::{
    AssistantResponse, ChatRecord, Definition, ErrorClassification, NoAnswerClassification,
    SectionEntry, WorkflowTrigger,
};
use corpus_chat_corpus::{Corpus, DocumentRow, StandardDocument, StandardReferenceChecker};
use corpus_chat_engine::{CorpusChat, SessionState, WorkflowHandler};
use corpus_chat_index::InMemoryCorpusIndex;
use corpus_chat_llm::{ChatParameters, ChatRequest, LlmClient, LlmError};

/// Replies come off a queue; every chat request is recorded for inspection.
/// Embeddings are fixed so retrieval is controlled by the index rows.
struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Api("no scripted reply left".to_string()))
    }

    async fn embed(
        &self,
        _model: &str,
        _input: &str,
        _dimensions: Option<u32>,
    ) -> Result<Vec<f32>, LlmError> {
        Ok(vec![1.0, 0.0])
    }
}

fn manual() -> Arc<StandardDocument> {
    let checker = Arc::new(
        StandardReferenceChecker::new(&[r"^[1-9]", r"^\.[1-9]"], r"[1-9](.[1-9])?", &[]).unwrap(),
    );
    Arc::new(
        StandardDocument::new(
            "Site Manual",
            checker,
            vec![
                DocumentRow::heading("1", "Gates"),
                DocumentRow::body("1", "The site has two gates."),
                DocumentRow::heading("1.1", "West Gate"),
                DocumentRow::body("1.1", "Deliveries drive via the West Gate."),
                DocumentRow::heading("2", "Visitors"),
                DocumentRow::body("2", "Visitors must sign in at reception."),
                DocumentRow::heading("3", "Parking"),
                DocumentRow::body("3", "Park in the marked bays only."),
            ],
        )
        .unwrap(),
    )
}

fn section_entry(reference: &str, text: &str, embedding: Vec<f32>) -> SectionEntry {
    SectionEntry {
        document: "manual".to_string(),
        section_reference: reference.to_string(),
        source: "summary".to_string(),
        text: text.to_string(),
        embedding,
    }
}

/// Two section candidates ("2" closest, then "3") and no definitions.
fn near_sections() -> Vec<SectionEntry> {
    vec![
        section_entry("2", "how visitors get in", vec![1.0, 0.05]),
        section_entry("3", "where to park", vec![1.0, 0.15]),
    ]
}

/// Candidates the fixed query embedding never reaches.
fn far_sections() -> Vec<SectionEntry> {
    vec![section_entry("2", "how visitors get in", vec![0.0, 1.0])]
}

fn build_chat(
    llm: Arc<ScriptedLlm>,
    sections: Vec<SectionEntry>,
    workflows: Vec<WorkflowTrigger>,
    strict_rag: bool,
) -> CorpusChat {
    let corpus = Corpus::new()
        .with_document("manual", manual())
        .with_primary_document("manual")
        .unwrap();
    let rag = RagSettings {
        strict_rag,
        ..Default::default()
    };
    let index = InMemoryCorpusIndex::new(
        "a site user",
        "the site manual",
        corpus,
        Vec::<Definition>::new(),
        sections,
        workflows,
        rag.clone(),
    );
    CorpusChat::new(
        Arc::new(index),
        llm,
        ChatParameters::new("test-model"),
        EmbeddingSettings::default(),
        rag,
    )
    .unwrap()
    .with_user_id("scenario_user")
}

fn classification(record: &ChatRecord) -> &AssistantResponse {
    record.assistant_response.as_ref().expect("assistant record")
}

#[tokio::test]
async fn empty_input_parks_the_session() {
    let llm = ScriptedLlm::new(&[]);
    let mut chat = build_chat(Arc::clone(&llm), near_sections(), Vec::new(), true);

    let record = chat.user_provides_input(None).await.unwrap();
    assert!(matches!(
        classification(&record),
        AssistantResponse::Error {
            classification: ErrorClassification::Error
        }
    ));
    assert_eq!(chat.state(), SessionState::Stuck);

    // Any further input reports the stuck state and stays there; the
    // duplicate record is not appended twice.
    let record = chat.user_provides_input(Some("hello?")).await.unwrap();
    assert!(matches!(
        classification(&record),
        AssistantResponse::Error {
            classification: ErrorClassification::Stuck
        }
    ));
    assert_eq!(chat.state(), SessionState::Stuck);
    assert_eq!(chat.messages().len(), 1);

    // Whitespace-only input is treated the same as missing input.
    let llm = ScriptedLlm::new(&[]);
    let mut chat = build_chat(llm, near_sections(), Vec::new(), true);
    chat.user_provides_input(Some("   ")).await.unwrap();
    assert_eq!(chat.state(), SessionState::Stuck);
}

#[tokio::test]
async fn strict_rag_with_no_hits_reports_no_data() {
    let llm = ScriptedLlm::new(&[]);
    let mut chat = build_chat(Arc::clone(&llm), far_sections(), Vec::new(), true);

    let record = chat.user_provides_input(Some("Hi")).await.unwrap();
    assert!(classification(&record).is_no_answer(NoAnswerClassification::NoData));
    assert_eq!(chat.state(), SessionState::Rag);
    assert_eq!(chat.messages().len(), 2);
    assert!(llm.requests().is_empty()); // no LLM call under strict RAG
    assert!(chat
        .execution_path()
        .iter()
        .any(|s| s.contains("Strict RAG")));
}

#[tokio::test]
async fn permissive_rag_with_no_hits_runs_the_relevance_gate() {
    let llm = ScriptedLlm::new(&["Not Relevant. Off topic."]);
    let mut chat = build_chat(Arc::clone(&llm), far_sections(), Vec::new(), false);

    let record = chat.user_provides_input(Some("Hi")).await.unwrap();
    let AssistantResponse::NoAnswer {
        classification,
        additional_text,
    } = classification(&record)
    else {
        panic!("expected a no-answer response");
    };
    assert_eq!(*classification, NoAnswerClassification::QuestionNotRelevant);
    assert_eq!(additional_text, "Off topic.");
    assert_eq!(chat.state(), SessionState::Rag);
}

#[tokio::test]
async fn answer_with_references_cites_the_extracts() {
    let llm = ScriptedLlm::new(&["ANSWER: Drive to West Gate. Reference: 2"]);
    let mut chat = build_chat(Arc::clone(&llm), near_sections(), Vec::new(), true);

    let record = chat
        .user_provides_input(Some("How do I get to the Gym?"))
        .await
        .unwrap();
    let AssistantResponse::AnswerWithRag { answer, references } = classification(&record) else {
        panic!("expected an answer with references");
    };
    assert_eq!(answer, "Drive to West Gate.");
    assert_eq!(references.len(), 1);
    // Extract 2 is the second candidate section.
    assert_eq!(references[0].section_reference, "3");
    assert_eq!(references[0].document_key, "manual");
    assert_eq!(chat.state(), SessionState::Rag);

    // The user record carries the reference material for the turn.
    let user_record = &chat.messages()[0];
    let material = user_record.reference_material.as_ref().unwrap();
    assert_eq!(material.sections.len(), 2);
    assert_eq!(material.sections[0].section_reference, "2");

    // The single call carried the system options and numbered extracts.
    let requests = llm.requests();
    assert_eq!(requests.len(), 1);
    let prompt = &requests[0].messages;
    assert!(prompt[0].content.contains("You have 3 options"));
    let user_prompt = &prompt.last().unwrap().content;
    assert!(user_prompt.contains("Question: How do I get to the Gym?"));
    assert!(user_prompt.contains("Extract 1:"));
    assert!(user_prompt.contains("Extract 2:"));
    assert_eq!(requests[0].temperature, 0.0);
}

#[tokio::test]
async fn section_request_augments_the_material() {
    let llm = ScriptedLlm::new(&[
        "SECTION: Extract 1, Reference 1.1",
        "ANSWER: Drive via West Gate. Reference: 3",
    ]);
    let mut chat = build_chat(Arc::clone(&llm), near_sections(), Vec::new(), true);

    let record = chat
        .user_provides_input(Some("How do deliveries get in?"))
        .await
        .unwrap();
    let AssistantResponse::AnswerWithRag { answer, references } = classification(&record) else {
        panic!("expected an answer with references");
    };
    assert_eq!(answer, "Drive via West Gate.");
    // Reference 3 is the newly added section, appended last.
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].section_reference, "1.1");
    assert!(references[0].text.contains("West Gate"));

    let material = chat.messages()[0].reference_material.as_ref().unwrap();
    assert_eq!(material.sections.len(), 3);
    assert_eq!(material.sections.last().unwrap().section_reference, "1.1");

    // The second call saw the augmented extract list.
    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    let second_prompt = &requests[1].messages.last().unwrap().content;
    assert!(second_prompt.contains("Extract 3:"));
    assert!(second_prompt.contains("West Gate"));
}

#[tokio::test]
async fn none_reply_is_no_relevant_data_under_strict_rag() {
    let llm = ScriptedLlm::new(&["NONE:"]);
    let mut chat = build_chat(llm, near_sections(), Vec::new(), true);

    let record = chat
        .user_provides_input(Some("What about something else?"))
        .await
        .unwrap();
    assert!(classification(&record).is_no_answer(NoAnswerClassification::NoRelevantData));
    assert_eq!(chat.state(), SessionState::Rag);
}

#[tokio::test]
async fn none_reply_falls_through_to_the_no_data_path_when_permissive() {
    let llm = ScriptedLlm::new(&["NONE:", "Relevant", "The gates close at six."]);
    let mut chat = build_chat(llm, near_sections(), Vec::new(), false);

    let record = chat
        .user_provides_input(Some("When do the gates close?"))
        .await
        .unwrap();
    let AssistantResponse::AnswerWithoutRag { answer, .. } = classification(&record) else {
        panic!("expected a caveated answer");
    };
    assert_eq!(answer, "The gates close at six.");
    // The no-data path records the plain user message.
    assert!(chat.messages()[0].reference_material.is_none());
}

#[tokio::test]
async fn two_invalid_replies_end_the_turn() {
    let llm = ScriptedLlm::new(&["I think the answer is gates.", "Still not using the tags."]);
    let mut chat = build_chat(Arc::clone(&llm), near_sections(), Vec::new(), true);

    let record = chat.user_provides_input(Some("Gates?")).await.unwrap();
    assert!(matches!(
        classification(&record),
        AssistantResponse::Error {
            classification: ErrorClassification::NotFollowingInstructions
        }
    ));
    // Not stuck: the session can continue with the next question.
    assert_eq!(chat.state(), SessionState::Rag);
    assert_eq!(llm.requests().len(), 2);
}

#[tokio::test]
async fn workflow_without_handler_parks_the_session() {
    let llm = ScriptedLlm::new(&[]);
    let workflows = vec![WorkflowTrigger {
        workflow: "site_access".to_string(),
        text: "request site access".to_string(),
        embedding: vec![1.0, 0.0], // distance 0, beats every section
    }];
    let mut chat = build_chat(llm, near_sections(), workflows, true);

    let record = chat
        .user_provides_input(Some("Please give me site access"))
        .await
        .unwrap();
    assert!(matches!(
        classification(&record),
        AssistantResponse::Error {
            classification: ErrorClassification::WorkflowNotImplemented
        }
    ));
    assert_eq!(chat.state(), SessionState::Stuck);
}

struct EchoWorkflow;

#[async_trait]
impl WorkflowHandler for EchoWorkflow {
    async fn run(&self, workflow: &str, _user_content: &str) -> ChatRecord {
        ChatRecord::assistant(
            format!("ran workflow {workflow}"),
            AssistantResponse::AnswerWithoutRag {
                answer: format!("ran workflow {workflow}"),
                caveat: "workflow".to_string(),
            },
        )
    }
}

#[tokio::test]
async fn registered_workflow_handler_runs_and_session_continues() {
    let llm = ScriptedLlm::new(&[]);
    let workflows = vec![WorkflowTrigger {
        workflow: "site_access".to_string(),
        text: "request site access".to_string(),
        embedding: vec![1.0, 0.0],
    }];
    let mut chat = build_chat(llm, near_sections(), workflows, true);
    chat.register_workflow("site_access", Arc::new(EchoWorkflow));

    let record = chat
        .user_provides_input(Some("Please give me site access"))
        .await
        .unwrap();
    assert_eq!(record.content, "ran workflow site_access");
    assert_eq!(chat.state(), SessionState::Rag);
    assert_eq!(chat.messages().len(), 2);
}

#[tokio::test]
async fn reset_is_idempotent() {
    let llm = ScriptedLlm::new(&[]);
    let mut chat = build_chat(llm, near_sections(), Vec::new(), true);
    chat.user_provides_input(None).await.unwrap();
    assert_eq!(chat.state(), SessionState::Stuck);

    chat.reset();
    assert_eq!(chat.state(), SessionState::Rag);
    assert!(chat.messages().is_empty());

    chat.reset();
    assert_eq!(chat.state(), SessionState::Rag);
    assert!(chat.messages().is_empty());
}

#[tokio::test]
async fn execution_path_records_the_steps_in_order() {
    let llm = ScriptedLlm::new(&["ANSWER: Drive to West Gate. Reference: 2"]);
    let mut chat = build_chat(llm, near_sections(), Vec::new(), true);
    chat.user_provides_input(Some("How do I get to the Gym?"))
        .await
        .unwrap();

    assert_eq!(
        chat.execution_path(),
        [
            "CorpusChat.user_provides_input",
            "PathSearch.similarity_search",
            "CorpusChat.run_base_rag_path",
            "PathRag.perform_rag_path",
            "PathRag.resource_augmented_query",
            "PathRag.check_response",
            "PathRag.extract_used_references",
        ]
    );
}

#[tokio::test]
async fn retrieved_sections_are_sorted_and_within_the_token_cap() {
    let llm = ScriptedLlm::new(&["NONE:"]);
    let mut chat = build_chat(llm, near_sections(), Vec::new(), true);
    chat.user_provides_input(Some("anything")).await.unwrap();

    let material = chat.messages()[0].reference_material.as_ref().unwrap();
    let sections = &material.sections;
    assert!(sections.windows(2).all(|w| w[0].cosine_distance <= w[1].cosine_distance));
    let total: usize = sections.iter().map(|s| s.token_count).sum();
    assert!(total <= RagSettings::default().final_token_cap || sections.len() == 1);
}
