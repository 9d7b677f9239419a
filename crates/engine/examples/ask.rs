//! Question loop over a corpus loaded from the document store.
//!
//! Expects `manual.psv`, `definitions.psv` and `sections.psv` under the
//! configured data directory (see `StoreSettings`). Run with
//! `cargo run --example ask -- [settings.toml]`; `RUST_LOG=dev=debug` shows
//! the low-level traces, `RUST_LOG=analysis=info` the audit events.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use corpus_chat_config::load_settings;
use corpus_chat_corpus::{Corpus, StandardDocument, StandardReferenceChecker};
use corpus_chat_engine::CorpusChat;
use corpus_chat_index::InMemoryCorpusIndex;
use corpus_chat_llm::{ChatParameters, OpenAiClient, OpenAiConfig};
use corpus_chat_persistence::{
    load_definitions, load_document_rows, load_sections, TextCipher,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = load_settings(settings_path.as_deref())?;

    let cipher = TextCipher::from_env(&settings.store.encryption_key_env)?;
    let data_dir = Path::new(&settings.store.data_dir);

    let checker = Arc::new(StandardReferenceChecker::new(
        &[r"^[1-9]\d{0,1}", r"^\.\d{1,2}", r"^\.\d{1,2}"],
        r"[1-9](.[1-9]){0,2}",
        &[],
    )?);
    let rows = load_document_rows(&data_dir.join("manual.psv"), cipher.as_ref())?;
    let manual = StandardDocument::new("Manual", checker, rows)?;
    let corpus = Corpus::new()
        .with_document("manual", Arc::new(manual))
        .with_primary_document("manual")?;

    let definitions = load_definitions(&data_dir.join("definitions.psv"), cipher.as_ref())?;
    let sections = load_sections(&data_dir.join("sections.psv"), cipher.as_ref())?;
    let index = InMemoryCorpusIndex::new(
        "a reader of the manual",
        "the manual",
        corpus,
        definitions,
        sections,
        Vec::new(),
        settings.rag.clone(),
    );

    let llm = OpenAiClient::new(
        OpenAiConfig::default()
            .with_base_url(settings.chat.api_base.clone())
            .with_timeout(Duration::from_secs(settings.chat.timeout_secs)),
    )?;

    let mut chat = CorpusChat::new(
        Arc::new(index),
        Arc::new(llm),
        ChatParameters::from(&settings.chat),
        settings.embedding.clone(),
        settings.rag.clone(),
    )?
    .with_user_id("console");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() || question == "exit" {
            break;
        }
        if question == "reset" {
            chat.reset();
            continue;
        }
        let record = chat.user_provides_input(Some(question)).await?;
        writeln!(stdout, "{}\n", record.content)?;
    }
    Ok(())
}
