//! Columnar document store
//!
//! The corpus and its index tables live in pipe-delimited text files with a
//! fixed schema per table. Empty string, never a null sentinel, represents
//! "no reference" or "no heading". The `text` column can be encrypted at
//! rest with AES-256-GCM; encryption happens on write and decryption on
//! read, the caller's in-memory copy always stays plaintext.

pub mod encryption;
pub mod tables;

pub use encryption::TextCipher;
pub use tables::{
    append_document_rows, load_definitions, load_document_rows, load_sections, load_workflows,
    save_document_rows,
};

use thiserror::Error;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Could not find the file {0}")]
    FileNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Column '{column}' not found in {path}")]
    MissingColumn { column: String, path: String },

    #[error("Malformed embedding in {path} row {row}: {message}")]
    MalformedEmbedding {
        path: String,
        row: usize,
        message: String,
    },

    #[error("Invalid encryption key: {0}")]
    Key(String),

    #[error("Encryption error: {0}")]
    Encryption(String),
}

impl From<StoreError> for corpus_chat_core::Error {
    fn from(err: StoreError) -> Self {
        corpus_chat_core::Error::Store(err.to_string())
    }
}
