//! A corpus of documents
//!
//! Immutable key -> document mapping built once at startup. The "document"
//! column of the index tables matches the keys here. A corpus may designate a
//! primary document: its reference grammar is quoted in prompts as the sample
//! format and accepted as a cross-document fallback for section requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::document::{Document, TextOptions};
use crate::CorpusError;

#[derive(Clone, Default)]
pub struct Corpus {
    documents: BTreeMap<String, Arc<dyn Document>>,
    primary: String,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document under its corpus key.
    pub fn with_document(mut self, key: impl Into<String>, document: Arc<dyn Document>) -> Self {
        self.documents.insert(key.into(), document);
        self
    }

    /// Designate the primary document. The key must already be inserted.
    pub fn with_primary_document(mut self, key: impl Into<String>) -> Result<Self, CorpusError> {
        let key = key.into();
        if !self.documents.contains_key(&key) {
            return Err(CorpusError::MalformedRows(format!(
                "primary document {key} is not in the corpus"
            )));
        }
        self.primary = key;
        Ok(self)
    }

    pub fn get_document(&self, key: &str) -> Option<Arc<dyn Document>> {
        self.documents.get(key).cloned()
    }

    /// Key of the primary document, empty when none is designated.
    pub fn primary_document(&self) -> &str {
        &self.primary
    }

    pub fn document_keys(&self) -> impl Iterator<Item = &String> {
        self.documents.keys()
    }

    /// Delegate to the named document; `None` for an unknown key.
    pub fn get_text(
        &self,
        key: &str,
        section_reference: &str,
        options: &TextOptions,
    ) -> Option<Result<String, CorpusError>> {
        self.get_document(key)
            .map(|doc| doc.get_text(section_reference, options))
    }

    /// Delegate to the named document; `None` for an unknown key.
    pub fn get_heading(
        &self,
        key: &str,
        section_reference: &str,
        add_markdown: bool,
    ) -> Option<Result<String, CorpusError>> {
        self.get_document(key)
            .map(|doc| doc.get_heading(section_reference, add_markdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentRow, StandardDocument};
    use crate::reference::tests::simple_checker;

    fn corpus() -> Corpus {
        let doc = StandardDocument::new(
            "Site Manual",
            Arc::new(simple_checker()),
            vec![
                DocumentRow::heading("1", "Gates"),
                DocumentRow::body("1", "Two gates."),
            ],
        )
        .unwrap();
        Corpus::new()
            .with_document("manual", Arc::new(doc))
            .with_primary_document("manual")
            .unwrap()
    }

    #[test]
    fn test_lookup_and_delegation() {
        let corpus = corpus();
        assert!(corpus.get_document("manual").is_some());
        assert!(corpus.get_document("other").is_none());
        assert_eq!(corpus.primary_document(), "manual");

        let text = corpus
            .get_text("manual", "1", &TextOptions::default())
            .unwrap()
            .unwrap();
        assert!(text.contains("Two gates."));
        assert!(corpus.get_text("other", "1", &TextOptions::default()).is_none());
    }

    #[test]
    fn test_primary_must_exist() {
        let result = Corpus::new().with_primary_document("ghost");
        assert!(result.is_err());
    }

    #[test]
    fn test_no_primary_by_default() {
        let corpus = Corpus::new();
        assert_eq!(corpus.primary_document(), "");
    }
}
