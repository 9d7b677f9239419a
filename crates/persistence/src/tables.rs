//! Table loaders and writers
//!
//! One loader per table schema. Files are pipe-delimited with a header row;
//! extra columns are ignored so bookkeeping columns in secondary files (e.g.
//! `sections_referenced`) do not need stripping. Embeddings are stored as
//! JSON arrays.

use std::collections::HashMap;
use std::path::Path;

use corpus_chat_core::{Definition, SectionEntry, WorkflowTrigger};
use corpus_chat_corpus::DocumentRow;

use crate::encryption::TextCipher;
use crate::StoreError;

struct Table {
    path: String,
    columns: HashMap<String, usize>,
    records: Vec<csv::StringRecord>,
}

impl Table {
    fn open(path: &Path, required_columns: &[&str]) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::FileNotFound(path.display().to_string()));
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'|')
            .flexible(false)
            .from_path(path)?;

        let columns: HashMap<String, usize> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        for column in required_columns {
            if !columns.contains_key(*column) {
                return Err(StoreError::MissingColumn {
                    column: column.to_string(),
                    path: path.display().to_string(),
                });
            }
        }

        let records = reader.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            path: path.display().to_string(),
            columns,
            records,
        })
    }

    fn field<'a>(&self, record: &'a csv::StringRecord, column: &str) -> &'a str {
        self.columns
            .get(column)
            .and_then(|i| record.get(*i))
            .unwrap_or("")
    }

    fn text_field(
        &self,
        record: &csv::StringRecord,
        column: &str,
        cipher: Option<&TextCipher>,
    ) -> Result<String, StoreError> {
        let raw = self.field(record, column);
        match cipher {
            Some(cipher) => cipher.decrypt(raw),
            None => Ok(raw.to_string()),
        }
    }

    fn embedding_field(
        &self,
        record: &csv::StringRecord,
        column: &str,
        row: usize,
    ) -> Result<Vec<f32>, StoreError> {
        let raw = self.field(record, column);
        serde_json::from_str(raw).map_err(|e| StoreError::MalformedEmbedding {
            path: self.path.clone(),
            row,
            message: e.to_string(),
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "true" | "True" | "TRUE" | "1")
}

/// Load a definitions table:
/// `document | section_reference | text | definition | embedding`
pub fn load_definitions(
    path: &Path,
    cipher: Option<&TextCipher>,
) -> Result<Vec<Definition>, StoreError> {
    let table = Table::open(
        path,
        &["document", "section_reference", "text", "definition", "embedding"],
    )?;
    let mut definitions = Vec::with_capacity(table.records.len());
    for (row, record) in table.records.iter().enumerate() {
        definitions.push(Definition {
            document: table.field(record, "document").to_string(),
            section_reference: table.field(record, "section_reference").to_string(),
            text: table.text_field(record, "text", cipher)?,
            definition: table.field(record, "definition").to_string(),
            embedding: table.embedding_field(record, "embedding", row)?,
        });
    }
    tracing::debug!(target: "dev", count = definitions.len(), path = %path.display(), "loaded definitions");
    Ok(definitions)
}

/// Load a sections index table:
/// `document | section_reference | source | text | embedding`
pub fn load_sections(
    path: &Path,
    cipher: Option<&TextCipher>,
) -> Result<Vec<SectionEntry>, StoreError> {
    let table = Table::open(
        path,
        &["document", "section_reference", "source", "text", "embedding"],
    )?;
    let mut sections = Vec::with_capacity(table.records.len());
    for (row, record) in table.records.iter().enumerate() {
        sections.push(SectionEntry {
            document: table.field(record, "document").to_string(),
            section_reference: table.field(record, "section_reference").to_string(),
            source: table.field(record, "source").to_string(),
            text: table.text_field(record, "text", cipher)?,
            embedding: table.embedding_field(record, "embedding", row)?,
        });
    }
    tracing::debug!(target: "dev", count = sections.len(), path = %path.display(), "loaded section index");
    Ok(sections)
}

/// Load a workflows table: `workflow | text | embedding`
pub fn load_workflows(
    path: &Path,
    cipher: Option<&TextCipher>,
) -> Result<Vec<WorkflowTrigger>, StoreError> {
    let table = Table::open(path, &["workflow", "text", "embedding"])?;
    let mut workflows = Vec::with_capacity(table.records.len());
    for (row, record) in table.records.iter().enumerate() {
        workflows.push(WorkflowTrigger {
            workflow: table.field(record, "workflow").to_string(),
            text: table.text_field(record, "text", cipher)?,
            embedding: table.embedding_field(record, "embedding", row)?,
        });
    }
    Ok(workflows)
}

/// Load a document content table: `section_reference | heading | text`
pub fn load_document_rows(
    path: &Path,
    cipher: Option<&TextCipher>,
) -> Result<Vec<DocumentRow>, StoreError> {
    let table = Table::open(path, &["section_reference", "heading", "text"])?;
    let mut rows = Vec::with_capacity(table.records.len());
    for record in &table.records {
        rows.push(DocumentRow {
            section_reference: table.field(record, "section_reference").to_string(),
            heading: parse_bool(table.field(record, "heading")),
            text: table.text_field(record, "text", cipher)?,
        });
    }
    Ok(rows)
}

/// Append the rows of a secondary content file (the `_plus` pattern) onto an
/// already loaded table. An empty path is a no-op.
pub fn append_document_rows(
    path: &Path,
    rows: &mut Vec<DocumentRow>,
    cipher: Option<&TextCipher>,
) -> Result<(), StoreError> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    rows.extend(load_document_rows(path, cipher)?);
    Ok(())
}

/// Write a document content table, encrypting the text column when a cipher
/// is supplied. The in-memory rows are left untouched.
pub fn save_document_rows(
    path: &Path,
    rows: &[DocumentRow],
    cipher: Option<&TextCipher>,
) -> Result<(), StoreError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'|').from_path(path)?;
    writer.write_record(["section_reference", "heading", "text"])?;
    for row in rows {
        let text = match cipher {
            Some(cipher) => cipher.encrypt(&row.text)?,
            None => row.text.clone(),
        };
        writer.write_record([
            row.section_reference.as_str(),
            if row.heading { "True" } else { "False" },
            text.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    fn cipher() -> TextCipher {
        TextCipher::from_base64(&BASE64.encode([3u8; 32])).unwrap()
    }

    #[test]
    fn test_document_rows_round_trip_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manual.psv");
        let rows = vec![
            DocumentRow::heading("1", "Gates"),
            DocumentRow::body("1", "The site has two gates."),
            DocumentRow::body("", "Front matter without a reference."),
        ];
        save_document_rows(&path, &rows, None).unwrap();
        let loaded = load_document_rows(&path, None).unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded[0].heading);
        assert_eq!(loaded[1].text, "The site has two gates.");
        assert_eq!(loaded[2].section_reference, "");
    }

    #[test]
    fn test_document_rows_round_trip_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manual.psv");
        let rows = vec![DocumentRow::body("1", "Sensitive section text.")];
        let cipher = cipher();
        save_document_rows(&path, &rows, Some(&cipher)).unwrap();

        // On disk the text is not readable ...
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("Sensitive section text."));

        // ... loading without the key fails, with the key round-trips.
        assert!(load_document_rows(&path, None).is_err() || {
            let plain = load_document_rows(&path, None).unwrap();
            plain[0].text != "Sensitive section text."
        });
        let decrypted = load_document_rows(&path, Some(&cipher)).unwrap();
        assert_eq!(decrypted[0].text, "Sensitive section text.");
    }

    #[test]
    fn test_missing_file_and_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_document_rows(&dir.path().join("ghost.psv"), None),
            Err(StoreError::FileNotFound(_))
        ));

        let path = dir.path().join("bad.psv");
        std::fs::write(&path, "section_reference|heading\n1|True\n").unwrap();
        assert!(matches!(
            load_document_rows(&path, None),
            Err(StoreError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_definitions_and_sections_tables() {
        let dir = tempfile::tempdir().unwrap();
        let definitions = dir.path().join("definitions.psv");
        std::fs::write(
            &definitions,
            "document|section_reference|text|definition|embedding\n\
             manual||gate|Gate: an entrance.|[1.0, 0.0]\n",
        )
        .unwrap();
        let loaded = load_definitions(&definitions, None).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].embedding, vec![1.0, 0.0]);
        assert_eq!(loaded[0].section_reference, "");

        let sections = dir.path().join("sections.psv");
        std::fs::write(
            &sections,
            "document|section_reference|source|text|embedding|sections_referenced\n\
             manual|1|summary|about gates|[0.5, 0.5]|ignored\n",
        )
        .unwrap();
        let loaded = load_sections(&sections, None).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].source, "summary");

        let workflows = dir.path().join("workflows.psv");
        std::fs::write(&workflows, "workflow|text|embedding\nemail|send an email|[0.0, 1.0]\n")
            .unwrap();
        assert_eq!(load_workflows(&workflows, None).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows.psv");
        std::fs::write(&path, "workflow|text|embedding\nemail|send|not-json\n").unwrap();
        assert!(matches!(
            load_workflows(&path, None),
            Err(StoreError::MalformedEmbedding { .. })
        ));
    }

    #[test]
    fn test_append_document_rows() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("manual.psv");
        let extra = dir.path().join("manual_plus.psv");
        save_document_rows(&main, &[DocumentRow::heading("1", "Gates")], None).unwrap();
        save_document_rows(&extra, &[DocumentRow::body("1", "Appended.")], None).unwrap();

        let mut rows = load_document_rows(&main, None).unwrap();
        append_document_rows(&extra, &mut rows, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].text, "Appended.");

        append_document_rows(Path::new(""), &mut rows, None).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
