//! Read-only documents
//!
//! A document is an ordered collection of rows, each holding a section
//! reference, a heading flag and text. Footnotes are stored with the
//! paragraph that refers to them and are re-assembled separately so a
//! section's body and its footnotes can be formatted independently.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::reference::ReferenceChecker;
use crate::toc::TableOfContents;
use crate::CorpusError;

static FOOTNOTE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[\^\d+\]\:").expect("static regex"));

/// How `get_text` decorates its output
#[derive(Debug, Clone, Copy)]
pub struct TextOptions {
    /// Markdown headings and paragraph spacing
    pub add_markdown: bool,
    /// Prepend the heading rows of every ancestor
    pub add_headings: bool,
    /// Do not descend into the section's children
    pub section_only: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            add_markdown: true,
            add_headings: true,
            section_only: false,
        }
    }
}

impl TextOptions {
    pub fn with_markdown(mut self, add_markdown: bool) -> Self {
        self.add_markdown = add_markdown;
        self
    }

    pub fn with_headings(mut self, add_headings: bool) -> Self {
        self.add_headings = add_headings;
        self
    }

    pub fn section_only(mut self, section_only: bool) -> Self {
        self.section_only = section_only;
        self
    }
}

/// One row of a document
///
/// An empty `section_reference` means the row sits outside the numbering
/// scheme (e.g. front matter). Text fields never hold a null sentinel; absent
/// text is the empty string.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub section_reference: String,
    pub heading: bool,
    pub text: String,
}

impl DocumentRow {
    pub fn heading(section_reference: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            section_reference: section_reference.into(),
            heading: true,
            text: text.into(),
        }
    }

    pub fn body(section_reference: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            section_reference: section_reference.into(),
            heading: false,
            text: text.into(),
        }
    }
}

/// Read-only view of one document in the corpus
pub trait Document: Send + Sync {
    /// Display name, also the root of the table of content
    fn name(&self) -> &str;

    /// The reference grammar this document is numbered with
    fn reference_checker(&self) -> &dyn ReferenceChecker;

    /// Text of a section.
    ///
    /// An empty reference returns the whole document. An invalid or unknown
    /// reference returns the empty string; structural failures (a text row
    /// whose section never appears as a heading) surface as errors.
    fn get_text(&self, section_reference: &str, options: &TextOptions)
        -> Result<String, CorpusError>;

    /// The heading rows of the reference and its ancestors, nearest-last.
    fn get_heading(&self, section_reference: &str, add_markdown: bool)
        -> Result<String, CorpusError>;

    /// Table of content over the heading rows
    fn get_toc(&self) -> Result<TableOfContents, CorpusError>;
}

/// Document backed by an in-memory row collection
pub struct StandardDocument {
    name: String,
    checker: Arc<dyn ReferenceChecker>,
    rows: Vec<DocumentRow>,
    toc: TableOfContents,
}

impl StandardDocument {
    /// Validates every non-empty reference against the grammar and builds the
    /// table of content up front.
    pub fn new(
        name: impl Into<String>,
        checker: Arc<dyn ReferenceChecker>,
        rows: Vec<DocumentRow>,
    ) -> Result<Self, CorpusError> {
        let name = name.into();
        for row in &rows {
            if !row.section_reference.is_empty() && !checker.is_valid(&row.section_reference) {
                return Err(CorpusError::InvalidReference(row.section_reference.clone()));
            }
        }
        let toc = TableOfContents::from_rows(name.clone(), Arc::clone(&checker), &rows)?;
        Ok(Self {
            name,
            checker,
            rows,
            toc,
        })
    }

    /// Format one row: headings gain their reference (and `#` markers in
    /// markdown mode), markdown paragraphs end with a blank line except for
    /// table rows.
    fn format_line(
        &self,
        row: &DocumentRow,
        extract: &str,
        add_markdown: bool,
    ) -> Result<String, CorpusError> {
        if row.heading {
            if add_markdown {
                let depth = self.checker.split(&row.section_reference)?.len();
                Ok(format!(
                    "{} {} {}\n\n",
                    "#".repeat(depth),
                    row.section_reference,
                    extract
                ))
            } else {
                Ok(format!("{} {}\n", row.section_reference, extract))
            }
        } else if add_markdown && !extract.starts_with('|') {
            Ok(format!("{extract}\n\n"))
        } else {
            Ok(format!("{extract}\n"))
        }
    }

    /// Body text and footnotes for a reference, before final assembly.
    fn collect_text_and_footnotes(
        &self,
        section_reference: &str,
        options: &TextOptions,
        add_headings: bool,
    ) -> Result<(String, Vec<String>), CorpusError> {
        if !section_reference.is_empty() && !self.checker.is_valid(section_reference) {
            return Ok((String::new(), Vec::new()));
        }

        let subset: Vec<&DocumentRow> = if section_reference.is_empty() {
            self.rows.iter().collect()
        } else {
            self.rows
                .iter()
                .filter(|r| r.section_reference == section_reference)
                .collect()
        };
        if subset.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        let mut text = String::new();
        let mut footnotes = Vec::new();
        for row in &subset {
            let (row_footnotes, extract) = extract_footnotes(&row.text);
            let extract = extract.trim();
            footnotes.extend(row_footnotes);
            // Close off a table when a non-table line follows it.
            if text.trim().ends_with('|') && !extract.trim_start().starts_with('|') {
                text.push('\n');
            }
            text.push_str(&self.format_line(row, extract, options.add_markdown)?);
        }

        if add_headings {
            let mut build_up = String::new();
            let mut build_up_footnotes = Vec::new();
            let mut parent = self.checker.parent(section_reference)?;
            while !parent.is_empty() {
                for row in self
                    .rows
                    .iter()
                    .filter(|r| r.section_reference == parent)
                    .rev()
                {
                    if row.heading {
                        let (row_footnotes, extract) = extract_footnotes(&row.text);
                        build_up_footnotes.extend(row_footnotes);
                        build_up = self.format_line(row, extract.trim(), options.add_markdown)?
                            + &build_up;
                    }
                }
                parent = self.checker.parent(&parent)?;
            }
            text = build_up + &text;
            build_up_footnotes.extend(footnotes);
            footnotes = build_up_footnotes;
        }

        if !section_reference.is_empty() && !options.section_only {
            let node = self.toc.get_node(section_reference)?;
            let children: Vec<String> = node
                .children
                .iter()
                .map(|c| c.full_node_name.clone())
                .collect();
            for child_reference in children {
                if child_reference.is_empty() {
                    continue;
                }
                let (child_text, child_footnotes) =
                    self.collect_text_and_footnotes(&child_reference, options, false)?;
                text.push_str(&child_text);
                footnotes.extend(child_footnotes);
            }
        }

        Ok((text, footnotes))
    }
}

impl Document for StandardDocument {
    fn name(&self) -> &str {
        &self.name
    }

    fn reference_checker(&self) -> &dyn ReferenceChecker {
        self.checker.as_ref()
    }

    fn get_text(
        &self,
        section_reference: &str,
        options: &TextOptions,
    ) -> Result<String, CorpusError> {
        let (text, footnotes) =
            self.collect_text_and_footnotes(section_reference, options, options.add_headings)?;
        let mut assembled = format!("{}\n\n", text.trim());
        for footnote in &footnotes {
            assembled.push_str("  \n");
            assembled.push_str(footnote.trim());
        }
        Ok(assembled.trim().to_string())
    }

    fn get_heading(
        &self,
        section_reference: &str,
        add_markdown: bool,
    ) -> Result<String, CorpusError> {
        if !self.checker.is_valid(section_reference) {
            return Ok(String::new());
        }

        let mut text = String::new();
        for row in self
            .rows
            .iter()
            .filter(|r| r.section_reference == section_reference)
        {
            if row.heading {
                let (_, extract) = extract_footnotes(&row.text);
                text.push_str(&self.format_line(row, extract.trim(), add_markdown)?);
            }
        }

        let mut build_up = String::new();
        let mut parent = self.checker.parent(section_reference)?;
        while !parent.is_empty() {
            for row in self
                .rows
                .iter()
                .filter(|r| r.section_reference == parent)
                .rev()
            {
                if row.heading {
                    let (_, extract) = extract_footnotes(&row.text);
                    build_up = self.format_line(row, extract.trim(), add_markdown)? + &build_up;
                }
            }
            parent = self.checker.parent(&parent)?;
        }

        Ok((build_up + &text).trim_matches('\n').to_string())
    }

    fn get_toc(&self) -> Result<TableOfContents, CorpusError> {
        Ok(self.toc.clone())
    }
}

/// Separate footnote definition lines from the body of a row.
fn extract_footnotes(text: &str) -> (Vec<String>, String) {
    let mut footnotes = Vec::new();
    let mut remaining = Vec::new();
    for line in text.split('\n') {
        if FOOTNOTE_LINE.is_match(line) {
            footnotes.push(line.to_string());
        } else {
            remaining.push(line);
        }
    }
    (footnotes, remaining.join("\n"))
}
