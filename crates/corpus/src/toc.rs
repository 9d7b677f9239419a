//! Tables of content
//!
//! A tree over the heading rows of a document. The root carries the document
//! name; every other node carries the last component of its reference, the
//! full reference, and the heading text. The tree drives child expansion in
//! `Document::get_text` and token-bounded chunking for indexing.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::document::{Document, DocumentRow, TextOptions};
use crate::reference::ReferenceChecker;
use crate::CorpusError;

static FOOTNOTE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[\^\d+\]\:").expect("static regex"));
static FOOTNOTE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\^\d+\]").expect("static regex"));

/// One node of the table of content tree
#[derive(Debug, Clone)]
pub struct TocNode {
    /// Last component of the reference (the document name at the root)
    pub name: String,
    /// The complete reference, empty at the root
    pub full_node_name: String,
    /// Heading text, possibly empty for filled-in ancestors
    pub heading_text: String,
    /// Child nodes in document order
    pub children: Vec<TocNode>,
}

impl TocNode {
    fn new(name: impl Into<String>, full_node_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_node_name: full_node_name.into(),
            heading_text: String::new(),
            children: Vec::new(),
        }
    }

    /// Consolidate heading texts bottom-up: every non-leaf node's heading is
    /// recomputed from its children's (already consolidated) headings by the
    /// supplied function. Returns this node's resulting heading.
    pub fn consolidate_from_leaves(&mut self, consolidate: &dyn Fn(&[String]) -> String) -> String {
        if self.children.is_empty() {
            return self.heading_text.clone();
        }
        let child_headings: Vec<String> = self
            .children
            .iter_mut()
            .map(|child| child.consolidate_from_leaves(consolidate))
            .collect();
        self.heading_text = consolidate(&child_headings);
        self.heading_text.clone()
    }
}

/// A section returned by `split_tree`, small enough for the token limit
#[derive(Debug, Clone)]
pub struct SectionChunk {
    pub section_reference: String,
    pub text: String,
    pub token_count: usize,
}

/// Tree over a document's references
#[derive(Clone)]
pub struct TableOfContents {
    pub root: TocNode,
    checker: Arc<dyn ReferenceChecker>,
}

impl TableOfContents {
    pub fn new(root_name: impl Into<String>, checker: Arc<dyn ReferenceChecker>) -> Self {
        Self {
            root: TocNode::new(root_name, ""),
            checker,
        }
    }

    /// Build a table of content from document rows, one entry per heading
    /// row. Footnote lines and `[^n]` markers are stripped from heading text.
    pub fn from_rows(
        root_name: impl Into<String>,
        checker: Arc<dyn ReferenceChecker>,
        rows: &[DocumentRow],
    ) -> Result<Self, CorpusError> {
        let mut toc = Self::new(root_name, checker);
        for row in rows {
            if !row.heading {
                continue;
            }
            let heading_text = strip_footnotes(&row.text);
            if !toc.checker.is_valid(&row.section_reference) {
                tracing::error!(
                    reference = %row.section_reference,
                    "heading row carries an invalid reference, aborting table of content build"
                );
                return Err(CorpusError::InvalidReference(row.section_reference.clone()));
            }
            toc.add_entry(&row.section_reference, heading_text.trim())?;
        }
        Ok(toc)
    }

    /// Add an entry, creating any missing ancestors with empty heading text.
    /// An existing entry only gains a heading when it has none yet.
    pub fn add_entry(
        &mut self,
        section_reference: &str,
        heading_text: &str,
    ) -> Result<(), CorpusError> {
        if section_reference == self.root.name {
            self.root.heading_text = heading_text.to_string();
            return Ok(());
        }
        if !self.checker.is_valid(section_reference) {
            return Err(CorpusError::InvalidReference(section_reference.to_string()));
        }

        let components = self.checker.split(section_reference)?;
        let mut current = &mut self.root;
        let mut full_node_name = String::new();

        for (i, name) in components.iter().enumerate() {
            full_node_name.push_str(name);
            let position = current.children.iter().position(|c| &c.name == name);
            let index = match position {
                Some(index) => index,
                None => {
                    current
                        .children
                        .push(TocNode::new(name.clone(), full_node_name.clone()));
                    current.children.len() - 1
                },
            };
            current = &mut current.children[index];
            if i == components.len() - 1 && current.heading_text.is_empty() {
                current.heading_text = heading_text.to_string();
            }
        }
        Ok(())
    }

    /// Look up the node for a reference (or the root by document name).
    pub fn get_node(&self, section_reference: &str) -> Result<&TocNode, CorpusError> {
        if section_reference == self.root.name {
            return Ok(&self.root);
        }
        if !self.checker.is_valid(section_reference) {
            return Err(CorpusError::InvalidReference(section_reference.to_string()));
        }
        let mut current = &self.root;
        for name in self.checker.split(section_reference)? {
            current = current
                .children
                .iter()
                .find(|c| c.name == name)
                .ok_or_else(|| CorpusError::NodeNotFound(section_reference.to_string()))?;
        }
        Ok(current)
    }

    /// ASCII outline of the tree, one `name heading` line per node. A subtree
    /// is only listed when at least one child carries heading text; children
    /// of the root on the exclusion list print without their (duplicated)
    /// heading.
    pub fn outline(&self) -> String {
        self.list_children(&self.root, 0, true)
    }

    fn list_children(&self, node: &TocNode, indent: usize, node_is_root: bool) -> String {
        let mut out = String::new();
        if !node.children.iter().any(|c| !c.heading_text.is_empty()) {
            return out;
        }
        for child in &node.children {
            let pad = " ".repeat(indent);
            if node_is_root && self.checker.exclusions().iter().any(|e| e == &child.name) {
                out.push_str(&format!("{pad}{}\n", child.name));
            } else {
                out.push_str(&format!("{pad}{} {}\n", child.name, child.heading_text));
            }
            out.push_str(&self.list_children(child, indent + 4, false));
        }
        out
    }
}

/// Drop footnote definition lines and inline `[^n]` markers from a heading.
fn strip_footnotes(text: &str) -> String {
    let kept: Vec<&str> = text
        .split('\n')
        .filter(|line| !FOOTNOTE_LINE.is_match(line))
        .collect();
    FOOTNOTE_MARKER.replace_all(&kept.join("\n"), "").into_owned()
}

/// Flatten a subtree into sections whose text fits the token limit.
///
/// A node over the limit is replaced by its children; a leaf over the limit
/// cannot be split and fails with `Unsplittable`.
pub fn split_tree(
    node: &TocNode,
    document: &dyn Document,
    token_limit: usize,
    count_tokens: &dyn Fn(&str) -> usize,
) -> Result<Vec<SectionChunk>, CorpusError> {
    let mut chunks = Vec::new();
    split_recursive(node, document, token_limit, count_tokens, &mut chunks)?;
    Ok(chunks)
}

fn split_recursive(
    node: &TocNode,
    document: &dyn Document,
    token_limit: usize,
    count_tokens: &dyn Fn(&str) -> usize,
    chunks: &mut Vec<SectionChunk>,
) -> Result<(), CorpusError> {
    let text = document.get_text(&node.full_node_name, &TextOptions::default())?;
    let token_count = count_tokens(&text);

    if token_count > token_limit {
        if node.children.is_empty() {
            return Err(CorpusError::Unsplittable {
                reference: node.full_node_name.clone(),
                token_count,
            });
        }
        for child in &node.children {
            split_recursive(child, document, token_limit, count_tokens, chunks)?;
        }
    } else {
        chunks.push(SectionChunk {
            section_reference: node.full_node_name.clone(),
            text,
            token_count,
        });
    }
    Ok(())
}
