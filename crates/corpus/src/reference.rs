//! Reference grammars
//!
//! Legal documents number their sections with a hierarchical scheme: a
//! capital letter and number, then an indented Roman numeral, then a
//! bracketed lowercase letter, and so on. A `ReferenceChecker` captures one
//! such scheme as an ordered list of per-level regexes plus a set of
//! exclusion literals for headings that sit outside the scheme ("Preamble",
//! "Legal context").

use regex::Regex;

use crate::CorpusError;

/// Validates, splits and extracts hierarchical section references.
pub trait ReferenceChecker: Send + Sync {
    /// True when the reference consumes completely into successive grammar
    /// components, or is an exclusion literal.
    fn is_valid(&self, reference: &str) -> bool;

    /// The matched component strings of a valid reference. `""` splits to an
    /// empty list; an exclusion literal splits to itself.
    fn split(&self, reference: &str) -> Result<Vec<String>, CorpusError>;

    /// Greedily pull a valid reference out of a string that may carry extra
    /// text, e.g. `"B.18 Gold (B)(i)(b)"` -> `"B.18(B)(i)(b)"`.
    fn extract_valid_reference(&self, input: &str) -> Option<String>;

    /// Text form of the grammar, quoted to the LLM when describing the
    /// expected reference format.
    fn pattern_description(&self) -> &str;

    /// Whole-string literals exempt from the grammar.
    fn exclusions(&self) -> &[String] {
        &[]
    }

    /// Strip a leading index (or exclusion literal) off a raw document line,
    /// returning `(index, rest)`. Used when ingesting raw manuals; the
    /// indentation level of the index is not verified here.
    fn take_leading_reference(&self, line: &str) -> (String, String);

    /// The reference with its last component dropped; `parent("") == ""`.
    fn parent(&self, reference: &str) -> Result<String, CorpusError> {
        if reference.is_empty() {
            return Ok(String::new());
        }
        let components = self.split(reference)?;
        if components.is_empty() {
            return Err(CorpusError::InvalidReference(reference.to_string()));
        }
        Ok(components[..components.len() - 1].concat())
    }

    /// `[r, parent(r), ...]` down to (but excluding) the root.
    fn ancestors_inclusive(&self, reference: &str) -> Result<Vec<String>, CorpusError> {
        let mut ancestors = vec![reference.to_string()];
        let mut current = reference.to_string();
        while !current.is_empty() {
            current = self.parent(&current)?;
            if !current.is_empty() {
                ancestors.push(current.clone());
            }
        }
        Ok(ancestors)
    }

    /// True when the reference or any of its ancestors appears in the list.
    fn any_ancestor_in(&self, reference: &str, references: &[String]) -> bool {
        if references.iter().any(|r| r == reference) {
            return true;
        }
        match self.ancestors_inclusive(reference) {
            Ok(ancestors) => ancestors.iter().any(|a| references.contains(a)),
            Err(_) => false,
        }
    }
}

/// A reference checker driven by an ordered list of per-level regexes.
pub struct StandardReferenceChecker {
    /// Patterns anchored at the start of the remaining input
    anchored: Vec<Regex>,
    /// The same patterns unanchored, for extraction out of noisy text
    search: Vec<Regex>,
    text_version: String,
    exclusions: Vec<String>,
}

impl StandardReferenceChecker {
    /// Compile a checker from per-level patterns.
    ///
    /// A leading `^` on a pattern is tolerated and normalized away; every
    /// pattern is applied anchored during validation and unanchored during
    /// extraction. When `text_version` is empty a description is derived from
    /// the patterns.
    pub fn new(
        patterns: &[&str],
        text_version: &str,
        exclusions: &[&str],
    ) -> Result<Self, CorpusError> {
        let mut anchored = Vec::with_capacity(patterns.len());
        let mut search = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let stripped = pattern.strip_prefix('^').unwrap_or(pattern);
            anchored.push(
                Regex::new(&format!("^(?:{stripped})"))
                    .map_err(|e| CorpusError::Pattern(e.to_string()))?,
            );
            search.push(Regex::new(stripped).map_err(|e| CorpusError::Pattern(e.to_string()))?);
        }

        let text_version = if text_version.is_empty() {
            let combined: String = patterns
                .iter()
                .map(|p| format!("({})", p.strip_prefix('^').unwrap_or(p)))
                .collect();
            format!("r'{combined}'")
        } else {
            text_version.to_string()
        };

        Ok(Self {
            anchored,
            search,
            text_version,
            exclusions: exclusions.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl ReferenceChecker for StandardReferenceChecker {
    fn is_valid(&self, reference: &str) -> bool {
        if self.exclusions.iter().any(|e| e == reference) {
            return true;
        }

        let mut remaining = reference;
        let mut pattern_matched = false;
        for pattern in &self.anchored {
            if remaining.is_empty() {
                continue;
            }
            match pattern.find(remaining) {
                Some(m) => {
                    remaining = &remaining[m.end()..];
                    pattern_matched = true;
                },
                // A failed match after a success means the next component is
                // from the wrong level.
                None if pattern_matched => return false,
                None => {},
            }
        }
        if !remaining.is_empty() {
            return false;
        }
        pattern_matched
    }

    fn split(&self, reference: &str) -> Result<Vec<String>, CorpusError> {
        let mut components = Vec::new();
        if reference.is_empty() {
            return Ok(components);
        }
        if self.exclusions.iter().any(|e| e == reference) {
            components.push(reference.to_string());
            return Ok(components);
        }

        let mut remaining = reference;
        let mut pattern_matched = false;
        for pattern in &self.anchored {
            if remaining.is_empty() {
                continue;
            }
            match pattern.find(remaining) {
                Some(m) => {
                    components.push(m.as_str().to_string());
                    remaining = &remaining[m.end()..];
                    pattern_matched = true;
                },
                None if pattern_matched => {
                    return Err(CorpusError::InvalidReference(reference.to_string()));
                },
                None => {},
            }
        }
        if !remaining.is_empty() {
            return Err(CorpusError::InvalidReference(reference.to_string()));
        }
        Ok(components)
    }

    fn extract_valid_reference(&self, input: &str) -> Option<String> {
        if self.exclusions.iter().any(|e| e == input.trim()) {
            return Some(input.trim().to_string());
        }

        let mut partial = String::new();
        let mut remaining = input;
        for pattern in &self.search {
            if let Some(m) = pattern.find(remaining) {
                partial.push_str(m.as_str());
                remaining = &remaining[m.end()..];
            } else if !remaining.is_empty() && remaining.contains('(') {
                // Another bracketed component follows but it does not fit the
                // next level; stop at what has been accumulated.
                return Some(partial);
            }
        }

        if partial.is_empty() {
            None
        } else {
            Some(partial)
        }
    }

    fn pattern_description(&self) -> &str {
        &self.text_version
    }

    fn exclusions(&self) -> &[String] {
        &self.exclusions
    }

    fn take_leading_reference(&self, line: &str) -> (String, String) {
        for pattern in &self.anchored {
            if let Some(m) = pattern.find(line) {
                // Skip the space that separates the index from the text.
                let rest = line.get(m.end() + 1..).unwrap_or("");
                return (m.as_str().to_string(), rest.to_string());
            }
        }
        for exclusion in &self.exclusions {
            if line.trim() == exclusion {
                return (exclusion.clone(), String::new());
            }
        }
        (String::new(), line.to_string())
    }
}

/// Checker for documents without internal numbering: only `""` and the
/// literal `"all"` are valid.
pub struct EmptyReferenceChecker {
    text_version: String,
}

impl EmptyReferenceChecker {
    pub fn new() -> Self {
        Self {
            text_version: String::new(),
        }
    }
}

impl Default for EmptyReferenceChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceChecker for EmptyReferenceChecker {
    fn is_valid(&self, reference: &str) -> bool {
        reference.is_empty() || reference == "all"
    }

    fn split(&self, _reference: &str) -> Result<Vec<String>, CorpusError> {
        Ok(Vec::new())
    }

    fn extract_valid_reference(&self, _input: &str) -> Option<String> {
        Some(String::new())
    }

    fn pattern_description(&self) -> &str {
        &self.text_version
    }

    fn take_leading_reference(&self, line: &str) -> (String, String) {
        (String::new(), line.to_string())
    }

    fn parent(&self, _reference: &str) -> Result<String, CorpusError> {
        Ok(String::new())
    }

    fn ancestors_inclusive(&self, _reference: &str) -> Result<Vec<String>, CorpusError> {
        Ok(vec![String::new()])
    }
}

/// Tries a list of sub-checkers in order and delegates to the first whose
/// `is_valid` succeeds. Used for corpora whose documents quote references
/// from more than one numbering scheme.
pub struct MultiReferenceChecker {
    checkers: Vec<std::sync::Arc<dyn ReferenceChecker>>,
    text_version: String,
}

impl MultiReferenceChecker {
    pub fn new(checkers: Vec<std::sync::Arc<dyn ReferenceChecker>>) -> Self {
        let text_version = checkers
            .iter()
            .map(|c| c.pattern_description())
            .filter(|d| !d.is_empty())
            .collect::<Vec<_>>()
            .join(", or ");
        Self {
            checkers,
            text_version,
        }
    }
}

impl ReferenceChecker for MultiReferenceChecker {
    fn is_valid(&self, reference: &str) -> bool {
        self.checkers.iter().any(|c| c.is_valid(reference))
    }

    fn split(&self, reference: &str) -> Result<Vec<String>, CorpusError> {
        for checker in &self.checkers {
            if checker.is_valid(reference) {
                return checker.split(reference);
            }
        }
        Ok(Vec::new())
    }

    fn extract_valid_reference(&self, input: &str) -> Option<String> {
        self.checkers
            .iter()
            .filter_map(|c| c.extract_valid_reference(input))
            .find(|r| !r.is_empty())
    }

    fn pattern_description(&self) -> &str {
        &self.text_version
    }

    fn take_leading_reference(&self, line: &str) -> (String, String) {
        for checker in &self.checkers {
            let (index, rest) = checker.take_leading_reference(line);
            if !index.is_empty() {
                return (index, rest);
            }
        }
        (String::new(), line.to_string())
    }

    fn parent(&self, reference: &str) -> Result<String, CorpusError> {
        for checker in &self.checkers {
            if checker.is_valid(reference) {
                return checker.parent(reference);
            }
        }
        Ok(String::new())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// The reference scheme of the exchange-control style test manual:
    /// B.18(B)(i)(b)(aa)(1) plus two irregular headings.
    pub(crate) fn manual_checker() -> StandardReferenceChecker {
        StandardReferenceChecker::new(
            &[
                r"^[A-Z]\.\d{0,2}",
                r"^\([A-Z]\)",
                r"^\((i|ii|iii|iv|v|vi|vii|viii|ix|x|xi|xii|xiii|xiv|xv|xvi|xvii|xviii|xix|xx)\)",
                r"^\([a-z]\)",
                r"^\([a-z]{2}\)",
                r"^\((?:[1-9]|[1-9][0-9])\)",
            ],
            r"[A-Z].[0-9](A)(i)(a)(aa)(1)",
            &["Legal context", "Introduction"],
        )
        .unwrap()
    }

    /// Dotted-digit scheme: 1.2.3
    pub(crate) fn simple_checker() -> StandardReferenceChecker {
        StandardReferenceChecker::new(
            &[r"^[1-9]", r"^\.[1-9]", r"^\.[1-9]"],
            r"[1-9](.[1-9]){0,2}",
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_is_valid() {
        let checker = manual_checker();
        assert!(!checker.is_valid(""));
        assert!(checker.is_valid("G.1(C)(xviii)(c)(dd)(9)"));
        assert!(!checker.is_valid("G.1(C)(xviii)(c)(dd)(9)(10)"));
        assert!(checker.is_valid("G.1(C)"));
        assert!(checker.is_valid("Legal context"));
        assert!(!checker.is_valid("G.1(C)(xviii)(c)(c)(9)"));
        assert!(!checker.is_valid("G.1(C)(xviii)(c)(DD)(9)"));
        assert!(!checker.is_valid("G.1(C)(xviii)(c)(9)(dd)"));
        assert!(!checker.is_valid("G.1(xviii)"));
    }

    #[test]
    fn test_extract_valid_reference() {
        let checker = manual_checker();
        assert_eq!(
            checker.extract_valid_reference("B.18 Gold (B)(i)(b)").as_deref(),
            Some("B.18(B)(i)(b)")
        );
        assert_eq!(
            checker.extract_valid_reference("   B.18 Gold (B)(i)(b)").as_deref(),
            Some("B.18(B)(i)(b)")
        );
        // After (i) the next level must be a single lowercase letter, so the
        // extraction stops early.
        assert_eq!(
            checker.extract_valid_reference("B.18 Gold (B)(i)(ii)").as_deref(),
            Some("B.18(B)(i)")
        );
        assert_eq!(checker.extract_valid_reference("A.1").as_deref(), Some("A.1"));
        assert_eq!(
            checker
                .extract_valid_reference("B.18 Gold (B)(i)(b) hello")
                .as_deref(),
            Some("B.18(B)(i)(b)")
        );
        assert_eq!(
            checker
                .extract_valid_reference("B.18 Gold (B)(i)(b) (hello)")
                .as_deref(),
            Some("B.18(B)(i)(b)")
        );
        assert_eq!(
            checker.extract_valid_reference("Legal context").as_deref(),
            Some("Legal context")
        );
        assert_eq!(checker.extract_valid_reference("no reference here"), None);
    }

    #[test]
    fn test_split() {
        let checker = manual_checker();
        let components = checker.split("G.1(C)(xviii)(c)(dd)(9)").unwrap();
        assert_eq!(components, ["G.1", "(C)", "(xviii)", "(c)", "(dd)", "(9)"]);

        assert_eq!(checker.split("G.1(C)").unwrap(), ["G.1", "(C)"]);
        assert_eq!(checker.split("").unwrap(), Vec::<String>::new());
        assert_eq!(checker.split("Legal context").unwrap(), ["Legal context"]);

        assert!(matches!(
            checker.split("G.1(C)(xviii)(c)(DD)(9)"),
            Err(CorpusError::InvalidReference(_))
        ));
        assert!(matches!(
            checker.split("G.1(C)(xviii)(c)(d)(9)x"),
            Err(CorpusError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_parent_and_ancestors() {
        let checker = manual_checker();
        assert_eq!(
            checker.parent("G.1(C)(xviii)(c)(dd)(9)").unwrap(),
            "G.1(C)(xviii)(c)(dd)"
        );
        assert_eq!(checker.parent("").unwrap(), "");
        assert_eq!(checker.parent("G.1").unwrap(), "");

        assert_eq!(
            checker.ancestors_inclusive("G.1(C)(xviii)(c)(dd)(9)").unwrap(),
            [
                "G.1(C)(xviii)(c)(dd)(9)",
                "G.1(C)(xviii)(c)(dd)",
                "G.1(C)(xviii)(c)",
                "G.1(C)(xviii)",
                "G.1(C)",
                "G.1"
            ]
        );
        assert_eq!(checker.ancestors_inclusive("G.1").unwrap(), ["G.1"]);
    }

    #[test]
    fn test_split_concat_round_trip() {
        let checker = manual_checker();
        for reference in ["G.1(C)(xviii)(c)(dd)(9)", "A.1", "B.18(B)(i)"] {
            assert_eq!(checker.split(reference).unwrap().concat(), reference);
        }
    }

    #[test]
    fn test_any_ancestor_in() {
        let checker = manual_checker();
        let reference = "G.1(C)(xviii)(c)(dd)(9)";
        let miss = ["A.1", "B.1", "C.1"].map(String::from);
        assert!(!checker.any_ancestor_in(reference, &miss));
        let root_hit = ["A.1", "B.1", "G.1"].map(String::from);
        assert!(checker.any_ancestor_in(reference, &root_hit));
        let exact_hit = ["G.1(C)(xviii)(c)(dd)(9)".to_string()];
        assert!(checker.any_ancestor_in(reference, &exact_hit));
        let mid_hit = ["G.1(C)(xviii)(c)".to_string()];
        assert!(checker.any_ancestor_in(reference, &mid_hit));
    }

    #[test]
    fn test_take_leading_reference() {
        let checker = manual_checker();
        let no_reference = "Africa means any country forming part of the African Union.";
        let (index, rest) = checker.take_leading_reference(no_reference);
        assert_eq!(index, "");
        assert_eq!(rest, no_reference);

        let (index, rest) = checker.take_leading_reference("A.1 Definitions");
        assert_eq!(index, "A.1");
        assert_eq!(rest, "Definitions");

        let (index, rest) = checker.take_leading_reference("Legal context");
        assert_eq!(index, "Legal context");
        assert_eq!(rest, "");
    }

    #[test]
    fn test_derived_pattern_description() {
        let checker =
            StandardReferenceChecker::new(&[r"^[1-9]", r"^\.[1-9]"], "", &[]).unwrap();
        assert_eq!(checker.pattern_description(), r"r'([1-9])(\.[1-9])'");
    }

    #[test]
    fn test_empty_checker() {
        let checker = EmptyReferenceChecker::new();
        assert!(checker.is_valid(""));
        assert!(checker.is_valid("all"));
        assert!(!checker.is_valid("A.1"));
        assert_eq!(checker.split("anything").unwrap(), Vec::<String>::new());
        assert_eq!(checker.parent("all").unwrap(), "");
        assert_eq!(checker.extract_valid_reference("A.1").as_deref(), Some(""));
    }

    #[test]
    fn test_multi_checker_delegates_to_first_accepting() {
        use std::sync::Arc;
        let multi = MultiReferenceChecker::new(vec![
            Arc::new(simple_checker()),
            Arc::new(manual_checker()),
        ]);
        assert!(multi.is_valid("1.2"));
        assert!(multi.is_valid("G.1(C)"));
        assert!(!multi.is_valid("nope"));
        assert_eq!(multi.split("1.2.3").unwrap(), ["1", ".2", ".3"]);
        assert_eq!(multi.split("G.1(C)").unwrap(), ["G.1", "(C)"]);
        assert_eq!(multi.parent("G.1(C)").unwrap(), "G.1");
        assert_eq!(multi.split("not a reference").unwrap(), Vec::<String>::new());
    }
}
