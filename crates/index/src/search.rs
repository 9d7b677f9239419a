//! Cosine similarity search
//!
//! Distance is `1 - cosine_similarity`, so smaller is closer. Rows pass the
//! filter strictly below the threshold and come back sorted ascending.

use corpus_chat_core::{
    Definition, DefinitionHit, SectionEntry, SectionHit, WorkflowHit, WorkflowTrigger,
};

/// `1 - cos(a, b)`. Degenerate input (zero norm, length mismatch) scores the
/// maximum distance of 1 so it never passes a threshold filter.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn sort_ascending<T>(hits: &mut [T], distance: impl Fn(&T) -> f32) {
    hits.sort_by(|a, b| {
        distance(a)
            .partial_cmp(&distance(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Definitions closer than the threshold, nearest first
pub fn closest_definitions(
    rows: &[Definition],
    query_embedding: &[f32],
    threshold: f32,
) -> Vec<DefinitionHit> {
    let mut hits: Vec<DefinitionHit> = rows
        .iter()
        .map(|row| DefinitionHit::from_entry(row, cosine_distance(&row.embedding, query_embedding)))
        .filter(|hit| hit.cosine_distance < threshold)
        .collect();
    sort_ascending(&mut hits, |h| h.cosine_distance);
    hits
}

/// Section candidates closer than the threshold, nearest first
pub fn closest_sections(
    rows: &[SectionEntry],
    query_embedding: &[f32],
    threshold: f32,
) -> Vec<SectionHit> {
    let mut hits: Vec<SectionHit> = rows
        .iter()
        .map(|row| SectionHit::from_entry(row, cosine_distance(&row.embedding, query_embedding)))
        .filter(|hit| hit.cosine_distance < threshold)
        .collect();
    sort_ascending(&mut hits, |h| h.cosine_distance);
    hits
}

/// Workflow triggers closer than the threshold, nearest first
pub fn closest_workflows(
    rows: &[WorkflowTrigger],
    query_embedding: &[f32],
    threshold: f32,
) -> Vec<WorkflowHit> {
    let mut hits: Vec<WorkflowHit> = rows
        .iter()
        .map(|row| WorkflowHit {
            workflow: row.workflow.clone(),
            text: row.text.clone(),
            cosine_distance: cosine_distance(&row.embedding, query_embedding),
        })
        .filter(|hit| hit.cosine_distance < threshold)
        .collect();
    sort_ascending(&mut hits, |h| h.cosine_distance);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        // degenerate input
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), 1.0);
    }

    fn section(reference: &str, embedding: Vec<f32>) -> SectionEntry {
        SectionEntry {
            document: "manual".to_string(),
            section_reference: reference.to_string(),
            source: "summary".to_string(),
            text: format!("about {reference}"),
            embedding,
        }
    }

    #[test]
    fn test_filter_and_sort() {
        let rows = vec![
            section("1", vec![0.0, 1.0]),     // distance 1.0, filtered out
            section("2", vec![1.0, 0.1]),     // close
            section("3", vec![1.0, 0.0]),     // exact
        ];
        let hits = closest_sections(&rows, &[1.0, 0.0], 0.5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].section_reference, "3");
        assert_eq!(hits[1].section_reference, "2");
        assert!(hits[0].cosine_distance <= hits[1].cosine_distance);
    }

    #[test]
    fn test_threshold_is_strict() {
        let rows = vec![section("1", vec![0.0, 1.0])]; // distance exactly 1.0
        assert!(closest_sections(&rows, &[1.0, 0.0], 1.0).is_empty());
    }
}
