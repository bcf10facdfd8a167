pub mod rule_based;
pub mod vector;

pub use rule_based::RuleBasedRecommender;
pub use vector::VectorRecommender;

use std::collections::HashSet;

use crate::storage::MEMBERSHIP_QUERY_CAP;
use crate::types::VenueRecord;

/// Dedup a participant list (order-preserving) and truncate it to the
/// store's membership-query cap. Entries may themselves be comma-joined
/// ("코난, 란"), a form the UI layer passes through verbatim.
pub(crate) fn resolve_participants(nicknames: &[String]) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::new();
    for name in nicknames.iter().flat_map(|n| n.split(',')) {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !resolved.iter().any(|r| r == trimmed) {
            resolved.push(trimmed.to_string());
        }
    }
    resolved.truncate(MEMBERSHIP_QUERY_CAP);
    resolved
}

/// Normalize caller-supplied exclusion ids to the canonical trimmed-string
/// form so that numeric and string spellings of the same id compare equal.
pub(crate) fn normalize_exclusions(ids: &HashSet<String>) -> HashSet<String> {
    ids.iter().map(|id| id.trim().to_string()).collect()
}

/// A venue is excluded when either its canonical id or its raw document key
/// appears in the (normalized) exclusion set.
pub(crate) fn is_excluded(venue: &VenueRecord, excluded: &HashSet<String>) -> bool {
    excluded.contains(&venue.canonical_id()) || excluded.contains(venue.doc_key.trim())
}

/// Cosine similarity. Zero-norm vectors and dimension mismatches score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participants_are_deduped_and_capped() {
        let raw: Vec<String> = (0..12)
            .map(|i| format!("user{}", i))
            .chain(["user0".to_string(), " ".to_string()])
            .collect();
        let resolved = resolve_participants(&raw);
        assert_eq!(resolved.len(), MEMBERSHIP_QUERY_CAP);
        assert_eq!(resolved[0], "user0");
    }

    #[test]
    fn comma_joined_entries_are_split() {
        let raw = vec!["코난, 란".to_string(), "코난".to_string()];
        assert_eq!(
            resolve_participants(&raw),
            vec!["코난".to_string(), "란".to_string()]
        );
    }

    #[test]
    fn cosine_of_zero_norm_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let sim = cosine_similarity(&[0.6, 0.8], &[0.6, 0.8]);
        assert!((sim - 1.0).abs() < 1e-6);
    }
}
