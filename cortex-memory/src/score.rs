//! Retrieval scoring: `α·similarity + β·importance + γ·recency`.
//!
//! The coefficients are configuration, not constants — callers tuning for
//! recall-heavy agents raise α, archival agents raise β. Ordering for equal
//! scores is deterministic (lexicographic item id), which is the only hard
//! requirement the retrieval contract makes.

use crate::item::MemoryItem;
use cortex_types::DurationMs;
use std::collections::BTreeSet;

/// Weights for the retrieval scoring function.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    /// Weight of semantic (or keyword) similarity.
    pub alpha: f64,
    /// Weight of stored importance.
    pub beta: f64,
    /// Weight of recency.
    pub gamma: f64,
    /// Recency half-life: an item idle for this long scores `e^-1` on the
    /// recency term.
    pub recency_half_life: DurationMs,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            beta: 0.3,
            gamma: 0.2,
            recency_half_life: DurationMs::from_secs(3600),
        }
    }
}

impl ScoringWeights {
    /// Score one item against a query at clock time `now_millis`.
    pub fn score(
        &self,
        item: &MemoryItem,
        query_words: &BTreeSet<String>,
        query_embedding: Option<&[f32]>,
        now_millis: u64,
    ) -> f64 {
        let similarity = match (query_embedding, item.embedding.as_deref()) {
            (Some(q), Some(e)) => cosine(q, e),
            _ => keyword_overlap(query_words, item),
        };
        let idle_ms = now_millis.saturating_sub(item.last_access) as f64;
        let half_life = self.recency_half_life.as_millis().max(1) as f64;
        let recency = (-idle_ms / half_life).exp();
        self.alpha * similarity + self.beta * item.importance + self.gamma * recency
    }
}

/// Cosine similarity clamped to [0, 1] (negative correlation scores zero).
fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).max(0.0)
}

/// Share of query words present in the item's content or tags.
fn keyword_overlap(query_words: &BTreeSet<String>, item: &MemoryItem) -> f64 {
    if query_words.is_empty() {
        return 0.0;
    }
    let item_words = words(&item.content);
    let hits = query_words
        .iter()
        .filter(|w| item_words.contains(*w) || item.tags.contains(*w))
        .count();
    hits as f64 / query_words.len() as f64
}

/// Lowercased alphanumeric word set.
pub fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::MemoryClass;

    fn item(id: &str, content: &str) -> MemoryItem {
        MemoryItem::new(id, MemoryClass::Long, content)
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = [0.5f32, 0.5, 0.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_mismatched_lengths_score_zero() {
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn keyword_overlap_counts_tags() {
        let query = words("deploy checklist");
        let mut tagged = item("a", "unrelated text");
        tagged.tags.insert("deploy".into());
        assert!(keyword_overlap(&query, &tagged) > 0.0);
    }

    #[test]
    fn higher_importance_never_lowers_score() {
        let weights = ScoringWeights::default();
        let query = words("anything");
        let low = item("a", "same content").with_importance(0.2);
        let high = item("b", "same content").with_importance(0.9);
        assert!(
            weights.score(&high, &query, None, 1000) > weights.score(&low, &query, None, 1000)
        );
    }

    #[test]
    fn fresher_access_never_lowers_score() {
        let weights = ScoringWeights::default();
        let query = words("anything");
        let mut stale = item("a", "same");
        stale.last_access = 0;
        let mut fresh = item("b", "same");
        fresh.last_access = 3_000_000;
        let now = 3_600_000;
        assert!(
            weights.score(&fresh, &query, None, now) > weights.score(&stale, &query, None, now)
        );
    }

    #[test]
    fn embedding_beats_keywords_when_present() {
        let weights = ScoringWeights::default();
        let query = words("no overlap here");
        let mut embedded = item("a", "zzz");
        embedded.embedding = Some(vec![1.0, 0.0]);
        let score = weights.score(&embedded, &query, Some(&[1.0, 0.0]), 0);
        // Full cosine similarity contributes the whole alpha term.
        assert!(score >= weights.alpha);
    }
}
