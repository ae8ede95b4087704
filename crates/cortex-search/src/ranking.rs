//! The seven-step ranking pipeline and its scoring primitives.

use chrono::{DateTime, Utc};
use cortex_core::model::{Fact, Memory, effective_confidence};

use crate::intent::matches_intent;
use crate::options::Options;

/// Every provider name a memory's `source_file` might be prefixed with.
/// Kept local to this crate rather than depending on `cortex-connectors`,
/// since ranking only needs the prefix list, not the provider trait.
pub const KNOWN_PROVIDERS: &[&str] = &[
    "chat-platform",
    "message-bus",
    "channel-group-chat",
    "mail",
    "issue-tracker",
    "calendar",
    "doc-store",
    "structured-notes",
    "local-vault",
];

/// Maps a BM25 raw rank (SQLite FTS5 convention: more negative is
/// better) to `(0, 1]`. Monotonically decreasing in `rank`, bounded,
/// stable across queries.
pub fn normalize_bm25(rank: f64) -> f64 {
    let magnitude = rank.abs();
    if magnitude == 0.0 {
        return 0.0;
    }
    1.0 / (1.0 + 1.0 / magnitude)
}

/// Clamps a raw cosine similarity in `[-1, 1]` to `[0, 1]`.
pub fn normalize_semantic(similarity: f64) -> f64 {
    similarity.clamp(0.0, 1.0)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn matches_source_prefix(memory: &Memory, prefix: &str) -> bool {
    memory.source_file.to_lowercase().starts_with(&prefix.to_lowercase())
}

/// Step 2: `MinConfidence`/`Project`/`Source`/intent filter. `MinConfidence`
/// is applied against the normalized base match score, the only confidence
/// signal available before step 6 computes a fact-derived confidence.
pub fn passes_filters(memory: &Memory, base_score: f64, opts: &Options) -> bool {
    if (base_score as f32) < opts.min_confidence {
        return false;
    }
    if let Some(project) = &opts.project {
        if memory.project.as_deref() != Some(project.as_str()) {
            return false;
        }
    }
    if let Some(source) = &opts.source {
        if !matches_source_prefix(memory, source) {
            return false;
        }
    }
    if !matches_intent(memory, opts.intent) {
        return false;
    }
    true
}

/// Step 3: metadata boost. Both multipliers compose.
pub fn metadata_boost(memory: &Memory, opts: &Options) -> f64 {
    let mut factor = 1.0;
    if let Some(agent) = &opts.boost_agent {
        if memory.agent_id().map(|a| a.eq_ignore_ascii_case(agent)).unwrap_or(false) {
            factor *= 1.15;
        }
    }
    if let Some(channel) = &opts.boost_channel {
        if memory.channel().map(|c| c.eq_ignore_ascii_case(channel)).unwrap_or(false) {
            factor *= 1.10;
        }
    }
    factor
}

/// Step 4: recency boost off `imported_at` age.
pub fn recency_factor(memory: &Memory, now: DateTime<Utc>) -> f64 {
    let age_days = (now - memory.imported_at).num_seconds().max(0) as f64 / 86_400.0;
    if age_days < 1.0 {
        1.20
    } else if age_days < 7.0 {
        1.10
    } else if age_days < 30.0 {
        1.05
    } else {
        1.00
    }
}

/// Step 5: manual/file-derived memories outrank connector-sourced ones.
pub fn source_weight_factor(memory: &Memory) -> f64 {
    if memory.is_connector_sourced(KNOWN_PROVIDERS) {
        0.97
    } else {
        1.05
    }
}

/// Step 6: confidence-decay rerank. Returns `(factor, is_stale)`; factor
/// is monotonic in mean effective confidence and bounded to `(0.5, 1.1]`.
pub fn confidence_decay_factor(facts: &[Fact], now: DateTime<Utc>) -> (f64, bool) {
    let mean_confidence = if facts.is_empty() {
        0.85
    } else {
        let sum: f32 = facts.iter().map(|f| effective_confidence(f, now)).sum();
        (sum / facts.len() as f32) as f64
    };
    let factor = 0.5 + 0.6 * mean_confidence.clamp(0.0, 1.0);
    (factor, mean_confidence < 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_bm25_is_monotonic_and_bounded() {
        let weak = normalize_bm25(-0.1);
        let strong = normalize_bm25(-10.0);
        assert!(weak < strong);
        assert!(strong <= 1.0);
        assert!(weak > 0.0);
        assert_eq!(normalize_bm25(0.0), 0.0);
    }

    #[test]
    fn normalize_semantic_clamps_negative_similarity() {
        assert_eq!(normalize_semantic(-0.5), 0.0);
        assert_eq!(normalize_semantic(0.9), 0.9);
        assert_eq!(normalize_semantic(1.5), 1.0);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn passes_filters_honors_intent() {
        let mut opts = Options::default();
        opts.intent = crate::intent::Intent::Connector;
        let manual = Memory::new("hi", "notes/today.md");
        let connector = Memory::new("hi", "local-vault:notes/today.md");
        assert!(!passes_filters(&manual, 1.0, &opts));
        assert!(passes_filters(&connector, 1.0, &opts));
    }

    #[test]
    fn source_weight_favors_manual_over_connector() {
        let manual = Memory::new("hi", "notes/today.md");
        let connector = Memory::new("hi", "local-vault:notes/today.md");
        assert!(source_weight_factor(&manual) > source_weight_factor(&connector));
    }

    #[test]
    fn confidence_decay_factor_is_bounded_and_flags_stale() {
        let (factor_empty, stale_empty) = confidence_decay_factor(&[], Utc::now());
        assert!(factor_empty > 0.5 && factor_empty <= 1.1);
        assert!(!stale_empty);

        let now = Utc::now();
        let stale_fact = Fact {
            id: 1,
            memory_id: 1,
            subject: "s".into(),
            predicate: "p".into(),
            object: "o".into(),
            fact_type: cortex_core::model::FactType::Attribute,
            confidence: 0.2,
            decay_rate: 0.0,
            source_quote: String::new(),
            created_at: now,
            last_reinforced_at: now,
        };
        let (factor, stale) = confidence_decay_factor(&[stale_fact], now);
        assert!(stale);
        assert!(factor > 0.5);
    }
}
