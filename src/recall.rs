//! Similarity search — owner-scoped recall of semantically similar memories.
//!
//! Read path: query text → embedding backend → similarity-ranked store query →
//! ranked `SimilarMemory` list. Recall is a soft enhancement of story
//! generation: every failure in this module degrades (empty result or the
//! static example set), nothing propagates as an error.

use std::cmp::Ordering;

use uuid::Uuid;

use crate::embeddings::EmbeddingBackend;
use crate::lexical::lexical_embedding;
use crate::models::{MemoryEmbedding, SimilarMemory};
use crate::store::{MemoryStore, RecallFilter, DEFAULT_MIN_SIMILARITY};
use crate::vectors::{cosine_similarity, l2_normalize};

/// Caller-facing knobs; unset fields use the product defaults
/// (limit 5, threshold 0.7, no year restriction).
#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    pub limit: Option<u32>,
    pub min_similarity: Option<f32>,
    pub year: Option<i32>,
}

impl RecallOptions {
    fn to_filter(&self) -> RecallFilter {
        let defaults = RecallFilter::default();
        RecallFilter {
            limit: self.limit.map(i64::from).unwrap_or(defaults.limit),
            min_similarity: self.min_similarity.unwrap_or(DEFAULT_MIN_SIMILARITY),
            year: self.year,
        }
    }
}

/// Find the most relevant past memories for `owner_id` given a free-text
/// query.
///
/// Degenerate cases all resolve to benign values: empty query → empty list,
/// no candidates or all below threshold → empty list, store outage → the
/// static example set. The embedding step cannot fail the call either; a
/// backend error is recovered with the deterministic lexical embedding.
pub async fn find_similar_memories(
    query: &str,
    owner_id: &str,
    opts: &RecallOptions,
    store: &dyn MemoryStore,
    backend: &dyn EmbeddingBackend,
) -> Vec<SimilarMemory> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }

    let mut query_vector = match backend.embed_query(query).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Query embedding failed — using lexical fallback");
            lexical_embedding(query)
        }
    };
    // The stored side is pre-normalized; normalize the query so the store's
    // dot-product similarity is a true cosine.
    l2_normalize(&mut query_vector);

    let filter = opts.to_filter();

    match store.find_similar(owner_id, &query_vector, &filter).await {
        Ok(results) => results,
        Err(e) => {
            tracing::warn!(
                owner_id = owner_id,
                error = %e,
                "Recall query unavailable — serving example memories"
            );
            degraded_example_memories(&filter)
        }
    }
}

/// Reference ranking over in-memory candidates: cosine similarity, strict
/// `> min_similarity` threshold, similarity descending, most-recent
/// `created_at` first on exact ties, truncated to the clamped limit.
///
/// `PgMemoryStore` expresses the same contract in SQL; non-SQL stores and the
/// ordering tests use this definition directly.
pub fn rank_candidates(
    query: &[f32],
    candidates: &[MemoryEmbedding],
    filter: &RecallFilter,
) -> Vec<SimilarMemory> {
    let mut scored: Vec<(f32, &MemoryEmbedding)> = candidates
        .iter()
        .filter(|r| filter.year.map_or(true, |y| r.year == y))
        .map(|r| (cosine_similarity(query, r.embedding.as_slice()), r))
        .filter(|(similarity, _)| *similarity > filter.min_similarity)
        .collect();

    scored.sort_by(|(sim_a, rec_a), (sim_b, rec_b)| {
        sim_b
            .partial_cmp(sim_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| rec_b.created_at.cmp(&rec_a.created_at))
    });

    scored
        .into_iter()
        .take(filter.clamped_limit() as usize)
        .map(|(similarity, r)| SimilarMemory {
            memory_id: r.source_memory_id,
            caption: r.content.clone(),
            image_url: r.image_url.clone(),
            similarity,
            month: r.month,
            year: r.year,
        })
        .collect()
}

/// Small fixed result set served when the recall query itself is unavailable,
/// so narrative generation proceeds with generic (rather than zero)
/// personalization.
fn degraded_example_memories(filter: &RecallFilter) -> Vec<SimilarMemory> {
    let examples = [
        (5, 2024, "A sunny afternoon playing at the park"),
        (7, 2024, "Building a blanket fort in the living room"),
        (11, 2023, "Baking cookies together for the holidays"),
    ];

    examples
        .iter()
        .take(filter.clamped_limit() as usize)
        .map(|(month, year, caption)| SimilarMemory {
            memory_id: Uuid::nil(),
            caption: (*caption).to_string(),
            image_url: None,
            similarity: 0.0,
            month: *month,
            year: *year,
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
