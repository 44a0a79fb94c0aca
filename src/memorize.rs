//! Write path — attaches an embedding to a freshly saved memory.
//!
//! The storefront persists the memory record (photo + caption) first; the
//! embedding row is a best-effort follow-up. `spawn_attach_embedding` runs it
//! in `tokio::spawn` so a slow provider call never blocks the primary save,
//! and a storage failure only degrades recall for that one entry.

use std::sync::Arc;

use chrono::Utc;
use pgvector::Vector;
use uuid::Uuid;

use crate::embeddings::EmbeddingBackend;
use crate::lexical::lexical_embedding;
use crate::models::{MemoryEmbedding, NewMemory};
use crate::store::{MemoryStore, StorageError};
use crate::vectors::{l2_norm, l2_normalize};

/// Norms this close to 1.0 are treated as already normalized.
const UNIT_NORM_TOLERANCE: f32 = 1e-6;

/// Cap untrusted caption length at a char boundary before embedding.
fn truncate_caption(caption: &str, max_chars: usize) -> String {
    if caption.chars().count() <= max_chars {
        return caption.to_string();
    }
    caption.chars().take(max_chars).collect()
}

/// Embed `new_memory`'s caption and upsert the embedding row.
///
/// Embedding cannot fail this call (backend errors recover to the lexical
/// fallback); a `StorageError` is returned for the caller to log — the
/// broader memory save has already committed elsewhere.
pub async fn attach_embedding(
    new_memory: NewMemory,
    store: &dyn MemoryStore,
    backend: &dyn EmbeddingBackend,
    max_caption_chars: usize,
) -> Result<Uuid, StorageError> {
    let caption = truncate_caption(&new_memory.caption, max_caption_chars);

    let mut embedding = match backend.embed(&caption).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Caption embedding failed — using lexical fallback");
            lexical_embedding(&caption)
        }
    };
    // Normalized-before-storage invariant. Vectors the backend already unit-
    // normalized (hosted and lexical both do) are stored bit-for-bit
    // unchanged; re-dividing by a norm of ~0.99999994 would shift the bits
    // and break fallback determinism.
    if (l2_norm(&embedding) - 1.0).abs() > UNIT_NORM_TOLERANCE {
        l2_normalize(&mut embedding);
    }

    let record = MemoryEmbedding {
        id: Uuid::new_v4(),
        owner_id: new_memory.owner_id,
        source_memory_id: new_memory.source_memory_id,
        embedding: Vector::from(embedding),
        content: caption,
        image_url: new_memory.image_url,
        tags: new_memory.tags,
        month: new_memory.month,
        year: new_memory.year,
        created_at: Utc::now(),
    };

    let id = record.id;
    store.put(record).await?;

    tracing::debug!(
        id = %id,
        backend = backend.name(),
        "Attached embedding to memory"
    );

    Ok(id)
}

/// Fire-and-forget variant for the memory-save flow. Storage failure is
/// logged and swallowed; recall for that entry is unavailable until the
/// attach is retried.
pub fn spawn_attach_embedding(
    new_memory: NewMemory,
    store: Arc<dyn MemoryStore>,
    backend: Arc<dyn EmbeddingBackend>,
    max_caption_chars: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let source = new_memory.source_memory_id;
        match attach_embedding(new_memory, store.as_ref(), backend.as_ref(), max_caption_chars)
            .await
        {
            Ok(id) => tracing::info!(id = %id, "Background embedding completed"),
            Err(e) => tracing::warn!(
                source_memory_id = %source,
                error = %e,
                "Embedding not stored — memory saved without recall for this entry"
            ),
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================
