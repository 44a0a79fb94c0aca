use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recallable unit of personal history. Immutable after write; replaced
/// wholesale by the `(owner_id, source_memory_id)` upsert.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MemoryEmbedding {
    pub id: Uuid,
    pub owner_id: String,
    /// Weak reference to the underlying photo/caption record.
    pub source_memory_id: Uuid,
    /// Unit-normalized (cosine similarity reduces to a dot product).
    pub embedding: Vector,
    pub content: String,
    /// Denormalized from the source memory so recall results carry the image
    /// without joining an out-of-scope table.
    pub image_url: Option<String>,
    pub tags: Vec<String>,
    /// 0-based month, 0 = January.
    pub month: i32,
    pub year: i32,
    pub created_at: DateTime<Utc>,
}

/// Input for the write path: the memory record itself has already been
/// persisted by the storefront; this carries what the embedding row needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    pub owner_id: String,
    pub source_memory_id: Uuid,
    pub caption: String,
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub month: i32,
    pub year: i32,
}

/// Ranked recall result handed to the narrative context builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarMemory {
    pub memory_id: Uuid,
    pub caption: String,
    pub image_url: Option<String>,
    pub similarity: f32,
    pub month: i32,
    pub year: i32,
}
