//! Memory Store — durable per-owner storage of caption embeddings.
//!
//! The production implementation is `PgMemoryStore` over Postgres + pgvector;
//! the `MemoryStore` trait is the seam that lets recall run against test
//! doubles and keeps the similarity-ranked query an explicit contract
//! (`(query_vector, threshold, count, owner, year?)` → ranked tuples).

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{MemoryEmbedding, SimilarMemory};

/// Maximum allowed limit for recall results.
pub const MAX_LIMIT: i64 = 20;

/// Default limit when none specified.
pub const DEFAULT_LIMIT: i64 = 5;

/// Default similarity threshold; results at or below it are discarded.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.7;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Candidate restriction for the similarity-ranked query.
#[derive(Debug, Clone)]
pub struct RecallFilter {
    pub limit: i64,
    pub min_similarity: f32,
    pub year: Option<i32>,
}

impl Default for RecallFilter {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            year: None,
        }
    }
}

impl RecallFilter {
    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, MAX_LIMIT)
    }
}

/// Per-owner embedding persistence. `put` is an idempotent upsert keyed by
/// `(owner_id, source_memory_id)`; concurrent writes for the same key converge
/// last-write-wins, which is safe because embeddings derive purely from the
/// caption text.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn put(&self, record: MemoryEmbedding) -> Result<(), StorageError>;

    /// Owner-scoped similarity-ranked query: strict `> min_similarity`
    /// threshold, similarity descending, most-recent `created_at` tie-break.
    async fn find_similar(
        &self,
        owner_id: &str,
        query: &[f32],
        filter: &RecallFilter,
    ) -> Result<Vec<SimilarMemory>, StorageError>;

    /// Deletion when the owner deletes the underlying memory.
    async fn delete_by_source(
        &self,
        owner_id: &str,
        source_memory_id: Uuid,
    ) -> Result<u64, StorageError>;

    /// Deletion when the owner deletes the account.
    async fn delete_by_owner(&self, owner_id: &str) -> Result<u64, StorageError>;
}

fn validate(record: &MemoryEmbedding) -> Result<(), StorageError> {
    if !(0..=11).contains(&record.month) {
        return Err(StorageError::InvalidRecord(format!(
            "month {} out of range 0-11",
            record.month
        )));
    }
    if record.owner_id.is_empty() {
        return Err(StorageError::InvalidRecord("empty owner_id".to_string()));
    }
    Ok(())
}

// ============================================================================
// PgMemoryStore
// ============================================================================

/// Postgres + pgvector implementation. Schema lives in
/// `migrations/001_memory_embeddings.sql`.
#[derive(Debug, Clone)]
pub struct PgMemoryStore {
    pool: PgPool,
}

impl PgMemoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool from the `[database]` config section and wrap
    /// it as a store.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Check that Postgres is reachable and the `vector` extension is
    /// installed, returning both version strings for startup logging.
    pub async fn health_check(&self) -> Result<(String, String), StorageError> {
        let postgres: (String,) = sqlx::query_as("SELECT version()")
            .fetch_one(&self.pool)
            .await?;
        let pgvector: (String,) =
            sqlx::query_as("SELECT extversion FROM pg_extension WHERE extname = 'vector'")
                .fetch_one(&self.pool)
                .await?;
        Ok((postgres.0, pgvector.0))
    }
}

#[async_trait]
impl MemoryStore for PgMemoryStore {
    async fn put(&self, record: MemoryEmbedding) -> Result<(), StorageError> {
        validate(&record)?;

        sqlx::query(
            r#"
            INSERT INTO memory_embeddings
                (id, owner_id, source_memory_id, embedding, content, image_url, tags, month, year, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (owner_id, source_memory_id) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                content = EXCLUDED.content,
                image_url = EXCLUDED.image_url,
                tags = EXCLUDED.tags,
                month = EXCLUDED.month,
                year = EXCLUDED.year
            "#,
        )
        .bind(record.id)
        .bind(&record.owner_id)
        .bind(record.source_memory_id)
        .bind(&record.embedding)
        .bind(&record.content)
        .bind(&record.image_url)
        .bind(&record.tags)
        .bind(record.month)
        .bind(record.year)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_similar(
        &self,
        owner_id: &str,
        query: &[f32],
        filter: &RecallFilter,
    ) -> Result<Vec<SimilarMemory>, StorageError> {
        let vector = Vector::from(query.to_vec());

        // Stored vectors are pre-normalized, so 1 - cosine distance is the
        // cosine similarity. Ordering by distance ascending gives similarity
        // descending; created_at DESC breaks exact ties most-recent-first.
        let rows = sqlx::query_as::<_, (Uuid, String, Option<String>, Option<f64>, i32, i32)>(
            r#"
            SELECT
                source_memory_id,
                content,
                image_url,
                1 - (embedding <=> $1::vector) AS similarity,
                month,
                year
            FROM memory_embeddings
            WHERE owner_id = $2
              AND ($3::int4 IS NULL OR year = $3)
              AND 1 - (embedding <=> $1::vector) > $4::float8
            ORDER BY embedding <=> $1::vector ASC, created_at DESC
            LIMIT $5
            "#,
        )
        .bind(&vector)
        .bind(owner_id)
        .bind(filter.year)
        .bind(filter.min_similarity as f64)
        .bind(filter.clamped_limit())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(memory_id, caption, image_url, similarity, month, year)| SimilarMemory {
                    memory_id,
                    caption,
                    image_url,
                    similarity: similarity.unwrap_or(0.0) as f32,
                    month,
                    year,
                },
            )
            .collect())
    }

    async fn delete_by_source(
        &self,
        owner_id: &str,
        source_memory_id: Uuid,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM memory_embeddings WHERE owner_id = $1 AND source_memory_id = $2",
        )
        .bind(owner_id)
        .bind(source_memory_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_by_owner(&self, owner_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM memory_embeddings WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// ============================================================================
// In-memory test double
// ============================================================================

/// In-memory `MemoryStore` used by unit tests. Ranking goes through
/// `recall::rank_candidates`, the reference definition of the ordering
/// contract, so the double and the SQL path agree on semantics.
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemStore {
        records: Mutex<HashMap<(String, Uuid), MemoryEmbedding>>,
        fail: AtomicBool,
    }

    impl MemStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent call fail with `StorageError::Unavailable`.
        pub fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }

        pub fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }

        pub fn get(&self, owner_id: &str, source_memory_id: Uuid) -> Option<MemoryEmbedding> {
            self.records
                .lock()
                .unwrap()
                .get(&(owner_id.to_string(), source_memory_id))
                .cloned()
        }

        fn check_available(&self) -> Result<(), StorageError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("simulated outage".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MemoryStore for MemStore {
        async fn put(&self, record: MemoryEmbedding) -> Result<(), StorageError> {
            self.check_available()?;
            validate(&record)?;
            self.records
                .lock()
                .unwrap()
                .insert((record.owner_id.clone(), record.source_memory_id), record);
            Ok(())
        }

        async fn find_similar(
            &self,
            owner_id: &str,
            query: &[f32],
            filter: &RecallFilter,
        ) -> Result<Vec<SimilarMemory>, StorageError> {
            self.check_available()?;
            let records = self.records.lock().unwrap();
            let candidates: Vec<MemoryEmbedding> = records
                .values()
                .filter(|r| r.owner_id == owner_id)
                .cloned()
                .collect();
            Ok(crate::recall::rank_candidates(query, &candidates, filter))
        }

        async fn delete_by_source(
            &self,
            owner_id: &str,
            source_memory_id: Uuid,
        ) -> Result<u64, StorageError> {
            self.check_available()?;
            let removed = self
                .records
                .lock()
                .unwrap()
                .remove(&(owner_id.to_string(), source_memory_id));
            Ok(u64::from(removed.is_some()))
        }

        async fn delete_by_owner(&self, owner_id: &str) -> Result<u64, StorageError> {
            self.check_available()?;
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|(owner, _), _| owner != owner_id);
            Ok((before - records.len()) as u64)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::testutil::MemStore;
    use super::*;
    use chrono::Utc;

    fn record(owner: &str, source: Uuid, caption: &str, month: i32) -> MemoryEmbedding {
        let mut embedding = crate::lexical::lexical_embedding(caption);
        crate::vectors::l2_normalize(&mut embedding);
        MemoryEmbedding {
            id: Uuid::new_v4(),
            owner_id: owner.to_string(),
            source_memory_id: source,
            embedding: Vector::from(embedding),
            content: caption.to_string(),
            image_url: None,
            tags: vec![],
            month,
            year: 2024,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_is_an_idempotent_upsert() {
        let store = MemStore::new();
        let source = Uuid::new_v4();

        store
            .put(record("u1", source, "first caption", 3))
            .await
            .expect("first put");
        store
            .put(record("u1", source, "revised caption", 4))
            .await
            .expect("second put");

        assert_eq!(store.len(), 1, "same key must leave exactly one record");
        let stored = store.get("u1", source).expect("record present");
        assert_eq!(stored.content, "revised caption");
        assert_eq!(stored.month, 4);
    }

    #[tokio::test]
    async fn put_rejects_out_of_range_month() {
        let store = MemStore::new();
        let result = store.put(record("u1", Uuid::new_v4(), "caption", 12)).await;
        assert!(matches!(result, Err(StorageError::InvalidRecord(_))));

        let result = store.put(record("u1", Uuid::new_v4(), "caption", -1)).await;
        assert!(matches!(result, Err(StorageError::InvalidRecord(_))));
    }

    #[tokio::test]
    async fn delete_by_source_removes_one_record() {
        let store = MemStore::new();
        let source = Uuid::new_v4();
        store.put(record("u1", source, "one", 0)).await.unwrap();
        store
            .put(record("u1", Uuid::new_v4(), "two", 1))
            .await
            .unwrap();

        assert_eq!(store.delete_by_source("u1", source).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        // Deleting again is a no-op, not an error.
        assert_eq!(store.delete_by_source("u1", source).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_by_owner_only_touches_that_owner() {
        let store = MemStore::new();
        store
            .put(record("u1", Uuid::new_v4(), "one", 0))
            .await
            .unwrap();
        store
            .put(record("u1", Uuid::new_v4(), "two", 1))
            .await
            .unwrap();
        store
            .put(record("u2", Uuid::new_v4(), "other owner", 2))
            .await
            .unwrap();

        assert_eq!(store.delete_by_owner("u1").await.unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn filter_limit_is_clamped() {
        let filter = RecallFilter {
            limit: 100,
            ..Default::default()
        };
        assert_eq!(filter.clamped_limit(), MAX_LIMIT);

        let filter = RecallFilter {
            limit: 0,
            ..Default::default()
        };
        assert_eq!(filter.clamped_limit(), 1);
    }
}
