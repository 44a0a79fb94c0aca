pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod lexical;
pub mod memorize;
pub mod models;
pub mod recall;
pub mod store;
pub mod vectors;

pub use config::FableConfig;
pub use embeddings::{
    create_backend, BackendConfig, EmbeddingBackend, EmbeddingError, FallbackEmbeddingClient,
    HostedEmbeddingClient, ProviderConfig,
};
pub use error::FableError;
pub use lexical::{LexicalEmbeddingClient, EMBEDDING_DIMENSIONS};
pub use models::{MemoryEmbedding, NewMemory, SimilarMemory};
pub use recall::{find_similar_memories, RecallOptions};
pub use store::{MemoryStore, PgMemoryStore, RecallFilter, StorageError};
