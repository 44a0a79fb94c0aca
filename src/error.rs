use thiserror::Error;

#[derive(Error, Debug)]
pub enum FableError {
    #[error("Storage error: {0}")]
    Storage(#[from] crate::store::StorageError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embeddings::EmbeddingError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}
