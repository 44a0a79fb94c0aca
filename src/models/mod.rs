pub mod memory;

pub use memory::{MemoryEmbedding, NewMemory, SimilarMemory};
