use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct FableConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub recall: RecallConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Embedding provider settings. The API key is deliberately not read from the
/// process environment here: the caller constructs a `ProviderConfig`
/// explicitly so test doubles and provider swaps never touch global state.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingSettings {
    pub backend: String,
    pub model: String,
    pub base_url: String,
    pub dimensions: u32,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: "hosted-fallback-lexical".to_string(),
            model: "text-embedding-v1".to_string(),
            base_url: "https://api.fableforge.app/v1/embeddings".to_string(),
            dimensions: crate::lexical::EMBEDDING_DIMENSIONS as u32,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecallConfig {
    pub default_limit: u32,
    pub min_similarity: f32,
    pub max_caption_chars: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            min_similarity: 0.7,
            max_caption_chars: 4000,
        }
    }
}

impl FableConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recall_defaults_match_product_contract() {
        let recall = RecallConfig::default();
        assert_eq!(recall.default_limit, 5);
        assert!((recall.min_similarity - 0.7).abs() < f32::EPSILON);
        assert_eq!(recall.max_caption_chars, 4000);
    }

    #[test]
    fn embedding_defaults_use_lexical_dimensionality() {
        let embedding = EmbeddingSettings::default();
        assert_eq!(
            embedding.dimensions as usize,
            crate::lexical::EMBEDDING_DIMENSIONS
        );
        assert_eq!(embedding.backend, "hosted-fallback-lexical");
    }
}
