//! Embedding backends for the Memory Jar — hosted provider + lexical fallback
//!
//! Provides an `EmbeddingBackend` trait with implementations for:
//! - **Hosted** — the versioned cloud embedding model (384-dim)
//! - **Lexical** — deterministic offline pseudo-embedding (`lexical` module)
//! - **Hosted-fallback-lexical** — hosted with silent degradation to lexical
//!
//! Provider failure is modeled as an explicit `Result` internally; the single
//! place it is mapped to the fallback is `FallbackEmbeddingClient::embed`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::EmbeddingSettings;
use crate::lexical::{lexical_embedding, LexicalEmbeddingClient, EMBEDDING_DIMENSIONS};
use crate::vectors::l2_normalize;

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a caption for storage.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a recall query. Defaults to `embed()`; backends that distinguish
    /// document and query inputs can override.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    /// Returns the embedding dimension (384 in the reference deployment).
    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Embedding generation errors. These never escape the fallback wrapper; the
/// recall and memorize paths only ever see a usable vector.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Provider returned a degenerate (zero) embedding")]
    DegenerateVector,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

// ============================================================================
// Config types
// ============================================================================

/// Hosted embedding provider configuration. Constructed explicitly by the
/// caller — the library never reads keys from the process environment.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub dimensions: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl ProviderConfig {
    pub fn from_settings(settings: &EmbeddingSettings, api_key: String) -> Self {
        Self {
            api_key,
            model: settings.model.clone(),
            base_url: settings.base_url.clone(),
            dimensions: settings.dimensions as usize,
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
        }
    }
}

/// Configuration union for the backend factory.
pub enum BackendConfig {
    Hosted(ProviderConfig),
    Lexical,
    HostedFallbackLexical(Option<ProviderConfig>),
}

/// Create the appropriate backend from configuration.
pub fn create_backend(config: BackendConfig) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    match config {
        BackendConfig::Hosted(c) => Ok(Box::new(HostedEmbeddingClient::new(c)?)),
        BackendConfig::Lexical => Ok(Box::new(LexicalEmbeddingClient)),
        BackendConfig::HostedFallbackLexical(c) => Ok(Box::new(FallbackEmbeddingClient::new(c))),
    }
}

/// Create a backend from the `[embedding]` section of the application config.
///
/// `api_key` comes from the caller (secret management is theirs); `None` or an
/// empty key selects lexical-only behavior for the fallback backend.
pub fn backend_from_settings(
    settings: &EmbeddingSettings,
    api_key: Option<String>,
) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    let provider = api_key
        .filter(|k| !k.is_empty())
        .map(|k| ProviderConfig::from_settings(settings, k));

    let backend_cfg = match settings.backend.as_str() {
        "lexical" => BackendConfig::Lexical,
        "hosted" => BackendConfig::Hosted(provider.ok_or(EmbeddingError::MissingApiKey)?),
        // Default: "hosted-fallback-lexical"
        _ => BackendConfig::HostedFallbackLexical(provider),
    };

    create_backend(backend_cfg)
}

// ============================================================================
// Wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// HostedEmbeddingClient
// ============================================================================

/// Client for the hosted embedding model.
#[derive(Debug, Clone)]
pub struct HostedEmbeddingClient {
    client: Client,
    config: ProviderConfig,
}

impl HostedEmbeddingClient {
    pub fn new(config: ProviderConfig) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    /// Generate an embedding for the given text, retrying transient failures
    /// with exponential backoff.
    pub async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.embed_once(text)).await;

        match result {
            Ok(vec) => Ok(vec),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All embedding retry attempts failed"
                );
                Err(EmbeddingError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: text,
        };

        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<ProviderErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Embedding provider error");

            return Err(EmbeddingError::Api { code, message });
        }

        let body: EmbedResponse = response.json().await?;
        let mut values = body.embedding;

        if values.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: values.len(),
            });
        }

        // Providers usually return unit vectors already; re-normalize anyway
        // so cosine similarity downstream reduces to a dot product.
        if !l2_normalize(&mut values) {
            return Err(EmbeddingError::DegenerateVector);
        }

        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for HostedEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_raw(text).await
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "hosted"
    }
}

// ============================================================================
// FallbackEmbeddingClient
// ============================================================================

/// Wraps `HostedEmbeddingClient`. Any provider failure — and the unconfigured
/// case — degrades silently to the deterministic lexical embedding, so the
/// memory-save and recall flows never see an embedding error.
pub struct FallbackEmbeddingClient {
    inner: Option<HostedEmbeddingClient>,
}

impl FallbackEmbeddingClient {
    pub fn new(config: Option<ProviderConfig>) -> Self {
        let inner = match config {
            Some(c) if c.dimensions != EMBEDDING_DIMENSIONS => {
                // One deployment, one dimensionality: a provider that disagrees
                // with the lexical fallback would poison the stored vectors.
                tracing::warn!(
                    provider_dims = c.dimensions,
                    lexical_dims = EMBEDDING_DIMENSIONS,
                    "Provider dimensionality mismatch — using lexical embeddings only"
                );
                None
            }
            Some(c) => match HostedEmbeddingClient::new(c) {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::warn!(error = %e, "Hosted provider not configured — using lexical embeddings only");
                    None
                }
            },
            None => None,
        };

        Self { inner }
    }
}

#[async_trait]
impl EmbeddingBackend for FallbackEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let client = match &self.inner {
            Some(client) => client,
            // Unconfigured is the expected offline mode, not a failure.
            None => return Ok(lexical_embedding(text)),
        };

        // The single decision point mapping provider failure to the fallback.
        match client.embed_raw(text).await {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Hosted embedding failed — using deterministic lexical fallback"
                );
                Ok(lexical_embedding(text))
            }
        }
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn name(&self) -> &str {
        "hosted-fallback-lexical"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::l2_norm;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str, base_url: &str) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.to_string(),
            model: "text-embedding-v1".to_string(),
            base_url: format!("{}/v1/embeddings", base_url),
            dimensions: EMBEDDING_DIMENSIONS,
            max_retries: 3,
            retry_delay_ms: 10,
        }
    }

    fn mock_embedding_response() -> serde_json::Value {
        let values: Vec<f32> = (0..EMBEDDING_DIMENSIONS)
            .map(|i| (i as f32 + 1.0) / EMBEDDING_DIMENSIONS as f32)
            .collect();
        serde_json::json!({ "embedding": values })
    }

    #[tokio::test]
    async fn test_embed_calls_api_and_returns_normalized_vector() {
        let mock_server = MockServer::start().await;
        let config = test_config("test-api-key", &mock_server.uri());
        let client = HostedEmbeddingClient::new(config).expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer test-api-key"))
            .and(body_json(serde_json::json!({
                "model": "text-embedding-v1",
                "input": "hello world"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_embedding_response()))
            .mount(&mock_server)
            .await;

        let result = client.embed_raw("hello world").await;

        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result.err());
        let embedding = result.unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIMENSIONS);
        assert!(
            (l2_norm(&embedding) - 1.0).abs() < 1e-5,
            "client must re-normalize provider vectors"
        );
    }

    #[tokio::test]
    async fn test_embed_returns_retry_exhausted_on_api_500() {
        let mock_server = MockServer::start().await;
        let config = test_config("test-api-key", &mock_server.uri());
        let client = HostedEmbeddingClient::new(config).expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "Internal server error" }
            })))
            .mount(&mock_server)
            .await;

        let result = client.embed_raw("hello world").await;

        match result {
            Err(EmbeddingError::RetryExhausted { attempts }) => {
                assert_eq!(attempts, 3, "Expected 3 retry attempts");
            }
            other => panic!("Expected RetryExhausted error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_embed_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let config = test_config("test-api-key", &mock_server.uri());
        let client = HostedEmbeddingClient::new(config).expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_embedding_response()))
            .mount(&mock_server)
            .await;

        let result = client.embed_raw("hello world").await;

        assert!(result.is_ok(), "Expected success after retry");
        assert_eq!(result.unwrap().len(), EMBEDDING_DIMENSIONS);
    }

    #[tokio::test]
    async fn test_client_fails_with_missing_api_key() {
        let config = test_config("", "http://localhost:9");
        let result = HostedEmbeddingClient::new(config);

        match result {
            Err(EmbeddingError::MissingApiKey) => {}
            _ => panic!("Expected MissingApiKey error"),
        }
    }

    #[tokio::test]
    async fn test_embed_rejects_wrong_dimensions() {
        let mock_server = MockServer::start().await;
        let config = test_config("test-api-key", &mock_server.uri());
        let client = HostedEmbeddingClient::new(config).expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": [0.1, 0.2, 0.3]
            })))
            .mount(&mock_server)
            .await;

        let result = client.embed_raw("hello world").await;

        match result {
            Err(EmbeddingError::RetryExhausted { .. }) => {
                // Dimension mismatch is not transient, so it exhausts retries.
            }
            Err(EmbeddingError::InvalidDimensions { expected, actual }) => {
                assert_eq!(expected, EMBEDDING_DIMENSIONS);
                assert_eq!(actual, 3);
            }
            other => panic!("Expected dimension error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_embed_rejects_malformed_body() {
        let mock_server = MockServer::start().await;
        let config = test_config("test-api-key", &mock_server.uri());
        let client = HostedEmbeddingClient::new(config).expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
            .mount(&mock_server)
            .await;

        let result = client.embed_raw("hello world").await;
        assert!(result.is_err(), "Malformed body must not produce a vector");
    }

    // --- FallbackEmbeddingClient ---

    #[tokio::test]
    async fn test_fallback_uses_lexical_on_provider_error() {
        let mock_server = MockServer::start().await;
        let mut config = test_config("test-key", &mock_server.uri());
        config.max_retries = 1;
        let fallback = FallbackEmbeddingClient::new(Some(config));

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "boom" }
            })))
            .mount(&mock_server)
            .await;

        let result = fallback.embed("a day at the beach").await;
        assert!(result.is_ok(), "Fallback must never propagate provider errors");
        assert_eq!(
            result.unwrap(),
            lexical_embedding("a day at the beach"),
            "degraded path must be the deterministic lexical embedding"
        );
        assert_eq!(fallback.name(), "hosted-fallback-lexical");
    }

    #[tokio::test]
    async fn test_fallback_unconfigured_is_lexical_only() {
        let fallback = FallbackEmbeddingClient::new(None);

        let result = fallback.embed("puppy in the garden").await.unwrap();
        assert_eq!(result, lexical_embedding("puppy in the garden"));
        assert_eq!(fallback.dimensions(), EMBEDDING_DIMENSIONS);
    }

    #[tokio::test]
    async fn test_fallback_rejects_mismatched_provider_dimensions() {
        let mut config = test_config("test-key", "http://localhost:9");
        config.dimensions = 768;
        let fallback = FallbackEmbeddingClient::new(Some(config));

        // The mismatched provider is discarded entirely; no HTTP call happens.
        let result = fallback.embed("hello").await.unwrap();
        assert_eq!(result, lexical_embedding("hello"));
    }

    #[tokio::test]
    async fn test_fallback_returns_provider_vector_on_success() {
        let mock_server = MockServer::start().await;
        let config = test_config("test-api-key", &mock_server.uri());
        let fallback = FallbackEmbeddingClient::new(Some(config));

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_embedding_response()))
            .mount(&mock_server)
            .await;

        let result = fallback.embed("hello").await.unwrap();
        assert_eq!(result.len(), EMBEDDING_DIMENSIONS);
        assert_ne!(result, lexical_embedding("hello"), "provider path should win");
    }

    // --- factory ---

    #[tokio::test]
    async fn test_backend_from_settings_selects_by_name() {
        let mut settings = EmbeddingSettings::default();

        settings.backend = "lexical".to_string();
        let backend = backend_from_settings(&settings, None).unwrap();
        assert_eq!(backend.name(), "lexical");

        settings.backend = "hosted-fallback-lexical".to_string();
        let backend = backend_from_settings(&settings, None).unwrap();
        assert_eq!(backend.name(), "hosted-fallback-lexical");

        settings.backend = "hosted".to_string();
        assert!(
            backend_from_settings(&settings, None).is_err(),
            "hosted without a key must fail construction"
        );
        let backend = backend_from_settings(&settings, Some("key".to_string())).unwrap();
        assert_eq!(backend.name(), "hosted");
    }
}
