use std::time::Duration;

use crate::error::EmbedError;

/// Static identity of an embedding provider+model pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub provider_id: String,
    pub model_id: String,
    pub dimensions: usize,
    pub max_batch_size: usize,
    /// Whether the provider returns L2-normalized vectors itself, or
    /// normalization must be applied by the caller.
    pub normalized: bool,
}

/// Per-request options threaded through to a provider.
#[derive(Debug, Clone, Default)]
pub struct EmbedOptions {
    pub timeout: Option<Duration>,
    pub priority: Option<u8>,
    pub request_id: Option<String>,
}

/// Timing and size data returned alongside a batch of embeddings.
#[derive(Debug, Clone, Default)]
pub struct EmbedPerformance {
    pub duration: Duration,
    pub batch_size: usize,
}

/// Result of a single `embed_batch` call. `embeddings[i]` corresponds to
/// `texts[i]` from the request that produced it.
#[derive(Debug, Clone)]
pub struct EmbedResult {
    pub embeddings: Vec<Vec<f32>>,
    pub metadata: ProviderMetadata,
    pub performance: EmbedPerformance,
}

/// Liveness snapshot of a provider.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub ready: bool,
    pub last_error: Option<String>,
}

/// Running counters exposed by a provider for observability.
#[derive(Debug, Clone, Default)]
pub struct ProviderMetrics {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub texts_embedded: u64,
    pub mean_latency: Duration,
}

/// Uniform contract every embedding backend implements, dispatched behind
/// a trait object by the orchestrator so worker-pool and remote-HTTP
/// providers (and any future variant) are interchangeable.
pub trait EmbeddingProvider: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    /// Embed a batch of texts. Implementations MUST preserve input order
    /// in the returned `embeddings` vector and MUST split internally to
    /// `metadata().max_batch_size` if `texts` exceeds it.
    fn embed_batch(&self, texts: &[String], options: &EmbedOptions) -> Result<EmbedResult, EmbedError>;

    fn health(&self) -> ProviderHealth;

    fn metrics(&self) -> ProviderMetrics;
}
