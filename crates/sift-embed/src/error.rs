/// Embedding errors.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("provider rate-limited: {provider_id}")]
    RateLimited { provider_id: String },

    #[error("provider unavailable: {provider_id} (breaker open)")]
    ProviderUnavailable { provider_id: String },

    #[error("model mismatch: expected {expected}, got {actual}")]
    ModelMismatch { expected: String, actual: String },

    #[error("request to {provider_id} timed out after {elapsed_ms}ms")]
    Timeout { provider_id: String, elapsed_ms: u64 },

    #[error("bad input: {reason}")]
    BadInput { reason: String },

    #[error("worker process error: {0}")]
    Worker(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] Box<ureq::Error>),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EmbedError {
    /// Whether a retry of the same request has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Io(_) | Self::Transport(_)
        )
    }
}

impl From<ureq::Error> for EmbedError {
    fn from(e: ureq::Error) -> Self {
        Self::Transport(Box::new(e))
    }
}
