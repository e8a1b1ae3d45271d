use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::EmbedError;
use crate::provider::{
    EmbedOptions, EmbedPerformance, EmbedResult, EmbeddingProvider, ProviderHealth,
    ProviderMetadata, ProviderMetrics,
};

#[derive(Serialize)]
struct EmbedBatchRequest<'a> {
    texts: &'a [String],
    request_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct EmbedBatchResponseBody {
    embeddings: Vec<Vec<f32>>,
}

/// Remote embedding provider reached over HTTP. Speaks a single endpoint
/// contract: `POST {base_url}/embed_batch` with `{texts, request_id}`,
/// replying `{embeddings}`.
pub struct HttpProvider {
    metadata: ProviderMetadata,
    base_url: String,
    api_key: Option<String>,
    default_timeout: Duration,
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    texts_embedded: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl HttpProvider {
    pub fn new(
        metadata: ProviderMetadata,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            metadata,
            base_url: base_url.into(),
            api_key,
            default_timeout: Duration::from_secs(30),
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            texts_embedded: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }
}

impl EmbeddingProvider for HttpProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    fn embed_batch(&self, texts: &[String], options: &EmbedOptions) -> Result<EmbedResult, EmbedError> {
        let start = Instant::now();
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let url = format!("{}/embed_batch", self.base_url.trim_end_matches('/'));
        let timeout = options.timeout.unwrap_or(self.default_timeout);

        let mut request = ureq::post(&url).timeout(timeout);
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }

        let outcome = request.send_json(EmbedBatchRequest {
            texts,
            request_id: options.request_id.as_deref(),
        });

        let response = match outcome {
            Ok(resp) => resp,
            Err(e) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                let err = EmbedError::from(e);
                *self.last_error.lock().unwrap() = Some(err.to_string());
                return Err(err);
            }
        };

        let body: EmbedBatchResponseBody = response.into_json().map_err(|e| {
            let err = EmbedError::Internal(format!("malformed response body: {e}"));
            *self.last_error.lock().unwrap() = Some(err.to_string());
            err
        })?;

        if body.embeddings.len() != texts.len() {
            let err = EmbedError::Internal(format!(
                "provider returned {} embeddings for {} texts",
                body.embeddings.len(),
                texts.len()
            ));
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }

        self.texts_embedded
            .fetch_add(body.embeddings.len() as u64, Ordering::Relaxed);

        Ok(EmbedResult {
            embeddings: body.embeddings,
            metadata: self.metadata.clone(),
            performance: EmbedPerformance {
                duration: start.elapsed(),
                batch_size: texts.len(),
            },
        })
    }

    fn health(&self) -> ProviderHealth {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        match ureq::get(&url).timeout(Duration::from_secs(2)).call() {
            Ok(_) => ProviderHealth {
                ready: true,
                last_error: None,
            },
            Err(e) => ProviderHealth {
                ready: false,
                last_error: Some(e.to_string()),
            },
        }
    }

    fn metrics(&self) -> ProviderMetrics {
        ProviderMetrics {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            texts_embedded: self.texts_embedded.load(Ordering::Relaxed),
            mean_latency: Duration::default(),
        }
    }
}
