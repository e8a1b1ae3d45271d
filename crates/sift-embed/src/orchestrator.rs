use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::error::EmbedError;
use crate::provider::{EmbedOptions, EmbedResult, EmbeddingProvider};
use crate::rate_limiter::TokenBucket;
use crate::resource_guard::ResourceGuard;

const WINDOW_SIZE: usize = 50;
const SUCCESS_RATE_HIGH: f64 = 0.95;
const SUCCESS_RATE_LOW: f64 = 0.85;

/// Tunables for the orchestrator's adaptive-concurrency controller and
/// retry policy. Defaults mirror the component design's named constants.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub n_min: usize,
    pub n_max: usize,
    pub n_initial: usize,
    pub target_latency_low: Duration,
    pub target_latency_high: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            n_min: 1,
            n_max: 16,
            n_initial: 4,
            target_latency_low: Duration::from_millis(200),
            target_latency_high: Duration::from_millis(1500),
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

/// A simple counting semaphore whose capacity can shrink or grow at
/// runtime, backing the orchestrator's adaptive concurrency limit.
struct AdaptiveSemaphore {
    available: Mutex<usize>,
    limit: AtomicUsize,
    condvar: Condvar,
}

impl AdaptiveSemaphore {
    fn new(initial: usize) -> Self {
        Self {
            available: Mutex::new(initial),
            limit: AtomicUsize::new(initial),
            condvar: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut available = self.available.lock().unwrap();
        while *available == 0 {
            available = self.condvar.wait(available).unwrap();
        }
        *available -= 1;
    }

    fn release(&self) {
        let mut available = self.available.lock().unwrap();
        *available += 1;
        self.condvar.notify_one();
    }

    /// Grow or shrink capacity by `delta` permits (signed), clamped by the
    /// caller to `[n_min, n_max]`. A shrink only reduces future acquires;
    /// permits already handed out are not recalled.
    fn resize_to(&self, new_limit: usize) {
        let mut available = self.available.lock().unwrap();
        let old_limit = self.limit.swap(new_limit, Ordering::SeqCst);
        if new_limit > old_limit {
            *available += new_limit - old_limit;
            self.condvar.notify_all();
        } else {
            let shrink = old_limit - new_limit;
            *available = available.saturating_sub(shrink);
        }
    }

    fn current_limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }
}

struct Sample {
    success: bool,
    latency: Duration,
}

struct ProviderSlot {
    provider: Arc<dyn EmbeddingProvider>,
    breaker: CircuitBreaker,
    rate_limiter: TokenBucket,
}

/// Drives a primary embedding provider (optionally backed by a fallback)
/// through rate limiting, a circuit breaker, adaptive concurrency, and
/// exponential-backoff retries. Dimensions and model id of the fallback
/// must match the primary's or failover is refused at construction.
pub struct Orchestrator {
    primary: ProviderSlot,
    fallback: Option<ProviderSlot>,
    config: OrchestratorConfig,
    semaphore: AdaptiveSemaphore,
    window: Mutex<VecDeque<Sample>>,
    resource_guard: Option<ResourceGuard>,
}

impl Orchestrator {
    pub fn new(
        primary: Arc<dyn EmbeddingProvider>,
        primary_rate_limit: (u32, u32),
        config: OrchestratorConfig,
    ) -> Self {
        let n_initial = config.n_initial.clamp(config.n_min, config.n_max);
        Self {
            primary: ProviderSlot {
                provider: primary,
                breaker: CircuitBreaker::with_defaults(),
                rate_limiter: TokenBucket::new(primary_rate_limit.0, primary_rate_limit.1),
            },
            fallback: None,
            semaphore: AdaptiveSemaphore::new(n_initial),
            window: Mutex::new(VecDeque::with_capacity(WINDOW_SIZE)),
            resource_guard: None,
            config,
        }
    }

    /// Configure a fallback provider, rejecting it if its dimensions or
    /// model id diverge from the primary's.
    pub fn with_fallback(
        mut self,
        fallback: Arc<dyn EmbeddingProvider>,
        fallback_rate_limit: (u32, u32),
    ) -> Result<Self, EmbedError> {
        let primary_meta = self.primary.provider.metadata();
        let fallback_meta = fallback.metadata();
        if primary_meta.dimensions != fallback_meta.dimensions
            || primary_meta.model_id != fallback_meta.model_id
        {
            return Err(EmbedError::ModelMismatch {
                expected: primary_meta.model_id.clone(),
                actual: fallback_meta.model_id.clone(),
            });
        }
        self.fallback = Some(ProviderSlot {
            provider: fallback,
            breaker: CircuitBreaker::with_defaults(),
            rate_limiter: TokenBucket::new(fallback_rate_limit.0, fallback_rate_limit.1),
        });
        Ok(self)
    }

    pub fn with_resource_guard(mut self, guard: ResourceGuard) -> Self {
        self.resource_guard = Some(guard);
        self
    }

    pub fn current_concurrency(&self) -> usize {
        self.semaphore.current_limit()
    }

    /// Embed a batch of texts, preserving input order, applying rate
    /// limiting, the circuit breaker, retries, and failover.
    #[tracing::instrument(skip(self, texts, options), fields(batch_size = texts.len()))]
    pub fn embed_batch(&self, texts: &[String], options: &EmbedOptions) -> Result<EmbedResult, EmbedError> {
        self.semaphore.acquire();
        let result = self.embed_with_failover(texts, options);
        self.semaphore.release();

        if let Err(e) = &result {
            tracing::warn!(error = %e, "embed_batch failed");
        }

        let (success, latency) = match &result {
            Ok(r) => (true, r.performance.duration),
            Err(e) if e.is_retryable() => (false, Duration::default()),
            Err(_) => (false, Duration::default()),
        };
        self.record_sample(success, latency);
        result
    }

    fn embed_with_failover(&self, texts: &[String], options: &EmbedOptions) -> Result<EmbedResult, EmbedError> {
        match self.embed_via(&self.primary, texts, options) {
            Ok(r) => Ok(r),
            Err(primary_err) => {
                if let Some(fallback) = &self.fallback {
                    return self.embed_via(fallback, texts, options);
                }
                Err(primary_err)
            }
        }
    }

    fn embed_via(&self, slot: &ProviderSlot, texts: &[String], options: &EmbedOptions) -> Result<EmbedResult, EmbedError> {
        let provider_id = slot.provider.metadata().provider_id.clone();

        if !slot.breaker.allow_request() {
            return Err(EmbedError::ProviderUnavailable { provider_id });
        }

        let mut attempt = 0;
        loop {
            slot.rate_limiter.acquire();
            match slot.provider.embed_batch(texts, options) {
                Ok(result) => {
                    slot.breaker.record_success();
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = self.config.base_backoff * 2u32.pow(attempt - 1);
                    let jitter = Duration::from_millis(fastrand_jitter_ms(backoff));
                    std::thread::sleep(backoff + jitter);
                }
                Err(e) => {
                    slot.breaker.record_failure();
                    return Err(e);
                }
            }
        }
    }

    fn record_sample(&self, success: bool, latency: Duration) {
        let mut window = self.window.lock().unwrap();
        if window.len() >= WINDOW_SIZE {
            window.pop_front();
        }
        window.push_back(Sample { success, latency });

        if window.len() < WINDOW_SIZE {
            return;
        }

        let successes = window.iter().filter(|s| s.success).count();
        let success_rate = successes as f64 / window.len() as f64;
        let median_latency = median_of(&window);

        let n = self.semaphore.current_limit();
        if success_rate > SUCCESS_RATE_HIGH && median_latency < self.config.target_latency_low {
            let scaled = (n + 1).min(self.config.n_max);
            tracing::debug!(from = n, to = scaled, success_rate, "scaling concurrency up");
            self.semaphore.resize_to(scaled);
        } else if success_rate < SUCCESS_RATE_LOW || median_latency > self.config.target_latency_high {
            let scaled = n.saturating_sub(1).max(self.config.n_min);
            tracing::debug!(from = n, to = scaled, success_rate, "scaling concurrency down");
            self.semaphore.resize_to(scaled);
        }
    }

    /// Apply the aggressive 50%-cut adaptive-concurrency rule on a hard
    /// rate-limit/timeout signal, bypassing the sliding-window average.
    pub fn report_rate_limited(&self) {
        let n = self.semaphore.current_limit();
        let scaled = (n / 2).max(self.config.n_min);
        self.semaphore.resize_to(scaled);
    }

    /// Let the resource guard grow or shrink an in-process worker pool
    /// alongside the semaphore limit. No-op if no guard was configured.
    pub fn maybe_rescale_workers(&self, worker_count: usize) -> i8 {
        match &self.resource_guard {
            Some(guard) if guard.can_scale_up(worker_count) => 1,
            Some(guard) if guard.should_scale_down() => -1,
            _ => 0,
        }
    }
}

fn median_of(window: &VecDeque<Sample>) -> Duration {
    let mut latencies: Vec<Duration> = window.iter().map(|s| s.latency).collect();
    latencies.sort();
    latencies
        .get(latencies.len() / 2)
        .copied()
        .unwrap_or_default()
}

/// Deterministic-enough jitter without pulling in a dedicated RNG crate:
/// derives a small offset from the backoff duration itself so repeated
/// calls don't all wake at the exact same instant.
fn fastrand_jitter_ms(backoff: Duration) -> u64 {
    (backoff.as_nanos() as u64).wrapping_mul(2654435761) % (backoff.as_millis() as u64 + 1).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EmbedPerformance, ProviderHealth, ProviderMetadata, ProviderMetrics};
    use std::sync::atomic::{AtomicBool, AtomicU32};

    struct FlakyProvider {
        metadata: ProviderMetadata,
        fail_next: AtomicBool,
        calls: AtomicU32,
    }

    impl EmbeddingProvider for FlakyProvider {
        fn metadata(&self) -> &ProviderMetadata {
            &self.metadata
        }

        fn embed_batch(&self, texts: &[String], _options: &EmbedOptions) -> Result<EmbedResult, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(EmbedError::Timeout {
                    provider_id: self.metadata.provider_id.clone(),
                    elapsed_ms: 1,
                });
            }
            Ok(EmbedResult {
                embeddings: texts.iter().map(|_| vec![0.0; self.metadata.dimensions]).collect(),
                metadata: self.metadata.clone(),
                performance: EmbedPerformance {
                    duration: Duration::from_millis(1),
                    batch_size: texts.len(),
                },
            })
        }

        fn health(&self) -> ProviderHealth {
            ProviderHealth {
                ready: true,
                last_error: None,
            }
        }

        fn metrics(&self) -> ProviderMetrics {
            ProviderMetrics::default()
        }
    }

    fn meta(id: &str) -> ProviderMetadata {
        ProviderMetadata {
            provider_id: id.to_string(),
            model_id: "test-model".to_string(),
            dimensions: 4,
            max_batch_size: 100,
            normalized: true,
        }
    }

    #[test]
    fn retries_transient_failure_then_succeeds() {
        let provider = Arc::new(FlakyProvider {
            metadata: meta("flaky"),
            fail_next: AtomicBool::new(true),
            calls: AtomicU32::new(0),
        });
        let orch = Orchestrator::new(provider.clone(), (1000, 1000), OrchestratorConfig::default());

        let result = orch.embed_batch(&["hello".to_string()], &EmbedOptions::default());
        assert!(result.is_ok());
        assert!(provider.calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn breaker_opens_after_repeated_failures() {
        let provider = Arc::new(FlakyProvider {
            metadata: meta("always-fails"),
            fail_next: AtomicBool::new(true),
            calls: AtomicU32::new(0),
        });
        let mut config = OrchestratorConfig::default();
        config.max_retries = 0;
        let orch = Orchestrator::new(provider.clone(), (1000, 1000), config);

        for _ in 0..5 {
            provider.fail_next.store(true, Ordering::SeqCst);
            let _ = orch.embed_batch(&["x".to_string()], &EmbedOptions::default());
        }
        assert!(orch.primary.breaker.is_open());

        let before = provider.calls.load(Ordering::SeqCst);
        let result = orch.embed_batch(&["x".to_string()], &EmbedOptions::default());
        assert!(matches!(result, Err(EmbedError::ProviderUnavailable { .. })));
        assert_eq!(provider.calls.load(Ordering::SeqCst), before);
    }

    #[test]
    fn failover_routes_to_fallback_when_primary_open() {
        let primary = Arc::new(FlakyProvider {
            metadata: meta("primary"),
            fail_next: AtomicBool::new(true),
            calls: AtomicU32::new(0),
        });
        let fallback = Arc::new(FlakyProvider {
            metadata: meta("fallback"),
            fail_next: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        });
        let mut config = OrchestratorConfig::default();
        config.max_retries = 0;
        let orch = Orchestrator::new(primary.clone(), (1000, 1000), config)
            .with_fallback(fallback.clone(), (1000, 1000))
            .unwrap();

        for _ in 0..5 {
            primary.fail_next.store(true, Ordering::SeqCst);
            let _ = orch.embed_batch(&["x".to_string()], &EmbedOptions::default());
        }
        assert!(orch.primary.breaker.is_open());

        let result = orch
            .embed_batch(&["x".to_string()], &EmbedOptions::default())
            .unwrap();
        assert_eq!(result.metadata.provider_id, "fallback");
    }
}
