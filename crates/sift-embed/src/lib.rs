pub mod breaker;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod provider;
pub mod rate_limiter;
pub mod resource_guard;
pub mod worker;
pub mod worker_pool;

pub use breaker::CircuitBreaker;
pub use error::EmbedError;
pub use http::HttpProvider;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use provider::{
    EmbedOptions, EmbedPerformance, EmbedResult, EmbeddingProvider, ProviderHealth,
    ProviderMetadata, ProviderMetrics,
};
pub use rate_limiter::TokenBucket;
pub use resource_guard::ResourceGuard;
pub use worker::WorkerProcess;
pub use worker_pool::{WorkerCommand, WorkerPoolProvider};
