pub mod engine;
pub mod error;
pub mod mmr;

pub use engine::{
    CallChainNode, ChunkInfo, ContextChunk, ContextPackage, FunctionContext, RetrievalEngine,
    SearchQuery, SearchResult,
};
pub use error::RetrievalError;
pub use mmr::{MmrCandidate, MmrConfig, MmrMetrics, MmrSelection, SimilarityMetric};
