//! Wires a `sift_embed::Orchestrator` into the indexing pipeline so
//! stored chunks get dense vectors without each pipeline stage having to
//! know about providers, worker pools, or retries.

use std::collections::HashMap;
use std::sync::Arc;

use sift_core::{ChunkId, CodeChunk};
use sift_embed::{
    EmbedOptions, EmbeddingProvider, Orchestrator, OrchestratorConfig, ProviderMetadata,
    WorkerCommand, WorkerPoolProvider,
};

use crate::error::IndexerError;

/// Configuration needed to stand up an embedding `Orchestrator` for a
/// single indexing run.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider_id: String,
    pub model_id: String,
    pub dimensions: usize,
    pub max_batch_size: usize,
    pub worker_command: WorkerCommand,
    pub pool_size: usize,
    pub rate_limit: (u32, u32),
}

/// Build an `Orchestrator` fronting a worker-pool provider per `cfg`.
///
/// Only a primary provider is configured here; a fallback can be layered
/// on by the caller via `Orchestrator::with_fallback` if one is wanted.
pub fn build_orchestrator(cfg: &EmbeddingConfig) -> Result<Orchestrator, IndexerError> {
    let metadata = ProviderMetadata {
        provider_id: cfg.provider_id.clone(),
        model_id: cfg.model_id.clone(),
        dimensions: cfg.dimensions,
        max_batch_size: cfg.max_batch_size,
        normalized: true,
    };
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(WorkerPoolProvider::new(
        metadata,
        cfg.worker_command.clone(),
        cfg.pool_size,
    )?);
    Ok(Orchestrator::new(
        provider,
        cfg.rate_limit,
        OrchestratorConfig::default(),
    ))
}

/// Embed a set of chunks, deduplicating by `content_hash` before calling
/// the orchestrator so chunks with identical content (common for
/// boilerplate and duplicated files) are embedded only once per run.
///
/// Cross-run reuse of vectors already stored for an identical hash is out
/// of scope here: `GraphStore::lookup_by_hash` answers "has this content
/// been seen before" at the chunk-record level, but there is no verified
/// API to reconstruct a stored vector by key from the HNSW index, so a
/// deduplicated hash still costs one embedding call per indexing run.
pub fn embed_chunks(
    orchestrator: &Orchestrator,
    chunks: &[CodeChunk],
) -> Result<Vec<(ChunkId, Vec<f32>)>, IndexerError> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let mut hash_to_index: HashMap<u64, usize> = HashMap::new();
    let mut unique_texts: Vec<String> = Vec::new();
    let mut hash_of_chunk: Vec<u64> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        hash_of_chunk.push(chunk.content_hash);
        hash_to_index.entry(chunk.content_hash).or_insert_with(|| {
            unique_texts.push(chunk.content.clone());
            unique_texts.len() - 1
        });
    }

    let result = orchestrator.embed_batch(&unique_texts, &EmbedOptions::default())?;

    let mut out = Vec::with_capacity(chunks.len());
    for (chunk, hash) in chunks.iter().zip(hash_of_chunk.iter()) {
        let idx = hash_to_index[hash];
        out.push((chunk.id, result.embeddings[idx].clone()));
    }
    Ok(out)
}
