use std::collections::HashMap;
use std::time::Duration;

use sift_parser::ChunkConfig;

use crate::embedding::EmbeddingConfig;

/// Configuration for the indexing pipeline.
pub struct IndexConfig {
    /// Repository identifier for SymbolId generation.
    pub repo_id: String,
    /// Batch size for SQLite bulk inserts (default: 1000).
    pub batch_size: usize,
    /// Dimension of embedding vectors this index was (or will be) built with.
    pub embedding_dim: usize,
    /// Whether to produce and store AST-aware chunks alongside symbols.
    pub chunk_enabled: bool,
    /// Chunking parameters, used only when `chunk_enabled` is set.
    pub chunk_config: ChunkConfig,
    /// Embedding provider configuration. When `None`, chunks are stored
    /// without vectors and embedding is left to an external caller.
    pub embedding: Option<EmbeddingConfig>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            repo_id: String::new(),
            batch_size: 1000,
            embedding_dim: 384,
            chunk_enabled: true,
            chunk_config: ChunkConfig::default(),
            embedding: None,
        }
    }
}

/// Reason why a file was skipped during indexing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SkipReason {
    TooLarge,
    Binary,
    UnsupportedLanguage,
    Ignored,
}

/// Report generated after a full indexing run.
#[derive(Debug)]
pub struct IndexReport {
    pub total_files_scanned: usize,
    pub files_indexed: usize,
    pub files_skipped: HashMap<SkipReason, usize>,
    pub files_failed: usize,
    pub failed_details: Vec<(String, String)>,
    pub total_symbols: usize,
    pub total_relations: usize,
    /// Relations whose target was resolved to a real symbol (including
    /// those already resolved at parse time).
    pub relations_resolved: usize,
    /// Relations whose cross-file target could not be matched to any symbol.
    pub relations_unresolved: usize,
    pub total_chunks: usize,
    pub duration: Duration,
}

impl IndexReport {
    pub fn total_skipped(&self) -> usize {
        self.files_skipped.values().sum()
    }
}
