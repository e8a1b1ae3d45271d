pub mod embedding;
pub mod error;
pub mod incremental;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod watcher;

pub use embedding::{build_orchestrator, embed_chunks, EmbeddingConfig};
pub use incremental::{
    delete_file as incremental_delete, diff_chunks, diff_symbols, process_events, update_file,
    ChunkDiff, IncrementalReport, SymbolDiff,
};
pub use sift_parser::{ChunkConfig, chunk_file};
pub use pipeline::{index, index_incremental, IncrementalIndexResult};
pub use report::{IndexConfig, IndexReport, SkipReason};
pub use resolver::ResolutionStats;
pub use scanner::scan_files;
pub use watcher::{start_watching, ChangeEvent, WatcherHandle};
