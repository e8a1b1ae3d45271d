pub mod error;
pub mod fulltext;
pub mod graph;
pub mod manager;
pub mod reconcile;
pub mod vector;

pub use error::StorageError;
pub use fulltext::FullTextStore;
pub use graph::{
    DiscoveredSymbol, FileMetadata, GraphStore, RepoMetadata, TraversalDirection, TraversalHit,
    TraversalPath, TraversalResult, TraversalStatistics, TraversedRelationship,
};
pub use manager::StorageManager;
pub use vector::{ChunkVectorHit, ChunkVectorStore, VectorHit, VectorStore};
