use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::fulltext::FullTextStore;
use crate::graph::{GraphStore, SCHEMA_VERSION};
use crate::reconcile::{self, TierHeader, TierLocks};
use crate::vector::{ChunkVectorStore, VectorStore};

/// SQLite errors that indicate a corrupted or incompatible database file.
fn is_sqlite_corruption(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase
        ),
        _ => false,
    }
}

/// Default vector dimension (placeholder; real dimension comes from the embedding model).
const DEFAULT_VECTOR_DIMENSION: usize = 384;

/// Unified facade over GraphStore, VectorStore, ChunkVectorStore, and
/// FullTextStore.
///
/// Owns the `.sift/` directory and coordinates initialization, corruption
/// recovery, two-tier (local/global) reconciliation, and access to all
/// storage backends.
pub struct StorageManager {
    graph: GraphStore,
    vector: VectorStore,
    chunk_vector: ChunkVectorStore,
    fulltext: FullTextStore,
    root: PathBuf,
    global_root: Option<PathBuf>,
    provider_id: Option<String>,
    model_id: Option<String>,
    /// Held for the lifetime of the store; released on drop.
    _locks: Option<TierLocks>,
}

impl StorageManager {
    /// Open or create the storage directory at `<project_root>/.sift/`,
    /// reconciling it against the user-global tier for this repository.
    ///
    /// If the directory exists but any backend fails integrity checks
    /// (schema version mismatch, corrupted SQLite, unusable indexes), the
    /// local `.sift/` directory is purged and re-initialized.
    ///
    /// Reads the vector dimension from the tier header if one exists,
    /// otherwise uses the default (384).
    pub fn open(project_root: &Path) -> Result<Self, StorageError> {
        let dim = reconcile::read_header(&project_root.join(".sift"))
            .map(|h| h.dimensions)
            .unwrap_or(DEFAULT_VECTOR_DIMENSION);
        Self::open_with_dimension(project_root, dim)
    }

    /// Open or create with an explicit vector dimension, and no embedding
    /// provider/model identity tracked for compatibility checks.
    pub fn open_with_dimension(
        project_root: &Path,
        vector_dimension: usize,
    ) -> Result<Self, StorageError> {
        Self::open_with_provider(project_root, vector_dimension, None, None)
    }

    /// Open or create, tracking the embedding provider and model identity
    /// used to detect schema/model mismatches between tiers.
    pub fn open_with_provider(
        project_root: &Path,
        vector_dimension: usize,
        provider_id: Option<&str>,
        model_id: Option<&str>,
    ) -> Result<Self, StorageError> {
        let root = project_root.join(".sift");

        let outcome = reconcile::reconcile(
            &root,
            project_root,
            SCHEMA_VERSION,
            vector_dimension,
            provider_id,
            model_id,
        )?;

        let mgr = match Self::try_open(&root, vector_dimension) {
            Ok(mgr) => mgr,
            Err(e) if Self::should_purge(&e) => {
                Self::purge(&root)?;
                Self::try_open(&root, vector_dimension)?
            }
            Err(e) => return Err(e),
        };

        let header = TierHeader::now(SCHEMA_VERSION, vector_dimension, provider_id, model_id);
        reconcile::write_header(&root, &header)?;

        Ok(Self {
            global_root: outcome.global_root,
            provider_id: provider_id.map(str::to_string),
            model_id: model_id.map(str::to_string),
            _locks: Some(outcome.locks),
            ..mgr
        })
    }

    /// Attempt to open all backends from an `.sift/` directory. Creates the
    /// directory structure if it doesn't exist.
    fn try_open(root: &Path, vector_dimension: usize) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root)?;

        let db_path = root.join("db.sqlite");
        let tantivy_path = root.join("tantivy");
        let vector_path = root.join("vectors.usearch");
        let chunk_vector_path = root.join("chunk_vectors.usearch");

        let graph = GraphStore::open(&db_path)?;
        let fulltext = FullTextStore::open(&tantivy_path)?;
        let vector = VectorStore::open(&vector_path, vector_dimension)?;
        let chunk_vector = ChunkVectorStore::open(&chunk_vector_path, vector_dimension)?;

        Ok(Self {
            graph,
            vector,
            chunk_vector,
            fulltext,
            root: root.to_path_buf(),
            global_root: None,
            provider_id: None,
            model_id: None,
            _locks: None,
        })
    }

    /// Decide whether an error warrants purging the entire `.sift/` directory.
    fn should_purge(err: &StorageError) -> bool {
        match err {
            StorageError::SchemaMismatch { .. }
            | StorageError::VectorIndexUnavailable { .. }
            | StorageError::FullTextIndexUnavailable { .. } => true,
            StorageError::Sqlite(e) => is_sqlite_corruption(e),
            StorageError::Tantivy(_) => true,
            _ => false,
        }
    }

    /// Delete the entire `.sift/` directory.
    fn purge(root: &Path) -> Result<(), StorageError> {
        if root.exists() {
            std::fs::remove_dir_all(root)?;
        }
        Ok(())
    }

    /// Borrow the graph store.
    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// Mutably borrow the graph store.
    pub fn graph_mut(&mut self) -> &mut GraphStore {
        &mut self.graph
    }

    /// Borrow the vector store.
    pub fn vector(&self) -> &VectorStore {
        &self.vector
    }

    /// Mutably borrow the vector store.
    pub fn vector_mut(&mut self) -> &mut VectorStore {
        &mut self.vector
    }

    /// Borrow the chunk-level vector store.
    pub fn chunk_vector(&self) -> &ChunkVectorStore {
        &self.chunk_vector
    }

    /// Mutably borrow the chunk-level vector store.
    pub fn chunk_vector_mut(&mut self) -> &mut ChunkVectorStore {
        &mut self.chunk_vector
    }

    /// Borrow the full-text store.
    pub fn fulltext(&self) -> &FullTextStore {
        &self.fulltext
    }

    /// Mutably borrow the full-text store.
    pub fn fulltext_mut(&mut self) -> &mut FullTextStore {
        &mut self.fulltext
    }

    /// The `.sift/` directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The user-global tier directory for this repository, if one could be
    /// resolved (requires a usable `dirs::cache_dir()`).
    pub fn global_root(&self) -> Option<&Path> {
        self.global_root.as_deref()
    }

    /// Persist all backends that require explicit flushing, then lazily
    /// sync the local tier up to the global tier (if one is configured).
    ///
    /// - Commits pending Tantivy documents.
    /// - Saves both vector indexes to disk.
    /// - Copies the local `.sift/` directory over the global tier so the
    ///   next open elsewhere sees this session's writes within `T_stale`.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.fulltext.commit()?;
        let vector_path = self.root.join("vectors.usearch");
        self.vector.save(&vector_path)?;
        let chunk_vector_path = self.root.join("chunk_vectors.usearch");
        self.chunk_vector.save(&chunk_vector_path)?;

        let header = TierHeader::now(
            SCHEMA_VERSION,
            self.vector.dimension(),
            self.provider_id.as_deref(),
            self.model_id.as_deref(),
        );
        reconcile::write_header(&self.root, &header)?;

        if let Some(global_root) = &self.global_root {
            reconcile::sync_tier(&self.root, global_root)?;
            reconcile::write_header(global_root, &header)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::{CodeRelation, CodeSymbol, Language, RelationKind, SymbolId, SymbolKind};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn make_symbol(name: &str, file: &str, byte_start: usize, byte_end: usize) -> CodeSymbol {
        CodeSymbol {
            id: SymbolId::generate("test-repo", file, name, byte_start, byte_end),
            name: name.to_string(),
            qualified_name: name.to_string(),
            kind: SymbolKind::Function,
            language: Language::Python,
            file_path: PathBuf::from(file),
            byte_range: byte_start..byte_end,
            line_range: 0..10,
            signature: Some(format!("def {name}()")),
            doc_comment: None,
            body_hash: 42,
            body_text: None,
        }
    }

    #[test]
    fn open_creates_directory_structure() {
        let tmp = TempDir::new().unwrap();
        let mgr = StorageManager::open(tmp.path()).unwrap();

        assert!(mgr.root().exists());
        assert!(mgr.root().join("db.sqlite").exists());
        assert!(mgr.root().join("tantivy").exists());
    }

    #[test]
    fn open_idempotent() {
        let tmp = TempDir::new().unwrap();
        let _mgr1 = StorageManager::open(tmp.path()).unwrap();
        drop(_mgr1);
        let _mgr2 = StorageManager::open(tmp.path()).unwrap();
    }

    #[test]
    fn corrupted_sqlite_triggers_purge_and_rebuild() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join(".sift");

        let mgr = StorageManager::open(tmp.path()).unwrap();
        drop(mgr);

        // Corrupt the SQLite db
        std::fs::write(root.join("db.sqlite"), b"not a sqlite database").unwrap();

        // Re-open should detect corruption, purge, and rebuild
        let mgr = StorageManager::open(tmp.path()).unwrap();
        assert!(mgr.root().join("db.sqlite").exists());
    }

    #[test]
    fn flush_persists_state() {
        let tmp = TempDir::new().unwrap();
        let mut mgr = StorageManager::open(tmp.path()).unwrap();
        mgr.flush().unwrap();
    }

    #[test]
    fn full_lifecycle_integration() {
        let tmp = TempDir::new().unwrap();

        let sym_a = make_symbol("process_data", "src/main.py", 0, 100);
        let sym_b = make_symbol("validate_input", "src/main.py", 200, 350);
        let sym_c = make_symbol("format_output", "src/utils.py", 0, 80);

        let relation = CodeRelation {
            source_id: sym_a.id,
            target_id: sym_b.id,
            kind: RelationKind::Calls,
            file_path: PathBuf::from("src/main.py"),
            line: 5,
            confidence: RelationKind::Calls.default_confidence(),
            strength: RelationKind::Calls.default_strength(),
        };

        // Phase 1: open, populate, flush, close
        {
            let mut mgr = StorageManager::open(tmp.path()).unwrap();

            // Insert symbols into graph
            mgr.graph_mut()
                .insert_symbols(&[sym_a.clone(), sym_b.clone(), sym_c.clone()], 1000)
                .unwrap();
            mgr.graph_mut()
                .insert_relations(&[relation], 1000)
                .unwrap();

            // Index into fulltext
            mgr.fulltext_mut()
                .add_document(&sym_a, Some("def process_data(): validate_input()"))
                .unwrap();
            mgr.fulltext_mut()
                .add_document(&sym_b, Some("def validate_input(): pass"))
                .unwrap();
            mgr.fulltext_mut()
                .add_document(&sym_c, Some("def format_output(): pass"))
                .unwrap();

            // Query graph before close
            let fetched = mgr.graph().get_symbol(sym_a.id).unwrap().unwrap();
            assert_eq!(fetched.name, "process_data");

            let file_syms = mgr.graph().get_symbols_by_file("src/main.py").unwrap();
            assert_eq!(file_syms.len(), 2);

            // Query fulltext before close
            mgr.fulltext_mut().commit().unwrap();
            let hits = mgr
                .fulltext()
                .search_bm25("process", 10, None, None)
                .unwrap();
            assert!(!hits.is_empty());
            assert_eq!(hits[0].symbol_id, sym_a.id);

            // K-hop traversal: sym_a calls sym_b
            use crate::graph::TraversalDirection;
            let neighbors = mgr
                .graph()
                .traverse_khop(sym_a.id, 1, 50, TraversalDirection::Outgoing)
                .unwrap();
            assert_eq!(neighbors.len(), 1);
            assert_eq!(neighbors[0].symbol_id, sym_b.id);

            mgr.flush().unwrap();
        }

        // Phase 2: reopen and verify data persisted
        {
            let mgr = StorageManager::open(tmp.path()).unwrap();

            // Graph data survived
            let fetched = mgr.graph().get_symbol(sym_a.id).unwrap().unwrap();
            assert_eq!(fetched.name, "process_data");

            let fetched_c = mgr.graph().get_symbol(sym_c.id).unwrap().unwrap();
            assert_eq!(fetched_c.name, "format_output");

            let file_syms = mgr.graph().get_symbols_by_file("src/main.py").unwrap();
            assert_eq!(file_syms.len(), 2);

            // Fulltext data survived
            let hits = mgr
                .fulltext()
                .search_bm25("validate", 10, None, None)
                .unwrap();
            assert!(!hits.is_empty());
            assert_eq!(hits[0].symbol_id, sym_b.id);

            // Language filter
            let py_hits = mgr
                .fulltext()
                .search_bm25("format", 10, None, Some(Language::Python))
                .unwrap();
            assert!(!py_hits.is_empty());
            assert_eq!(py_hits[0].symbol_id, sym_c.id);
        }
    }
}
