use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use sift_core::{
    ChunkId, ChunkType, CodeChunk, CodeRelation, CodeSymbol, Language, RelationKind, SymbolId,
    SymbolKind,
};
use rusqlite::{params, Connection};
use xxhash_rust::xxh3::xxh3_128;

use crate::error::StorageError;

/// Current schema version. Increment when schema changes.
pub(crate) const SCHEMA_VERSION: u32 = 2;

/// Multiplier applied to a relationship's weight per additional hop of
/// distance from the traversal root: `w_k = w_{k-1} * HOP_DECAY`.
pub const DEFAULT_HOP_DECAY: f32 = 0.75;

/// Direction for graph traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    Outgoing,
    Incoming,
    Both,
}

/// A symbol discovered during k-hop traversal.
#[derive(Debug, Clone)]
pub struct TraversalHit {
    pub symbol_id: SymbolId,
    pub depth: u32,
    pub relation_kind: RelationKind,
    pub confidence: f32,
    pub strength: f32,
}

/// A symbol discovered during k-hop traversal, carrying the hop-decayed
/// weight accumulated along the path that discovered it.
#[derive(Debug, Clone)]
pub struct DiscoveredSymbol {
    pub symbol_id: SymbolId,
    pub depth: u32,
    pub weight: f32,
}

/// One relationship edge walked while building a `TraversalResult`.
#[derive(Debug, Clone)]
pub struct TraversedRelationship {
    pub source_id: SymbolId,
    pub target_id: SymbolId,
    pub relation_kind: RelationKind,
    pub depth: u32,
}

/// A reconstructed path from the traversal root to a discovered symbol,
/// root first.
#[derive(Debug, Clone)]
pub struct TraversalPath {
    pub target: SymbolId,
    pub nodes: Vec<SymbolId>,
}

/// Aggregate statistics describing one traversal run.
#[derive(Debug, Clone)]
pub struct TraversalStatistics {
    pub symbols_discovered: usize,
    pub relationships_traversed: usize,
    pub depth_distribution: HashMap<u32, usize>,
    pub relation_kind_distribution: HashMap<RelationKind, usize>,
    pub duration: std::time::Duration,
}

/// Structured output of a k-hop traversal: discovered symbols with
/// hop-decayed weights, the relationships walked to reach them, a
/// reconstructed path per symbol, and aggregate statistics.
#[derive(Debug, Clone)]
pub struct TraversalResult {
    pub discovered_symbols: Vec<DiscoveredSymbol>,
    pub traversed_relationships: Vec<TraversedRelationship>,
    pub paths: Vec<TraversalPath>,
    pub statistics: TraversalStatistics,
}

/// File metadata stored in the `files` table.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub path: String,
    pub content_hash: u64,
    pub language: Language,
    pub size_bytes: u64,
    pub symbol_count: u32,
    pub last_indexed: String,
    pub last_modified: String,
}

/// Repository metadata stored in the `repositories` table.
#[derive(Debug, Clone)]
pub struct RepoMetadata {
    pub id: String,
    pub path: String,
    pub name: String,
    pub created_at: String,
}

/// SQLite-backed graph storage for symbols and relations.
pub struct GraphStore {
    conn: Connection,
}

impl GraphStore {
    /// Open or create a graph store at the given SQLite database path.
    ///
    /// If the schema version doesn't match, returns `Err` so the caller
    /// can purge `.sift/` and retry.
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;
        configure_pragmas(&conn)?;

        let stored_version = get_user_version(&conn)?;
        if stored_version != 0 && stored_version != SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                actual: stored_version,
            });
        }

        create_schema(&conn)?;
        set_user_version(&conn, SCHEMA_VERSION)?;

        Ok(Self { conn })
    }

    /// Open an in-memory graph store (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        configure_pragmas(&conn)?;
        create_schema(&conn)?;
        set_user_version(&conn, SCHEMA_VERSION)?;
        Ok(Self { conn })
    }

    // -- Symbol CRUD --

    /// Insert symbols in batched transactions.
    /// `batch_size`: 1000 for bulk, 100 for incremental.
    pub fn insert_symbols(
        &mut self,
        symbols: &[CodeSymbol],
        batch_size: usize,
    ) -> Result<(), StorageError> {
        let now = now_rfc3339();
        for chunk in symbols.chunks(batch_size) {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO symbols \
                     (id, name, qualified_name, kind, language, file_path, \
                      line_start, line_end, byte_start, byte_end, \
                      signature, doc_comment, body_hash, body_text, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                )?;
                for sym in chunk {
                    stmt.execute(params![
                        sym.id.as_bytes().as_slice(),
                        sym.name,
                        sym.qualified_name,
                        sym.kind.ordinal() as i64,
                        sym.language.ordinal() as i64,
                        sym.file_path.to_string_lossy().as_ref(),
                        sym.line_range.start as i64,
                        sym.line_range.end as i64,
                        sym.byte_range.start as i64,
                        sym.byte_range.end as i64,
                        sym.signature.as_deref(),
                        sym.doc_comment.as_deref(),
                        sym.body_hash as i64,
                        sym.body_text.as_deref(),
                        &now,
                        &now,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// Update existing symbols in batched transactions (no FK cascade).
    ///
    /// Unlike `insert_symbols` which uses `INSERT OR REPLACE` (triggering
    /// `ON DELETE CASCADE`), this uses `UPDATE` to preserve cross-file
    /// relations pointing to the modified symbols.
    pub fn update_symbols(
        &mut self,
        symbols: &[CodeSymbol],
        batch_size: usize,
    ) -> Result<(), StorageError> {
        let now = now_rfc3339();
        for chunk in symbols.chunks(batch_size) {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "UPDATE symbols SET \
                     name = ?2, qualified_name = ?3, kind = ?4, language = ?5, \
                     file_path = ?6, line_start = ?7, line_end = ?8, \
                     byte_start = ?9, byte_end = ?10, \
                     signature = ?11, doc_comment = ?12, body_hash = ?13, body_text = ?14, \
                     updated_at = ?15 \
                     WHERE id = ?1",
                )?;
                for sym in chunk {
                    stmt.execute(params![
                        sym.id.as_bytes().as_slice(),
                        sym.name,
                        sym.qualified_name,
                        sym.kind.ordinal() as i64,
                        sym.language.ordinal() as i64,
                        sym.file_path.to_string_lossy().as_ref(),
                        sym.line_range.start as i64,
                        sym.line_range.end as i64,
                        sym.byte_range.start as i64,
                        sym.byte_range.end as i64,
                        sym.signature.as_deref(),
                        sym.doc_comment.as_deref(),
                        sym.body_hash as i64,
                        sym.body_text.as_deref(),
                        &now,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// Query a symbol by its ID.
    pub fn get_symbol(&self, id: SymbolId) -> Result<Option<CodeSymbol>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, qualified_name, kind, language, file_path, \
             line_start, line_end, byte_start, byte_end, \
             signature, doc_comment, body_hash, body_text \
             FROM symbols WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.as_bytes().as_slice()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_symbol(row)?)),
            None => Ok(None),
        }
    }

    /// Query all symbols for a given file path.
    pub fn get_symbols_by_file(&self, file_path: &str) -> Result<Vec<CodeSymbol>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, qualified_name, kind, language, file_path, \
             line_start, line_end, byte_start, byte_end, \
             signature, doc_comment, body_hash, body_text \
             FROM symbols WHERE file_path = ?1",
        )?;
        let mut rows = stmt.query(params![file_path])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_symbol(row)?);
        }
        Ok(results)
    }

    /// Query symbols by name (exact match).
    pub fn get_symbols_by_name(&self, name: &str) -> Result<Vec<CodeSymbol>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, qualified_name, kind, language, file_path, \
             line_start, line_end, byte_start, byte_end, \
             signature, doc_comment, body_hash, body_text \
             FROM symbols WHERE name = ?1",
        )?;
        let mut rows = stmt.query(params![name])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_symbol(row)?);
        }
        Ok(results)
    }

    /// Query symbols by qualified name (exact match).
    pub fn get_symbols_by_qualified_name(
        &self,
        qualified_name: &str,
    ) -> Result<Vec<CodeSymbol>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, qualified_name, kind, language, file_path, \
             line_start, line_end, byte_start, byte_end, \
             signature, doc_comment, body_hash, body_text \
             FROM symbols WHERE qualified_name = ?1",
        )?;
        let mut rows = stmt.query(params![qualified_name])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_symbol(row)?);
        }
        Ok(results)
    }

    /// List all symbols with pagination, ordered by ID for deterministic iteration.
    pub fn list_symbols(&self, limit: usize, offset: usize) -> Result<Vec<CodeSymbol>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, qualified_name, kind, language, file_path, \
             line_start, line_end, byte_start, byte_end, \
             signature, doc_comment, body_hash, body_text \
             FROM symbols ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;
        let mut rows = stmt.query(params![limit as i64, offset as i64])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_symbol(row)?);
        }
        Ok(results)
    }

    /// Count total number of symbols in the store.
    pub fn count_symbols(&self) -> Result<usize, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM symbols",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete a symbol by ID. Relations are cascaded via ON DELETE CASCADE.
    pub fn delete_symbol(&mut self, id: SymbolId) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM symbols WHERE id = ?1",
            params![id.as_bytes().as_slice()],
        )?;
        Ok(affected > 0)
    }

    /// Delete all relations that reference a given file path (in the relation's file_path column).
    pub fn delete_relations_by_file(&mut self, file_path: &str) -> Result<usize, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM relations WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(affected)
    }

    /// Delete all symbols (and cascading relations) for a file path.
    pub fn delete_symbols_by_file(&mut self, file_path: &str) -> Result<usize, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM symbols WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(affected)
    }

    /// Replace a file's symbols and relations atomically in a single
    /// transaction: delete `file_path`'s old symbols and relations, then
    /// insert `symbols` and `relations`. A reader can never observe the
    /// file with its old symbols gone but the new ones not yet in place.
    pub fn replace_file(
        &mut self,
        file_path: &str,
        symbols: &[CodeSymbol],
        relations: &[CodeRelation],
    ) -> Result<(), StorageError> {
        let now = now_rfc3339();
        let tx = self.conn.transaction()?;
        {
            tx.execute("DELETE FROM relations WHERE file_path = ?1", params![file_path])?;
            tx.execute("DELETE FROM symbols WHERE file_path = ?1", params![file_path])?;

            let mut sym_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO symbols \
                 (id, name, qualified_name, kind, language, file_path, \
                  line_start, line_end, byte_start, byte_end, \
                  signature, doc_comment, body_hash, body_text, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;
            for sym in symbols {
                sym_stmt.execute(params![
                    sym.id.as_bytes().as_slice(),
                    sym.name,
                    sym.qualified_name,
                    sym.kind.ordinal() as i64,
                    sym.language.ordinal() as i64,
                    sym.file_path.to_string_lossy().as_ref(),
                    sym.line_range.start as i64,
                    sym.line_range.end as i64,
                    sym.byte_range.start as i64,
                    sym.byte_range.end as i64,
                    sym.signature.as_deref(),
                    sym.doc_comment.as_deref(),
                    sym.body_hash as i64,
                    sym.body_text.as_deref(),
                    &now,
                    &now,
                ])?;
            }
            drop(sym_stmt);

            let mut rel_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO relations \
                 (id, source_id, target_id, kind, file_path, line, confidence, strength) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for rel in relations {
                let rel_id = compute_relation_id(rel);
                rel_stmt.execute(params![
                    rel_id.as_slice(),
                    rel.source_id.as_bytes().as_slice(),
                    rel.target_id.as_bytes().as_slice(),
                    rel.kind.ordinal() as i64,
                    rel.file_path.to_string_lossy().as_ref(),
                    rel.line as i64,
                    rel.confidence as f64,
                    rel.strength as f64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // -- Relation CRUD --

    /// Insert relations in batched transactions.
    pub fn insert_relations(
        &mut self,
        relations: &[CodeRelation],
        batch_size: usize,
    ) -> Result<(), StorageError> {
        for chunk in relations.chunks(batch_size) {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO relations \
                     (id, source_id, target_id, kind, file_path, line, confidence, strength) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for rel in chunk {
                    let rel_id = compute_relation_id(rel);
                    stmt.execute(params![
                        rel_id.as_slice(),
                        rel.source_id.as_bytes().as_slice(),
                        rel.target_id.as_bytes().as_slice(),
                        rel.kind.ordinal() as i64,
                        rel.file_path.to_string_lossy().as_ref(),
                        rel.line as i64,
                        rel.confidence as f64,
                        rel.strength as f64,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// K-hop graph traversal with cycle detection.
    ///
    /// Uses iterative BFS in Rust (not recursive CTE) for reliable cycle
    /// detection and per-node fanout limiting.
    pub fn traverse_khop(
        &self,
        start: SymbolId,
        max_depth: u32,
        max_fanout: u32,
        direction: TraversalDirection,
    ) -> Result<Vec<TraversalHit>, StorageError> {
        self.traverse_khop_filtered(start, max_depth, max_fanout, direction, None)
    }

    /// K-hop graph traversal restricted to a subset of relation kinds.
    ///
    /// `relation_kinds`: when `Some`, only relations whose kind is in the
    /// slice are followed. `None` follows every kind (same behavior as
    /// `traverse_khop`).
    pub fn traverse_khop_filtered(
        &self,
        start: SymbolId,
        max_depth: u32,
        max_fanout: u32,
        direction: TraversalDirection,
        relation_kinds: Option<&[RelationKind]>,
    ) -> Result<Vec<TraversalHit>, StorageError> {
        let max_depth = max_depth.min(5);
        let mut visited = std::collections::HashSet::new();
        visited.insert(start.0);

        let mut frontier: Vec<SymbolId> = vec![start];
        let mut results = Vec::new();

        for depth in 1..=max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next_frontier = Vec::new();

            for sym_id in &frontier {
                let neighbors =
                    self.get_neighbors(*sym_id, direction, max_fanout, relation_kinds)?;
                for neighbor in neighbors {
                    if visited.insert(neighbor.symbol_id.0) {
                        next_frontier.push(neighbor.symbol_id);
                        results.push(TraversalHit {
                            depth,
                            ..neighbor
                        });
                    }
                }
            }

            frontier = next_frontier;
        }

        Ok(results)
    }

    fn get_neighbors(
        &self,
        sym_id: SymbolId,
        direction: TraversalDirection,
        max_fanout: u32,
        relation_kinds: Option<&[RelationKind]>,
    ) -> Result<Vec<TraversalHit>, StorageError> {
        let id_bytes = sym_id.as_bytes();
        let mut results = Vec::new();

        if direction == TraversalDirection::Outgoing || direction == TraversalDirection::Both {
            let mut stmt = self.conn.prepare_cached(
                "SELECT target_id, kind, confidence, strength FROM relations \
                 WHERE source_id = ?1 LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![id_bytes.as_slice(), max_fanout as i64])?;
            while let Some(row) = rows.next()? {
                if let Some(hit) = parse_neighbor_row(row)? {
                    if relation_kinds.is_none_or(|kinds| kinds.contains(&hit.relation_kind)) {
                        results.push(hit);
                    }
                }
            }
        }

        if direction == TraversalDirection::Incoming || direction == TraversalDirection::Both {
            let remaining = max_fanout.saturating_sub(results.len() as u32);
            if remaining > 0 {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT source_id, kind, confidence, strength FROM relations \
                     WHERE target_id = ?1 LIMIT ?2",
                )?;
                let mut rows = stmt.query(params![id_bytes.as_slice(), remaining as i64])?;
                while let Some(row) = rows.next()? {
                    if let Some(hit) = parse_neighbor_row(row)? {
                        if relation_kinds.is_none_or(|kinds| kinds.contains(&hit.relation_kind)) {
                            results.push(hit);
                        }
                    }
                }
            }
        }

        Ok(results)
    }

    /// K-hop traversal that returns the full structured result: discovered
    /// symbols with hop-decayed weights, the relationships walked, a
    /// reconstructed path per symbol, and run statistics.
    ///
    /// `hop_decay` multiplies a relationship's `strength` once per
    /// additional hop from `start`, so a symbol reached at depth `k` via a
    /// chain of relationships `r_1..r_k` gets weight
    /// `r_1.strength * hop_decay^0 * r_2.strength * hop_decay^1 * ...`.
    pub fn traverse_khop_with_result(
        &self,
        start: SymbolId,
        max_depth: u32,
        max_fanout: u32,
        direction: TraversalDirection,
        relation_kinds: Option<&[RelationKind]>,
        hop_decay: f32,
    ) -> Result<TraversalResult, StorageError> {
        let started = Instant::now();
        let max_depth = max_depth.min(5);

        let mut visited = std::collections::HashSet::new();
        visited.insert(start.0);

        // parent[sym] = (predecessor, relation walked to reach sym)
        let mut parent: HashMap<SymbolId, (SymbolId, TraversedRelationship)> = HashMap::new();
        let mut weight_at: HashMap<SymbolId, f32> = HashMap::new();
        weight_at.insert(start, 1.0);

        let mut discovered: Vec<DiscoveredSymbol> = Vec::new();
        let mut traversed: Vec<TraversedRelationship> = Vec::new();

        let mut frontier: Vec<SymbolId> = vec![start];

        for depth in 1..=max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next_frontier = Vec::new();

            for sym_id in &frontier {
                let neighbors = self.get_neighbors(*sym_id, direction, max_fanout, relation_kinds)?;
                let parent_weight = *weight_at.get(sym_id).unwrap_or(&1.0);
                let decay = hop_decay.powi((depth - 1) as i32);

                for neighbor in neighbors {
                    let edge = TraversedRelationship {
                        source_id: *sym_id,
                        target_id: neighbor.symbol_id,
                        relation_kind: neighbor.relation_kind,
                        depth,
                    };
                    traversed.push(edge.clone());

                    if visited.insert(neighbor.symbol_id.0) {
                        let weight = parent_weight * neighbor.strength * decay;
                        weight_at.insert(neighbor.symbol_id, weight);
                        parent.insert(neighbor.symbol_id, (*sym_id, edge));
                        next_frontier.push(neighbor.symbol_id);
                        discovered.push(DiscoveredSymbol {
                            symbol_id: neighbor.symbol_id,
                            depth,
                            weight,
                        });
                    }
                }
            }

            frontier = next_frontier;
        }

        let mut paths = Vec::with_capacity(discovered.len());
        for sym in &discovered {
            let mut nodes = vec![sym.symbol_id];
            let mut cur = sym.symbol_id;
            while let Some((pred, _)) = parent.get(&cur) {
                nodes.push(*pred);
                cur = *pred;
                if cur == start {
                    break;
                }
            }
            nodes.reverse();
            paths.push(TraversalPath {
                target: sym.symbol_id,
                nodes,
            });
        }

        let mut depth_distribution: HashMap<u32, usize> = HashMap::new();
        let mut relation_kind_distribution: HashMap<RelationKind, usize> = HashMap::new();
        for sym in &discovered {
            *depth_distribution.entry(sym.depth).or_insert(0) += 1;
        }
        for edge in &traversed {
            *relation_kind_distribution.entry(edge.relation_kind).or_insert(0) += 1;
        }

        Ok(TraversalResult {
            statistics: TraversalStatistics {
                symbols_discovered: discovered.len(),
                relationships_traversed: traversed.len(),
                depth_distribution,
                relation_kind_distribution,
                duration: started.elapsed(),
            },
            discovered_symbols: discovered,
            traversed_relationships: traversed,
            paths,
        })
    }

    // -- Chunk CRUD --

    /// Insert chunks in batched transactions.
    pub fn insert_chunks(
        &mut self,
        chunks: &[CodeChunk],
        batch_size: usize,
    ) -> Result<(), StorageError> {
        for batch in chunks.chunks(batch_size) {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO chunks \
                     (id, file_path, language, byte_start, byte_end, line_start, line_end, \
                      chunk_index, total_chunks, context_path, content, content_hash, chunk_type) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )?;
                for chunk in batch {
                    stmt.execute(params![
                        chunk.id.as_bytes().as_slice(),
                        chunk.file_path.to_string_lossy().as_ref(),
                        chunk.language.ordinal() as i64,
                        chunk.byte_range.start as i64,
                        chunk.byte_range.end as i64,
                        chunk.line_range.start as i64,
                        chunk.line_range.end as i64,
                        chunk.chunk_index as i64,
                        chunk.total_chunks as i64,
                        chunk.context_path,
                        chunk.content,
                        chunk.content_hash as i64,
                        chunk.chunk_type.ordinal() as i64,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// Query all chunks for a given file path, ordered by chunk index.
    pub fn get_chunks_by_file(&self, file_path: &str) -> Result<Vec<CodeChunk>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, file_path, language, byte_start, byte_end, line_start, line_end, \
             chunk_index, total_chunks, context_path, content, content_hash, chunk_type \
             FROM chunks WHERE file_path = ?1 ORDER BY chunk_index",
        )?;
        let mut rows = stmt.query(params![file_path])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_chunk(row)?);
        }
        Ok(results)
    }

    /// Delete all chunks for a file path.
    pub fn delete_chunks_by_file(&mut self, file_path: &str) -> Result<usize, StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM chunks WHERE file_path = ?1", params![file_path])?;
        Ok(affected)
    }

    /// Delete a specific set of chunks by ID, used by incremental reindexing
    /// to drop only the chunks whose content actually changed.
    pub fn delete_chunks_by_ids(&mut self, ids: &[ChunkId]) -> Result<usize, StorageError> {
        let mut affected = 0;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM chunks WHERE id = ?1")?;
            for id in ids {
                affected += stmt.execute(params![id.as_bytes().as_slice()])?;
            }
        }
        tx.commit()?;
        Ok(affected)
    }

    /// Look up a single chunk by its ID.
    pub fn get_chunk(&self, id: ChunkId) -> Result<Option<CodeChunk>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, file_path, language, byte_start, byte_end, line_start, line_end, \
             chunk_index, total_chunks, context_path, content, content_hash, chunk_type \
             FROM chunks WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.as_bytes().as_slice()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_chunk(row)?)),
            None => Ok(None),
        }
    }

    /// Look up a chunk by its content hash, backed by `idx_chunks_hash`.
    ///
    /// Used as the chunk-level constant-time reuse check during incremental
    /// updates: if a chunk with identical content already exists anywhere
    /// in the index, its embedding can be reused instead of recomputed.
    /// When several chunks share a hash (content duplicated verbatim), the
    /// first match by ID is returned.
    pub fn lookup_by_hash(&self, content_hash: u64) -> Result<Option<CodeChunk>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, file_path, language, byte_start, byte_end, line_start, line_end, \
             chunk_index, total_chunks, context_path, content, content_hash, chunk_type \
             FROM chunks WHERE content_hash = ?1 ORDER BY id LIMIT 1",
        )?;
        let mut rows = stmt.query(params![content_hash as i64])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_chunk(row)?)),
            None => Ok(None),
        }
    }

    /// Replace the chunk set for a file atomically: delete exactly the
    /// chunks named in `to_remove` and insert `to_add`, in one transaction.
    /// Chunks whose content is unchanged are named in neither list and are
    /// left untouched, preserving any attached embedding.
    pub fn replace_chunks_for_file(
        &mut self,
        to_remove: &[ChunkId],
        to_add: &[CodeChunk],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        {
            let mut del_stmt = tx.prepare_cached("DELETE FROM chunks WHERE id = ?1")?;
            for id in to_remove {
                del_stmt.execute(params![id.as_bytes().as_slice()])?;
            }

            let mut ins_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO chunks \
                 (id, file_path, language, byte_start, byte_end, line_start, line_end, \
                  chunk_index, total_chunks, context_path, content, content_hash, chunk_type) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for chunk in to_add {
                ins_stmt.execute(params![
                    chunk.id.as_bytes().as_slice(),
                    chunk.file_path.to_string_lossy().as_ref(),
                    chunk.language.ordinal() as i64,
                    chunk.byte_range.start as i64,
                    chunk.byte_range.end as i64,
                    chunk.line_range.start as i64,
                    chunk.line_range.end as i64,
                    chunk.chunk_index as i64,
                    chunk.total_chunks as i64,
                    chunk.context_path,
                    chunk.content,
                    chunk.content_hash as i64,
                    chunk.chunk_type.ordinal() as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete only summary chunks (`context_path == "__file_summary__"`) for a file path.
    pub fn delete_summary_chunks_by_file(&mut self, file_path: &str) -> Result<usize, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM chunks WHERE file_path = ?1 AND context_path = '__file_summary__'",
            params![file_path],
        )?;
        Ok(affected)
    }

    /// Count total number of chunks in the store.
    pub fn count_chunks(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// List chunks with pagination, ordered by ID for deterministic iteration.
    /// Used to page embedding work over the full chunk set.
    pub fn list_chunks(&self, limit: usize, offset: usize) -> Result<Vec<CodeChunk>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, file_path, language, byte_start, byte_end, line_start, line_end, \
             chunk_index, total_chunks, context_path, content, content_hash, chunk_type \
             FROM chunks ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;
        let mut rows = stmt.query(params![limit as i64, offset as i64])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_chunk(row)?);
        }
        Ok(results)
    }

    // -- File metadata --

    pub fn upsert_file(&mut self, meta: &FileMetadata) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO files \
             (path, content_hash, language, size_bytes, symbol_count, last_indexed, last_modified) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                meta.path,
                meta.content_hash as i64,
                meta.language.ordinal() as i64,
                meta.size_bytes as i64,
                meta.symbol_count as i64,
                meta.last_indexed,
                meta.last_modified,
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileMetadata>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT path, content_hash, language, size_bytes, symbol_count, \
             last_indexed, last_modified FROM files WHERE path = ?1",
        )?;
        let mut rows = stmt.query(params![path])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_file_metadata(row)?)),
            None => Ok(None),
        }
    }

    /// List all tracked files, used to classify added/modified/deleted
    /// files during incremental indexing.
    pub fn list_files(&self) -> Result<Vec<FileMetadata>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT path, content_hash, language, size_bytes, symbol_count, \
             last_indexed, last_modified FROM files",
        )?;
        let mut rows = stmt.query([])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_file_metadata(row)?);
        }
        Ok(results)
    }

    pub fn get_file_by_content_hash(
        &self,
        content_hash: u64,
    ) -> Result<Vec<FileMetadata>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT path, content_hash, language, size_bytes, symbol_count, \
             last_indexed, last_modified FROM files WHERE content_hash = ?1",
        )?;
        let mut rows = stmt.query(params![content_hash as i64])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_file_metadata(row)?);
        }
        Ok(results)
    }

    pub fn delete_file(&mut self, path: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(affected > 0)
    }

    // -- Repository metadata --

    pub fn upsert_repo(&mut self, meta: &RepoMetadata) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO repositories (id, path, name, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![meta.id, meta.path, meta.name, meta.created_at],
        )?;
        Ok(())
    }

    pub fn get_repo(&self, id: &str) -> Result<Option<RepoMetadata>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, path, name, created_at FROM repositories WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(RepoMetadata {
                id: row.get(0)?,
                path: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })),
            None => Ok(None),
        }
    }

    /// Delete all symbols, relations, and chunks from the store.
    ///
    /// Used before a full reindex to ensure no stale entries from deleted
    /// files persist. Leaves file/repository metadata untouched.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "DELETE FROM relations; DELETE FROM chunks; DELETE FROM symbols;",
        )?;
        Ok(())
    }

    /// Expose the raw connection for advanced usage (e.g., testing).
    #[doc(hidden)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn configure_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\
         PRAGMA busy_timeout = 5000;\
         PRAGMA synchronous = NORMAL;\
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(())
}

fn get_user_version(conn: &Connection) -> Result<u32, StorageError> {
    let v: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(v)
}

fn set_user_version(conn: &Connection, version: u32) -> Result<(), StorageError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn create_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS symbols (
            id          BLOB PRIMARY KEY,
            name        TEXT NOT NULL,
            qualified_name TEXT NOT NULL,
            kind        INTEGER NOT NULL,
            language    INTEGER NOT NULL,
            file_path   TEXT NOT NULL,
            line_start  INTEGER NOT NULL,
            line_end    INTEGER NOT NULL,
            byte_start  INTEGER NOT NULL,
            byte_end    INTEGER NOT NULL,
            signature   TEXT,
            doc_comment TEXT,
            body_hash   INTEGER NOT NULL,
            body_text   TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_path);
        CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
        CREATE INDEX IF NOT EXISTS idx_symbols_qualified ON symbols(qualified_name);
        CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);

        CREATE TABLE IF NOT EXISTS relations (
            id          BLOB PRIMARY KEY,
            source_id   BLOB NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
            target_id   BLOB NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
            kind        INTEGER NOT NULL,
            file_path   TEXT NOT NULL,
            line        INTEGER NOT NULL,
            confidence  REAL NOT NULL,
            strength    REAL NOT NULL,
            UNIQUE(source_id, target_id, kind, file_path, line)
        );

        CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source_id);
        CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target_id);
        CREATE INDEX IF NOT EXISTS idx_relations_kind ON relations(kind);

        CREATE TABLE IF NOT EXISTS files (
            path          TEXT PRIMARY KEY,
            content_hash  INTEGER NOT NULL,
            language      INTEGER NOT NULL,
            size_bytes    INTEGER NOT NULL,
            symbol_count  INTEGER NOT NULL,
            last_indexed  TEXT NOT NULL,
            last_modified TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS repositories (
            id          TEXT PRIMARY KEY,
            path        TEXT NOT NULL,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunks (
            id            BLOB PRIMARY KEY,
            file_path     TEXT NOT NULL,
            language      INTEGER NOT NULL,
            byte_start    INTEGER NOT NULL,
            byte_end      INTEGER NOT NULL,
            line_start    INTEGER NOT NULL,
            line_end      INTEGER NOT NULL,
            chunk_index   INTEGER NOT NULL,
            total_chunks  INTEGER NOT NULL,
            context_path  TEXT,
            content       TEXT NOT NULL,
            content_hash  INTEGER NOT NULL,
            chunk_type    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);
        CREATE INDEX IF NOT EXISTS idx_chunks_hash ON chunks(content_hash);",
    )?;
    Ok(())
}

fn now_rfc3339() -> String {
    // We avoid pulling in chrono/time crates. Use a simple UTC timestamp.
    // Format: 2024-01-15T10:30:00Z
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    // Compute from epoch seconds
    let days = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    // Days to Y-M-D (simplified leap year calculation from epoch 1970-01-01)
    let (year, month, day) = days_to_ymd(days);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year, month, day, hours, minutes, seconds
    )
}

fn days_to_ymd(mut days: u64) -> (u64, u64, u64) {
    // Civil days from epoch algorithm
    let mut year = 1970u64;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }
    let leap = is_leap(year);
    let months: [u64; 12] = [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut month = 1u64;
    for &m in &months {
        if days < m {
            break;
        }
        days -= m;
        month += 1;
    }
    (year, month, days + 1)
}

fn is_leap(y: u64) -> bool {
    y % 4 == 0 && (y % 100 != 0 || y % 400 == 0)
}

fn compute_relation_id(rel: &CodeRelation) -> [u8; 16] {
    let input = format!(
        "{}|{}|{}|{}|{}",
        rel.source_id,
        rel.target_id,
        rel.kind.ordinal(),
        rel.file_path.to_string_lossy(),
        rel.line
    );
    xxh3_128(input.as_bytes()).to_le_bytes()
}

fn parse_neighbor_row(row: &rusqlite::Row<'_>) -> Result<Option<TraversalHit>, StorageError> {
    let blob: Vec<u8> = row.get(0)?;
    if blob.len() != 16 {
        return Ok(None);
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&blob);
    let kind_ord: i64 = row.get(1)?;
    let confidence: f64 = row.get(2)?;
    let strength: f64 = row.get(3)?;
    match RelationKind::from_ordinal(kind_ord as u8) {
        Some(rk) => Ok(Some(TraversalHit {
            symbol_id: SymbolId::from_bytes(bytes),
            depth: 0,
            relation_kind: rk,
            confidence: confidence as f32,
            strength: strength as f32,
        })),
        None => Ok(None),
    }
}

fn row_to_symbol(row: &rusqlite::Row<'_>) -> Result<CodeSymbol, StorageError> {
    let id_blob: Vec<u8> = row.get(0)?;
    if id_blob.len() != 16 {
        return Err(StorageError::TransactionFailed {
            reason: format!("invalid symbol id length: {}", id_blob.len()),
        });
    }
    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&id_blob);

    let kind_ord: i64 = row.get(3)?;
    let lang_ord: i64 = row.get(4)?;
    let file_path_str: String = row.get(5)?;
    let line_start: i64 = row.get(6)?;
    let line_end: i64 = row.get(7)?;
    let byte_start: i64 = row.get(8)?;
    let byte_end: i64 = row.get(9)?;
    let body_hash: i64 = row.get(12)?;
    let body_text: Option<String> = row.get(13)?;

    let kind = SymbolKind::from_ordinal(kind_ord as u8).ok_or_else(|| {
        StorageError::TransactionFailed {
            reason: format!("invalid symbol kind ordinal: {}", kind_ord),
        }
    })?;
    let language = Language::from_ordinal(lang_ord as u8).ok_or_else(|| {
        StorageError::TransactionFailed {
            reason: format!("invalid language ordinal: {}", lang_ord),
        }
    })?;

    Ok(CodeSymbol {
        id: SymbolId::from_bytes(id_bytes),
        name: row.get(1)?,
        qualified_name: row.get(2)?,
        kind,
        language,
        file_path: file_path_str.into(),
        byte_range: (byte_start as usize)..(byte_end as usize),
        line_range: (line_start as u32)..(line_end as u32),
        signature: row.get(10)?,
        doc_comment: row.get(11)?,
        body_hash: body_hash as u64,
        body_text,
    })
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> Result<CodeChunk, StorageError> {
    let id_blob: Vec<u8> = row.get(0)?;
    if id_blob.len() != 16 {
        return Err(StorageError::TransactionFailed {
            reason: format!("invalid chunk id length: {}", id_blob.len()),
        });
    }
    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&id_blob);

    let file_path_str: String = row.get(1)?;
    let lang_ord: i64 = row.get(2)?;
    let byte_start: i64 = row.get(3)?;
    let byte_end: i64 = row.get(4)?;
    let line_start: i64 = row.get(5)?;
    let line_end: i64 = row.get(6)?;
    let chunk_index: i64 = row.get(7)?;
    let total_chunks: i64 = row.get(8)?;
    let content_hash: i64 = row.get(11)?;
    let chunk_type_ord: i64 = row.get(12)?;

    let language = Language::from_ordinal(lang_ord as u8).ok_or_else(|| {
        StorageError::TransactionFailed {
            reason: format!("invalid language ordinal: {}", lang_ord),
        }
    })?;
    let chunk_type = ChunkType::from_ordinal(chunk_type_ord as u8).ok_or_else(|| {
        StorageError::TransactionFailed {
            reason: format!("invalid chunk type ordinal: {}", chunk_type_ord),
        }
    })?;

    Ok(CodeChunk {
        id: ChunkId::from_bytes(id_bytes),
        language,
        file_path: file_path_str.into(),
        byte_range: (byte_start as usize)..(byte_end as usize),
        line_range: (line_start as u32)..(line_end as u32),
        chunk_index: chunk_index as u32,
        total_chunks: total_chunks as u32,
        context_path: row.get(9)?,
        content: row.get(10)?,
        content_hash: content_hash as u64,
        chunk_type,
    })
}

fn row_to_file_metadata(row: &rusqlite::Row<'_>) -> Result<FileMetadata, StorageError> {
    let content_hash: i64 = row.get(1)?;
    let lang_ord: i64 = row.get(2)?;
    let size: i64 = row.get(3)?;
    let sym_count: i64 = row.get(4)?;

    let language = Language::from_ordinal(lang_ord as u8).ok_or_else(|| {
        StorageError::TransactionFailed {
            reason: format!("invalid language ordinal: {}", lang_ord),
        }
    })?;

    Ok(FileMetadata {
        path: row.get(0)?,
        content_hash: content_hash as u64,
        language,
        size_bytes: size as u64,
        symbol_count: sym_count as u32,
        last_indexed: row.get(5)?,
        last_modified: row.get(6)?,
    })
}
