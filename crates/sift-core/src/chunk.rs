use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_128, xxh3_64};

use crate::language::Language;

/// Deterministic chunk identifier, computed as XXH3-128 of
/// `repo_id|relative_path|chunk|byte_start|byte_end`.
///
/// The literal `chunk` in the hash input distinguishes chunk IDs from symbol IDs,
/// ensuring no collision even if a chunk and symbol share the same byte range.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub u128);

impl ChunkId {
    /// Generate a deterministic chunk ID from its identifying fields.
    pub fn generate(
        repo_id: &str,
        relative_path: &str,
        byte_start: usize,
        byte_end: usize,
    ) -> Self {
        let input = format!(
            "{}|{}|chunk|{}|{}",
            repo_id, relative_path, byte_start, byte_end
        );
        Self(xxh3_128(input.as_bytes()))
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({:032x})", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Broad classification of a chunk's content, used to route retrieval
/// weighting and to pick a fallback chunking strategy when no tree-sitter
/// grammar is available for the file's language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChunkType {
    Code = 0,
    Documentation = 1,
    Config = 2,
}

impl ChunkType {
    /// Classify a chunk's type from the file's extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "rst" | "txt" | "adoc" => Self::Documentation,
            "json" | "yaml" | "yml" | "toml" | "ini" | "cfg" => Self::Config,
            _ => Self::Code,
        }
    }

    pub fn from_ordinal(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Code),
            1 => Some(Self::Documentation),
            2 => Some(Self::Config),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

/// An AST-aware code chunk extracted from a source file.
///
/// Chunks split large files into semantically coherent pieces using the
/// cAST algorithm: the tree-sitter AST is traversed and child nodes are
/// greedily grouped into windows that respect a non-whitespace character budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: ChunkId,
    pub language: Language,
    /// Relative to project root, forward-slash normalized.
    pub file_path: PathBuf,
    pub byte_range: Range<usize>,
    /// 0-indexed, end-exclusive.
    pub line_range: Range<u32>,
    /// 0-based index of this chunk within the file.
    pub chunk_index: u32,
    /// Total number of chunks in the file.
    pub total_chunks: u32,
    /// Dot-separated ancestor scope chain (e.g., "MyClass.my_method").
    /// Empty string for top-level chunks.
    pub context_path: String,
    /// Source text of the chunk (capped at 10 KB).
    pub content: String,
    /// XXH3-64 of the chunk content bytes.
    pub content_hash: u64,
    pub chunk_type: ChunkType,
}

impl CodeChunk {
    /// Compute a content hash for the given bytes.
    pub fn compute_content_hash(content: &[u8]) -> u64 {
        xxh3_64(content)
    }
}
