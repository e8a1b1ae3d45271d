use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::symbol::SymbolId;

/// Kinds of relationships between code symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RelationKind {
    Calls = 0,
    Imports = 1,
    Extends = 2,
    Implements = 3,
    Instantiates = 4,
    Contains = 5,
    Exports = 6,
    Accesses = 7,
    Assigns = 8,
    Throws = 9,
    Catches = 10,
    Configures = 11,
    DependsOn = 12,
    DataFlow = 13,
}

impl RelationKind {
    /// Fixed confidence score for tree-sitter extracted relations of this kind,
    /// used when a visitor does not compute a more specific value.
    pub fn default_confidence(self) -> f32 {
        match self {
            Self::Calls => 0.8,
            Self::Imports => 0.9,
            Self::Extends => 0.85,
            Self::Implements => 0.85,
            Self::Instantiates => 0.75,
            Self::Contains => 0.95,
            Self::Exports => 0.9,
            Self::Accesses => 0.7,
            Self::Assigns => 0.7,
            Self::Throws => 0.6,
            Self::Catches => 0.6,
            Self::Configures => 0.55,
            Self::DependsOn => 0.6,
            Self::DataFlow => 0.5,
        }
    }

    /// Default relationship strength, distinct from confidence: confidence is
    /// about extraction certainty, strength is about semantic weight during
    /// traversal and hop decay.
    pub fn default_strength(self) -> f32 {
        match self {
            Self::Calls => 0.9,
            Self::Imports => 0.7,
            Self::Extends => 1.0,
            Self::Implements => 0.95,
            Self::Instantiates => 0.8,
            Self::Contains => 0.6,
            Self::Exports => 0.7,
            Self::Accesses => 0.5,
            Self::Assigns => 0.55,
            Self::Throws => 0.4,
            Self::Catches => 0.4,
            Self::Configures => 0.45,
            Self::DependsOn => 0.65,
            Self::DataFlow => 0.5,
        }
    }

    pub fn from_ordinal(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Calls),
            1 => Some(Self::Imports),
            2 => Some(Self::Extends),
            3 => Some(Self::Implements),
            4 => Some(Self::Instantiates),
            5 => Some(Self::Contains),
            6 => Some(Self::Exports),
            7 => Some(Self::Accesses),
            8 => Some(Self::Assigns),
            9 => Some(Self::Throws),
            10 => Some(Self::Catches),
            11 => Some(Self::Configures),
            12 => Some(Self::DependsOn),
            13 => Some(Self::DataFlow),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub const ALL: [RelationKind; 14] = [
        Self::Calls,
        Self::Imports,
        Self::Extends,
        Self::Implements,
        Self::Instantiates,
        Self::Contains,
        Self::Exports,
        Self::Accesses,
        Self::Assigns,
        Self::Throws,
        Self::Catches,
        Self::Configures,
        Self::DependsOn,
        Self::DataFlow,
    ];
}

/// A relationship between two code symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRelation {
    pub source_id: SymbolId,
    pub target_id: SymbolId,
    pub kind: RelationKind,
    /// File where the relation was observed.
    pub file_path: PathBuf,
    /// 0-indexed line number.
    pub line: u32,
    /// Extraction certainty, bounded to `[0, 1]`.
    pub confidence: f32,
    /// Semantic weight used by traversal's hop-decay scoring, bounded to `[0, 1]`.
    pub strength: f32,
}
