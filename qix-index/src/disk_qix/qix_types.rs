//! Core types shared by the quadtree builder, writer and reader.
//!
//! This module defines:
//! - Error types and result types
//! - Feature and node identifiers
//! - Query limits, statistics and candidate results

use std::io;
use thiserror::Error;

use crate::bounding_box::BoundingBox;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while building, writing or querying a quadtree index
#[derive(Debug, Error)]
pub enum QixError {
    #[error("Feature {id} with bounds {bbox} lies outside the index extent {extent}")]
    OutOfBounds {
        id: FeatureId,
        bbox: BoundingBox,
        extent: BoundingBox,
    },

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Index too large: subtree of {0} bytes does not fit a 32-bit length field")]
    IndexTooLarge(u64),

    #[error("Query exceeded its budget of {0} node records")]
    BudgetExceeded(usize),
}

impl QixError {
    /// Maps a failed read while parsing `what` to an error.
    ///
    /// Running out of bytes means the file is shorter than its own records
    /// claim, so it is reported as corruption rather than as a stream failure.
    pub(crate) fn from_read(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            QixError::CorruptIndex(format!("unexpected end of file while reading {}", what))
        } else {
            QixError::Io(err)
        }
    }

    /// Returns true if the index file cannot be trusted and the caller should
    /// fall back to scanning the whole dataset.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, QixError::CorruptIndex(_))
    }
}

/// Result type for quadtree index operations
pub type QixResult<T> = Result<T, QixError>;

/// Positional feature id: the ordinal of a feature in one full dataset scan
pub type FeatureId = u32;

/// Index of a node in the builder's arena
pub type NodeId = usize;

// ============================================================================
// Query Types
// ============================================================================

/// Resource limits applied to a single query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryLimits {
    /// Maximum number of node records the query may read, skipped ones included
    pub max_nodes: Option<usize>,
}

impl QueryLimits {
    /// No limits.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Caps the number of node records read.
    pub fn max_nodes(max_nodes: usize) -> Self {
        Self {
            max_nodes: Some(max_nodes),
        }
    }
}

/// Counters collected while walking an index file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Nodes whose extent passed the filter
    pub nodes_visited: u64,
    /// Nodes rejected by the filter, each skipped with a single seek
    pub nodes_skipped: u64,
    /// Feature ids copied into the result
    pub ids_read: u64,
    /// Bytes jumped over by skips
    pub bytes_skipped: u64,
}

/// Outcome of a query that tolerates a damaged index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// Candidate ids from the index, a superset of the true matches
    Indexed(Vec<FeatureId>),
    /// The index is unusable; every feature in `0..count` must be scanned
    FullScan(u32),
}

impl Candidates {
    /// Returns true when the caller has to scan the whole dataset.
    pub fn is_full_scan(&self) -> bool {
        matches!(self, Candidates::FullScan(_))
    }

    /// Expands the candidates into an explicit id list.
    pub fn into_ids(self) -> Vec<FeatureId> {
        match self {
            Candidates::Indexed(ids) => ids,
            Candidates::FullScan(count) => (0..count).collect(),
        }
    }
}
