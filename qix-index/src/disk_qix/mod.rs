//! On-disk overlapping quadtree index.
//!
//! This module builds, writes and queries the index file that sits next to
//! a vector dataset:
//! - An in-memory builder that pushes each feature's bounds as deep as the
//!   overlapping child quadrants allow
//! - A pre-order binary writer where every node record carries the byte
//!   length of its subtree
//! - A streaming reader that skips rejected subtrees with one seek and never
//!   loads the tree into memory
//!
//! Query results are candidates. Callers refine them against the real
//! feature geometry.

pub mod qix_types;
pub mod qix_constants;
pub mod qix_config;
pub mod qix_header;
pub mod qix_tree;
pub mod qix_writer;
pub mod qix_reader;
pub mod persistence;

pub use qix_types::{
    Candidates, FeatureId, NodeId, QixError, QixResult, QueryLimits, QueryStats,
};
pub use qix_constants::{DEFAULT_MAX_DEPTH, DEFAULT_SPLIT_RATIO};
pub use qix_config::QuadTreeConfig;
pub use qix_header::FileHeader;
pub use qix_tree::{IndexNode, QuadTree};
pub use qix_writer::QixWriter;
pub use qix_reader::{query, query_node, query_with_limits, QixReader};
pub use persistence::{verify_stream, IntegrityReport};
