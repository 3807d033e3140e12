//! # qix-index - Quadtree Sidecar Index for Vector Datasets
//!
//! This crate builds and queries a persistent spatial index stored in a
//! sidecar file next to a vector dataset. The index maps the bounding box
//! of every feature to its positional id, and answers "which features might
//! intersect this box" without loading the index into memory.
//!
//! ## Features
//!
//! - **Overlapping Quadtree**: Child quadrants larger than half the parent, so
//!   features straddling a split line still sink deep into the tree
//! - **Compact Format**: Pre-order node records with subtree lengths, empty
//!   nodes trimmed before writing
//! - **Streaming Queries**: Rejected subtrees are skipped with a single seek
//! - **Atomic Writes**: Index files are written to a temporary file and
//!   renamed into place
//! - **Concurrent Readers**: One reader can serve many threads, each query
//!   with its own cursor
//! - **Graceful Degradation**: A damaged index falls back to a full scan
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qix_index::{
//!     sidecar_path, BoundingBox, InMemorySource, IntersectsFilter, QixReader, QuadTree,
//!     QuadTreeConfig,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Bounds of each feature, by position in the dataset
//! let mut source = InMemorySource::from_bounds(vec![
//!     Some(BoundingBox::new(10.0, 10.0, 20.0, 20.0)),
//!     None,
//!     Some(BoundingBox::new(60.0, 70.0, 65.0, 75.0)),
//! ])?;
//!
//! // Build, trim and write the index next to the dataset
//! let tree = QuadTree::build(&mut source, QuadTreeConfig::new())?;
//! let index_path = sidecar_path("parcels.shp");
//! tree.write_file(&index_path)?;
//!
//! // Query it
//! let reader = QixReader::open(&index_path)?;
//! let search = BoundingBox::new(0.0, 0.0, 50.0, 50.0);
//! let candidates = reader.query(&IntersectsFilter::new(search))?;
//! # Ok(())
//! # }
//! ```

pub mod bounding_box;
pub mod disk_qix;
pub mod feature_source;
pub mod filter;

use std::path::{Path, PathBuf};

pub use bounding_box::BoundingBox;
pub use disk_qix::{
    query, query_node, query_with_limits, verify_stream, Candidates, FeatureId, FileHeader,
    IntegrityReport, QixError, QixReader, QixResult, QixWriter, QuadTree, QuadTreeConfig,
    QueryLimits, QueryStats,
};
pub use feature_source::{FeatureSource, InMemorySource};
pub use filter::{AcceptAll, IntersectsFilter, NodeFilter, PointFilter};

/// File extension of index sidecar files.
pub const INDEX_EXTENSION: &str = "qix";

/// Path of the index file belonging to `dataset_path`.
///
/// The dataset's extension is replaced by `qix`, so `roads.shp` is indexed
/// by `roads.qix` in the same directory.
///
/// # Example
///
/// ```rust
/// # use qix_index::sidecar_path;
/// assert_eq!(sidecar_path("data/roads.shp"), std::path::PathBuf::from("data/roads.qix"));
/// ```
pub fn sidecar_path(dataset_path: impl AsRef<Path>) -> PathBuf {
    dataset_path.as_ref().with_extension(INDEX_EXTENSION)
}
