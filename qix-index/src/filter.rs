//! Node filters for querying index files.
//!
//! A filter decides, from a node's extent alone, whether the query may match
//! anything stored in that node or below it. Filters must be monotonic: a
//! child's extent lies inside its parent's, so rejecting a parent must imply
//! rejecting every descendant. The reader relies on this to skip a whole
//! subtree with one seek.
//!
//! Ids collected from accepted nodes are candidates only. They are never
//! re-checked against the query, so callers refine them with the real
//! feature geometry.

use crate::bounding_box::BoundingBox;

/// Predicate over node extents.
pub trait NodeFilter {
    /// Returns true if the node with this extent must be read.
    fn pass(&self, extent: &BoundingBox) -> bool;
}

impl<F> NodeFilter for F
where
    F: Fn(&BoundingBox) -> bool,
{
    fn pass(&self, extent: &BoundingBox) -> bool {
        self(extent)
    }
}

/// Accepts nodes whose extent intersects a search box. Used for box queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectsFilter {
    search: BoundingBox,
}

impl IntersectsFilter {
    pub fn new(search: BoundingBox) -> Self {
        Self { search }
    }

    /// Box query around a point, grown by `tolerance` on every side.
    pub fn around_point(x: f64, y: f64, tolerance: f64) -> Self {
        Self::new(BoundingBox::point(x, y).expand_by(tolerance))
    }

    pub fn search(&self) -> &BoundingBox {
        &self.search
    }
}

impl NodeFilter for IntersectsFilter {
    fn pass(&self, extent: &BoundingBox) -> bool {
        extent.intersects(&self.search)
    }
}

/// Accepts nodes whose extent contains a point. Used for click queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointFilter {
    x: f64,
    y: f64,
}

impl PointFilter {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl NodeFilter for PointFilter {
    fn pass(&self, extent: &BoundingBox) -> bool {
        extent.contains_point(self.x, self.y)
    }
}

/// Accepts every node. Used for full walks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptAll;

impl NodeFilter for AcceptAll {
    fn pass(&self, _extent: &BoundingBox) -> bool {
        true
    }
}
