//! FeatureSource trait definition for index builds.

use crate::bounding_box::BoundingBox;
use crate::disk_qix::{FeatureId, QixError, QixResult};

/// Build-time view of a vector dataset.
///
/// A datasource driver exposes the dataset-wide extent, the number of
/// features in one full scan, and the bounds of each feature by its
/// positional id. Features without geometry report `None` and are left out
/// of the index.
pub trait FeatureSource {
    /// Extent covering every feature; seeds the root node.
    fn extent(&self) -> BoundingBox;

    /// Number of features in a full scan. Ids run from 0 to this value.
    fn feature_count(&self) -> u32;

    /// Bounds of the feature at position `id`.
    fn feature_bounds(&mut self, id: FeatureId) -> QixResult<Option<BoundingBox>>;
}

/// A `FeatureSource` over bounds already held in memory.
///
/// Holds at most `u32::MAX` features, so that every position fits a
/// [`FeatureId`] and the count fits the index header.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    extent: BoundingBox,
    bounds: Vec<Option<BoundingBox>>,
}

impl InMemorySource {
    pub fn new(extent: BoundingBox, bounds: Vec<Option<BoundingBox>>) -> QixResult<Self> {
        checked_feature_count(bounds.len())?;
        Ok(Self { extent, bounds })
    }

    /// Uses the union of all present bounds as the extent.
    pub fn from_bounds(bounds: Vec<Option<BoundingBox>>) -> QixResult<Self> {
        checked_feature_count(bounds.len())?;
        let extent = bounds
            .iter()
            .flatten()
            .copied()
            .reduce(|acc, b| acc.union(&b))
            .unwrap_or_default();
        Ok(Self { extent, bounds })
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

impl FeatureSource for InMemorySource {
    fn extent(&self) -> BoundingBox {
        self.extent
    }

    fn feature_count(&self) -> u32 {
        // length checked on construction
        u32::try_from(self.bounds.len()).unwrap_or(u32::MAX)
    }

    fn feature_bounds(&mut self, id: FeatureId) -> QixResult<Option<BoundingBox>> {
        Ok(self.bounds.get(id as usize).copied().flatten())
    }
}

fn checked_feature_count(len: usize) -> QixResult<u32> {
    u32::try_from(len).map_err(|_| {
        QixError::InvalidConfig(format!(
            "{} features exceed the limit of {}",
            len,
            u32::MAX
        ))
    })
}
