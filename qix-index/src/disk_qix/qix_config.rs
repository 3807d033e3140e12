//! Builder configuration for quadtree indexes.

use serde::{Deserialize, Serialize};

use super::qix_constants::{
    AUTO_DEPTH_LIMIT, DEFAULT_MAX_DEPTH, DEFAULT_SPLIT_RATIO, MAX_DEPTH_LIMIT,
};
use super::qix_types::{QixError, QixResult};

/// Immutable tuning parameters of a quadtree index.
///
/// - `max_depth`: number of levels, counting the root. Items never descend
///   below this level.
/// - `split_ratio`: width and height of each child quadrant as a fraction of
///   its parent. Values above 0.5 make the four quadrants overlap, so items
///   straddling the parent's midlines can still move down a level.
///
/// # Examples
///
/// ```rust
/// use qix_index::QuadTreeConfig;
///
/// let config = QuadTreeConfig::new().with_max_depth(10).with_split_ratio(0.6);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadTreeConfig {
    max_depth: u32,
    split_ratio: f64,
}

impl QuadTreeConfig {
    /// Creates a configuration with depth 8 and split ratio 0.55.
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            split_ratio: DEFAULT_SPLIT_RATIO,
        }
    }

    /// Picks a depth from the number of features to index.
    ///
    /// Starting with a single node, a level is added (and the node estimate
    /// doubled) while four items per node would not cover every feature.
    /// The result is clamped to `1..=12`.
    pub fn for_feature_count(feature_count: u32) -> Self {
        let mut depth = 0u32;
        let mut nodes = 1u64;
        while nodes * 4 < feature_count as u64 {
            depth += 1;
            nodes *= 2;
        }
        Self::new().with_max_depth(depth.clamp(1, AUTO_DEPTH_LIMIT))
    }

    /// Sets the maximum depth.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Sets the split ratio.
    pub fn with_split_ratio(mut self, split_ratio: f64) -> Self {
        self.split_ratio = split_ratio;
        self
    }

    #[inline]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    #[inline]
    pub fn split_ratio(&self) -> f64 {
        self.split_ratio
    }

    /// Checks `1 <= max_depth <= 64` and `0.5 < split_ratio < 1.0`.
    pub fn validate(&self) -> QixResult<()> {
        if self.max_depth == 0 {
            return Err(QixError::InvalidConfig(
                "max_depth must be at least 1".into(),
            ));
        }
        if self.max_depth > MAX_DEPTH_LIMIT {
            return Err(QixError::InvalidConfig(format!(
                "max_depth {} exceeds the limit of {}",
                self.max_depth, MAX_DEPTH_LIMIT
            )));
        }
        // NaN fails both comparisons
        if !(self.split_ratio > 0.5 && self.split_ratio < 1.0) {
            return Err(QixError::InvalidConfig(format!(
                "split_ratio {} must lie strictly between 0.5 and 1.0",
                self.split_ratio
            )));
        }
        Ok(())
    }
}

impl Default for QuadTreeConfig {
    fn default() -> Self {
        Self::new()
    }
}
