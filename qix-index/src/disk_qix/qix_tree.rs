//! In-memory overlapping quadtree used to build index files.

use crate::bounding_box::BoundingBox;
use crate::feature_source::FeatureSource;

use super::qix_config::QuadTreeConfig;
use super::qix_constants::{MAX_CHILDREN, MAX_FEATURE_ID};
use super::qix_types::{FeatureId, NodeId, QixError, QixResult};

/// A node of the build-time tree.
///
/// `extent` is the canonical quadrant rectangle the node was created for, not
/// a tight bound of the ids it stores.
#[derive(Debug, Clone)]
pub struct IndexNode {
    pub extent: BoundingBox,
    pub ids: Vec<FeatureId>,
    pub children: [Option<NodeId>; MAX_CHILDREN],
}

impl IndexNode {
    fn new(extent: BoundingBox) -> Self {
        Self {
            extent,
            ids: Vec::new(),
            children: [None; MAX_CHILDREN],
        }
    }

    /// Iterates over present children in slot order.
    pub fn present_children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().flatten().copied()
    }

    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|c| c.is_some()).count()
    }
}

/// Splits `extent` into its four overlapping child quadrants.
///
/// Each quadrant is `ratio` times the parent's width and height, anchored at
/// one corner: slot 0 at (min_x, min_y), 1 at (max_x, min_y), 2 at
/// (min_x, max_y) and 3 at (max_x, max_y).
pub fn split_quadrants(extent: &BoundingBox, ratio: f64) -> [BoundingBox; MAX_CHILDREN] {
    let w = extent.width() * ratio;
    let h = extent.height() * ratio;
    [
        BoundingBox::new(extent.min_x, extent.min_y, extent.min_x + w, extent.min_y + h),
        BoundingBox::new(extent.max_x - w, extent.min_y, extent.max_x, extent.min_y + h),
        BoundingBox::new(extent.min_x, extent.max_y - h, extent.min_x + w, extent.max_y),
        BoundingBox::new(extent.max_x - w, extent.max_y - h, extent.max_x, extent.max_y),
    ]
}

/// Build-time overlapping quadtree.
///
/// Nodes live in an arena and reference their children by index. Every walk
/// starts at `root`, so slots orphaned by [`QuadTree::trim`] are never
/// visited again.
///
/// # Examples
///
/// ```rust
/// use qix_index::{BoundingBox, QuadTree, QuadTreeConfig};
///
/// let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), QuadTreeConfig::new())?;
/// tree.insert(0, BoundingBox::new(10.0, 10.0, 20.0, 20.0))?;
/// tree.insert(1, BoundingBox::new(70.0, 70.0, 80.0, 80.0))?;
/// tree.trim();
/// assert_eq!(tree.count_items(), 2);
/// # Ok::<(), qix_index::QixError>(())
/// ```
#[derive(Debug, Clone)]
pub struct QuadTree {
    config: QuadTreeConfig,
    nodes: Vec<IndexNode>,
    root: NodeId,
    inserted: u64,
    feature_count: u32,
}

impl QuadTree {
    /// Creates an empty tree whose root covers `extent`.
    pub fn new(extent: BoundingBox, config: QuadTreeConfig) -> QixResult<Self> {
        config.validate()?;
        if !extent.is_valid() {
            return Err(QixError::InvalidConfig(format!(
                "root extent {} is not a valid box",
                extent
            )));
        }

        Ok(Self {
            config,
            nodes: vec![IndexNode::new(extent)],
            root: 0,
            inserted: 0,
            feature_count: 0,
        })
    }

    /// Builds and trims a tree from a full scan of `source`.
    ///
    /// Features whose bounds are `None` (null geometries) are skipped; they
    /// keep their positional id, so ids in the tree may have gaps.
    pub fn build<S: FeatureSource + ?Sized>(source: &mut S, config: QuadTreeConfig) -> QixResult<Self> {
        let mut tree = Self::new(source.extent(), config)?;
        let feature_count = source.feature_count();
        let mut skipped = 0u32;

        for id in 0..feature_count {
            match source.feature_bounds(id)? {
                Some(bbox) => tree.insert(id, bbox)?,
                None => {
                    log::trace!("Skipping feature {} without bounds", id);
                    skipped += 1;
                }
            }
        }
        tree.feature_count = tree.feature_count.max(feature_count);
        tree.trim();

        log::debug!(
            "Built quadtree over {} features ({} skipped): {} nodes, depth {}",
            feature_count,
            skipped,
            tree.count_nodes(),
            tree.depth()
        );
        Ok(tree)
    }

    /// Inserts a feature.
    ///
    /// The feature descends while one of the current node's quadrants fully
    /// contains `bbox` and depth remains, creating quadrant nodes on demand.
    /// It is stored in exactly one node.
    ///
    /// Returns `OutOfBounds` if `bbox` is invalid or not contained by the
    /// root extent. After [`QuadTree::trim`] the root extent may have shrunk
    /// to its only populated quadrant.
    ///
    /// Ids above [`MAX_FEATURE_ID`] are rejected with `InvalidConfig`.
    pub fn insert(&mut self, id: FeatureId, bbox: BoundingBox) -> QixResult<()> {
        if id > MAX_FEATURE_ID {
            return Err(QixError::InvalidConfig(format!(
                "feature id {} exceeds the largest indexable id {}",
                id, MAX_FEATURE_ID
            )));
        }
        let root_extent = self.nodes[self.root].extent;
        if !bbox.is_valid() || !root_extent.contains(&bbox) {
            return Err(QixError::OutOfBounds {
                id,
                bbox,
                extent: root_extent,
            });
        }

        let ratio = self.config.split_ratio();
        let mut node = self.root;
        let mut depth = self.config.max_depth();

        while depth > 1 {
            let quadrants = split_quadrants(&self.nodes[node].extent, ratio);
            match quadrants.iter().position(|q| q.contains(&bbox)) {
                Some(slot) => {
                    node = self.child_or_insert(node, slot, quadrants[slot]);
                    depth -= 1;
                }
                None => break,
            }
        }

        self.nodes[node].ids.push(id);
        self.inserted += 1;
        self.feature_count = self.feature_count.max(id + 1);
        Ok(())
    }

    fn child_or_insert(&mut self, parent: NodeId, slot: usize, extent: BoundingBox) -> NodeId {
        if let Some(child) = self.nodes[parent].children[slot] {
            return child;
        }
        let child = self.nodes.len();
        self.nodes.push(IndexNode::new(extent));
        self.nodes[parent].children[slot] = Some(child);
        child
    }

    /// Removes empty leaves and collapses pass-through nodes.
    ///
    /// Post-order: a node without ids and with exactly one child is replaced
    /// by that child in its parent's slot (or as the root). Applying it again
    /// changes nothing.
    pub fn trim(&mut self) {
        if let Some(root) = self.trim_node(self.root) {
            self.root = root;
        }
    }

    fn trim_node(&mut self, node: NodeId) -> Option<NodeId> {
        for slot in 0..MAX_CHILDREN {
            if let Some(child) = self.nodes[node].children[slot] {
                self.nodes[node].children[slot] = self.trim_node(child);
            }
        }

        let current = &self.nodes[node];
        if !current.ids.is_empty() {
            return Some(node);
        }
        let mut present = current.present_children();
        match (present.next(), present.next()) {
            (None, _) => None,
            (Some(only), None) => Some(only),
            _ => Some(node),
        }
    }

    pub fn config(&self) -> &QuadTreeConfig {
        &self.config
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &IndexNode {
        &self.nodes[id]
    }

    /// Extent of the current root.
    pub fn extent(&self) -> BoundingBox {
        self.nodes[self.root].extent
    }

    /// Number of successful inserts.
    pub fn len(&self) -> u64 {
        self.inserted
    }

    pub fn is_empty(&self) -> bool {
        self.inserted == 0
    }

    /// Number of features in the scanned dataset, including skipped ones.
    pub fn feature_count(&self) -> u32 {
        self.feature_count
    }

    /// Walks the reachable nodes depth-first, passing each with its level
    /// (the root is level 1).
    pub fn walk<F: FnMut(NodeId, &IndexNode, u32)>(&self, mut visit: F) {
        let mut stack = vec![(self.root, 1u32)];
        while let Some((id, level)) = stack.pop() {
            let node = &self.nodes[id];
            visit(id, node, level);
            stack.extend(node.present_children().map(|child| (child, level + 1)));
        }
    }

    /// Number of nodes reachable from the root.
    pub fn count_nodes(&self) -> usize {
        let mut count = 0;
        self.walk(|_, _, _| count += 1);
        count
    }

    /// Number of ids stored in reachable nodes.
    pub fn count_items(&self) -> u64 {
        let mut count = 0u64;
        self.walk(|_, node, _| count += node.ids.len() as u64);
        count
    }

    /// Deepest reachable level, the root being level 1.
    pub fn depth(&self) -> u32 {
        let mut depth = 0;
        self.walk(|_, _, level| depth = depth.max(level));
        depth
    }
}
