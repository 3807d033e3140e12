//! Integrity checking for index files.
//!
//! Queries trust the stored subtree lengths and only read what the filter
//! lets through. Verification instead reads every record in order and
//! compares what each node claims with what actually follows it.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use crate::bounding_box::BoundingBox;

use super::qix_constants::{
    CHILD_COUNT_SIZE, HEADER_SIZE, ID_SIZE, MAX_CHILDREN, MAX_DEPTH_LIMIT, NODE_FIXED_SIZE,
    NODE_HEAD_SIZE,
};
use super::qix_header::FileHeader;
use super::qix_reader::{read_u32, RecordHead};
use super::qix_types::{FeatureId, QixError, QixResult};

/// Result of a full walk over an index file
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// Size of the file in bytes
    pub file_size: u64,
    /// Feature count declared in the header
    pub feature_count: u32,
    /// Node records read
    pub nodes_checked: u64,
    /// Feature ids read
    pub ids_checked: u64,
    /// Deepest level reached, the root being level 1
    pub max_level: u32,
    /// Summary of findings
    pub is_valid: bool,
    /// Detailed error messages
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn new() -> Self {
        Self {
            file_size: 0,
            feature_count: 0,
            nodes_checked: 0,
            ids_checked: 0,
            max_level: 0,
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, message: String) {
        log::trace!("Index integrity: {}", message);
        self.is_valid = false;
        self.errors.push(message);
    }
}

impl Default for IntegrityReport {
    fn default() -> Self {
        Self::new()
    }
}

struct IntegrityWalk<'a, R: ?Sized> {
    stream: &'a mut R,
    pos: u64,
    end: u64,
    header: FileHeader,
    seen: HashSet<FeatureId>,
    report: IntegrityReport,
}

impl<R: Read + ?Sized> IntegrityWalk<'_, R> {
    fn check_node(&mut self, level: u32, parent: Option<BoundingBox>) -> QixResult<()> {
        let offset = self.pos;
        if level > MAX_DEPTH_LIMIT {
            return Err(QixError::CorruptIndex(format!(
                "node at offset {} is nested deeper than {} levels",
                offset, MAX_DEPTH_LIMIT
            )));
        }
        self.require(NODE_FIXED_SIZE, "node record")?;

        let head = RecordHead::read(self.stream)?;
        self.pos += NODE_HEAD_SIZE;
        self.report.nodes_checked += 1;
        self.report.max_level = self.report.max_level.max(level);

        if level > self.header.max_depth {
            self.report.fail(format!(
                "node at offset {} sits at level {} below the declared depth {}",
                offset, level, self.header.max_depth
            ));
        }
        if !head.extent.is_valid() {
            self.report
                .fail(format!("node at offset {} has invalid extent {}", offset, head.extent));
        }
        if let Some(parent) = parent {
            if !parent.contains(&head.extent) {
                self.report.fail(format!(
                    "node at offset {} with extent {} is not inside its parent {}",
                    offset, head.extent, parent
                ));
            }
        }

        self.require(head.id_count as u64 * ID_SIZE + CHILD_COUNT_SIZE, "feature ids")?;
        for _ in 0..head.id_count {
            let id = read_u32(self.stream, "feature id")?;
            self.pos += ID_SIZE;
            self.report.ids_checked += 1;
            if id >= self.header.feature_count {
                self.report.fail(format!(
                    "feature id {} at offset {} is outside 0..{}",
                    id,
                    self.pos - ID_SIZE,
                    self.header.feature_count
                ));
            } else if !self.seen.insert(id) {
                self.report.fail(format!("feature id {} is stored more than once", id));
            }
        }

        let child_count = read_u32(self.stream, "child count")?;
        self.pos += CHILD_COUNT_SIZE;
        if child_count as usize > MAX_CHILDREN {
            return Err(QixError::CorruptIndex(format!(
                "node at offset {} declares {} children",
                offset, child_count
            )));
        }

        let children_start = self.pos;
        for _ in 0..child_count {
            self.check_node(level + 1, Some(head.extent))?;
        }
        let actual = self.pos - children_start;
        if actual != head.subtree_len as u64 {
            self.report.fail(format!(
                "node at offset {} declares {} descendant bytes but has {}",
                offset, head.subtree_len, actual
            ));
        }
        Ok(())
    }

    fn require(&self, bytes: u64, what: &str) -> QixResult<()> {
        if self.pos + bytes > self.end {
            return Err(QixError::CorruptIndex(format!(
                "{} at offset {} runs past the end of the file",
                what, self.pos
            )));
        }
        Ok(())
    }
}

/// Reads a whole index file from `stream` and checks its structure.
///
/// Damage that stops the walk (a bad header, a short file, an impossible
/// child count) is returned as [`QixError::CorruptIndex`]. Everything else
/// is collected in the report:
/// - subtree lengths that disagree with the records that follow
/// - child extents outside their parent
/// - ids outside the declared feature count, or stored twice
/// - nesting below the declared depth
/// - trailing bytes after the root's subtree
pub fn verify_stream<R: Read + Seek + ?Sized>(stream: &mut R) -> QixResult<IntegrityReport> {
    let end = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(0))?;
    let header = FileHeader::read_from(stream)?;

    let mut walk = IntegrityWalk {
        stream,
        pos: HEADER_SIZE,
        end,
        header,
        seen: HashSet::new(),
        report: IntegrityReport {
            file_size: end,
            feature_count: header.feature_count,
            ..IntegrityReport::new()
        },
    };
    walk.check_node(1, None)?;

    if walk.pos != end {
        let trailing = end - walk.pos;
        walk.report
            .fail(format!("{} trailing bytes after the root subtree", trailing));
    }

    let report = walk.report;
    log::debug!(
        "Verified quadtree index: {} nodes, {} ids, {} errors",
        report.nodes_checked,
        report.ids_checked,
        report.errors.len()
    );
    Ok(report)
}
