//! Serializer for quadtree index files.
//!
//! Node records are emitted pre-order. Each record starts with the byte
//! length of all its descendant records, so the sizes are computed in a
//! separate bottom-up pass before anything is written. Absent children are
//! not written at all; a record's trailing child count is the only marker of
//! how many child records follow it.

use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tempfile::NamedTempFile;

use super::qix_constants::{ID_SIZE, NODE_FIXED_SIZE};
use super::qix_header::FileHeader;
use super::qix_tree::QuadTree;
use super::qix_types::{NodeId, QixError, QixResult};

/// Size of a node's own record for `id_count` stored ids.
#[inline]
pub fn record_size(id_count: usize) -> u64 {
    NODE_FIXED_SIZE + ID_SIZE * id_count as u64
}

/// Writes a [`QuadTree`] in the index file format.
pub struct QixWriter<'a> {
    tree: &'a QuadTree,
    /// Descendant byte length per arena slot; only reachable slots are filled
    subtree_sizes: Vec<u32>,
}

impl<'a> QixWriter<'a> {
    /// Prepares a writer, sizing every reachable subtree.
    pub fn new(tree: &'a QuadTree) -> QixResult<Self> {
        let mut writer = Self {
            tree,
            subtree_sizes: Vec::new(),
        };
        let mut sizes = vec![0u32; arena_len(tree)];
        writer.size_subtree(tree.root(), &mut sizes)?;
        writer.subtree_sizes = sizes;
        Ok(writer)
    }

    fn size_subtree(&self, node: NodeId, sizes: &mut [u32]) -> QixResult<u64> {
        let mut total = 0u64;
        for child in self.tree.node(node).present_children() {
            let child_subtree = self.size_subtree(child, sizes)?;
            total += record_size(self.tree.node(child).ids.len()) + child_subtree;
        }
        sizes[node] = u32::try_from(total).map_err(|_| QixError::IndexTooLarge(total))?;
        Ok(total)
    }

    /// Byte length of the descendants of `node`.
    pub fn subtree_size(&self, node: NodeId) -> u32 {
        self.subtree_sizes[node]
    }

    /// Total file size in bytes: header plus the root record and its subtree.
    pub fn file_size(&self) -> u64 {
        let root = self.tree.root();
        super::qix_constants::HEADER_SIZE
            + record_size(self.tree.node(root).ids.len())
            + self.subtree_sizes[root] as u64
    }

    /// Writes the header and every node record to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> QixResult<u64> {
        let header = FileHeader::new(self.tree.feature_count(), self.tree.config().max_depth());
        header.write_to(out)?;
        self.write_node(self.tree.root(), out)?;
        Ok(self.file_size())
    }

    fn write_node<W: Write>(&self, node: NodeId, out: &mut W) -> QixResult<()> {
        let current = self.tree.node(node);
        let id_count = u32::try_from(current.ids.len())
            .map_err(|_| QixError::IndexTooLarge(record_size(current.ids.len())))?;

        out.write_u32::<LittleEndian>(self.subtree_sizes[node])?;
        out.write_f64::<LittleEndian>(current.extent.min_x)?;
        out.write_f64::<LittleEndian>(current.extent.min_y)?;
        out.write_f64::<LittleEndian>(current.extent.max_x)?;
        out.write_f64::<LittleEndian>(current.extent.max_y)?;
        out.write_u32::<LittleEndian>(id_count)?;
        for id in &current.ids {
            out.write_u32::<LittleEndian>(*id)?;
        }
        out.write_u32::<LittleEndian>(current.child_count() as u32)?;

        for child in current.present_children() {
            self.write_node(child, out)?;
        }
        Ok(())
    }

    /// Writes the index to `path` atomically.
    ///
    /// The bytes go to a temporary file in the same directory, which is
    /// synced and then renamed over `path`. On error the temporary file is
    /// removed and `path` is left untouched.
    pub fn write_file(&self, path: impl AsRef<Path>) -> QixResult<u64> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp = NamedTempFile::new_in(dir)?;
        let written = {
            let mut out = BufWriter::new(&mut temp);
            let written = self.write_to(&mut out)?;
            out.flush()?;
            written
        };
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| QixError::Io(e.error))?;

        log::debug!("Wrote quadtree index {:?} ({} bytes)", path, written);
        Ok(written)
    }
}

fn arena_len(tree: &QuadTree) -> usize {
    let mut len = 0;
    tree.walk(|id, _, _| len = len.max(id + 1));
    len
}

impl QuadTree {
    /// Serializes this tree to `out`; returns the number of bytes written.
    pub fn write_to<W: Write>(&self, out: &mut W) -> QixResult<u64> {
        QixWriter::new(self)?.write_to(out)
    }

    /// Serializes this tree to `path` via a temporary file and atomic rename.
    pub fn write_file(&self, path: impl AsRef<Path>) -> QixResult<u64> {
        QixWriter::new(self)?.write_file(path)
    }

    /// Serializes this tree into a byte vector.
    pub fn to_bytes(&self) -> QixResult<Vec<u8>> {
        let writer = QixWriter::new(self)?;
        let mut bytes = Vec::with_capacity(writer.file_size() as usize);
        writer.write_to(&mut bytes)?;
        Ok(bytes)
    }
}
