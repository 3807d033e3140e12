//! Streaming query engine for quadtree index files.
//!
//! The reader never builds a tree. It walks the node records in file order,
//! asks the filter about each node's extent and either copies the node's ids
//! and descends into its children, or jumps over the rest of the node and
//! its whole subtree with a single relative seek. Only the bytes of accepted
//! nodes (plus the leading fields of rejected ones) are ever read.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;

use crate::bounding_box::BoundingBox;
use crate::filter::{IntersectsFilter, NodeFilter, PointFilter};

use super::persistence::{verify_stream, IntegrityReport};
use super::qix_constants::{
    CHILD_COUNT_SIZE, HEADER_SIZE, ID_SIZE, MAX_CHILDREN, MAX_DEPTH_LIMIT, NODE_FIXED_SIZE,
    NODE_HEAD_SIZE,
};
use super::qix_header::FileHeader;
use super::qix_types::{Candidates, FeatureId, QixError, QixResult, QueryLimits, QueryStats};

/// Leading fields of a node record, everything the filter decision needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RecordHead {
    pub subtree_len: u32,
    pub extent: BoundingBox,
    pub id_count: u32,
}

impl RecordHead {
    pub(crate) fn read<R: Read + ?Sized>(stream: &mut R) -> QixResult<Self> {
        let subtree_len = read_u32(stream, "subtree length")?;
        let min_x = read_f64(stream, "node extent")?;
        let min_y = read_f64(stream, "node extent")?;
        let max_x = read_f64(stream, "node extent")?;
        let max_y = read_f64(stream, "node extent")?;
        let id_count = read_u32(stream, "id count")?;
        Ok(Self {
            subtree_len,
            extent: BoundingBox::new(min_x, min_y, max_x, max_y),
            id_count,
        })
    }
}

pub(crate) fn read_u32<R: Read + ?Sized>(stream: &mut R, what: &str) -> QixResult<u32> {
    stream
        .read_u32::<LittleEndian>()
        .map_err(|e| QixError::from_read(e, what))
}

fn read_f64<R: Read + ?Sized>(stream: &mut R, what: &str) -> QixResult<f64> {
    stream
        .read_f64::<LittleEndian>()
        .map_err(|e| QixError::from_read(e, what))
}

/// Depth-first walk over node records, tracking the stream offset itself so
/// that no extra seeks are issued to learn the position.
struct NodeVisitor<'a, R: ?Sized, F: ?Sized> {
    filter: &'a F,
    stream: &'a mut R,
    pos: u64,
    end: u64,
    max_depth: u32,
    limits: QueryLimits,
    stats: QueryStats,
}

impl<'a, R, F> NodeVisitor<'a, R, F>
where
    R: Read + Seek + ?Sized,
    F: NodeFilter + ?Sized,
{
    fn new(
        filter: &'a F,
        stream: &'a mut R,
        pos: u64,
        end: u64,
        max_depth: u32,
        limits: QueryLimits,
    ) -> Self {
        Self {
            filter,
            stream,
            pos,
            end,
            max_depth,
            limits,
            stats: QueryStats::default(),
        }
    }

    fn visit(&mut self, level: u32, out_ids: &mut Vec<FeatureId>) -> QixResult<()> {
        if level > self.max_depth {
            return Err(QixError::CorruptIndex(format!(
                "node at offset {} is nested deeper than {} levels",
                self.pos, self.max_depth
            )));
        }
        if let Some(max_nodes) = self.limits.max_nodes {
            if (self.stats.nodes_visited + self.stats.nodes_skipped) as usize >= max_nodes {
                return Err(QixError::BudgetExceeded(max_nodes));
            }
        }

        self.ensure_remaining(NODE_HEAD_SIZE, "node record")?;
        let head = RecordHead::read(self.stream)?;
        self.pos += NODE_HEAD_SIZE;
        let ids_len = head.id_count as u64 * ID_SIZE;

        if !self.filter.pass(&head.extent) {
            // remaining ids, the child count and every descendant record
            let skip = head.subtree_len as u64 + ids_len + CHILD_COUNT_SIZE;
            self.skip(skip)?;
            self.stats.nodes_skipped += 1;
            return Ok(());
        }
        self.stats.nodes_visited += 1;

        // ids fit in the rest of the file, which bounds the reservation
        self.ensure_remaining(ids_len + CHILD_COUNT_SIZE, "feature ids")?;
        out_ids.reserve(head.id_count as usize);
        for _ in 0..head.id_count {
            out_ids.push(read_u32(self.stream, "feature id")?);
        }
        self.pos += ids_len;
        self.stats.ids_read += head.id_count as u64;

        let child_count = read_u32(self.stream, "child count")?;
        self.pos += CHILD_COUNT_SIZE;
        if child_count as usize > MAX_CHILDREN {
            return Err(QixError::CorruptIndex(format!(
                "node at offset {} declares {} children",
                self.pos - CHILD_COUNT_SIZE,
                child_count
            )));
        }

        for _ in 0..child_count {
            self.visit(level + 1, out_ids)?;
        }
        Ok(())
    }

    fn skip(&mut self, bytes: u64) -> QixResult<()> {
        self.ensure_remaining(bytes, "skipped subtree")?;
        self.stream.seek(SeekFrom::Current(bytes as i64))?;
        self.pos += bytes;
        self.stats.bytes_skipped += bytes;
        Ok(())
    }

    fn ensure_remaining(&self, bytes: u64, what: &str) -> QixResult<()> {
        if self.pos + bytes > self.end {
            return Err(QixError::CorruptIndex(format!(
                "{} at offset {} runs {} bytes past the end of the file",
                what,
                self.pos,
                self.pos + bytes - self.end
            )));
        }
        Ok(())
    }
}

/// Reads one node record at the current stream position and, if `filter`
/// accepts it, its ids and children, appending ids to `out_ids`.
///
/// Every field is checked against the end of the stream. On error `out_ids`
/// may hold ids from nodes read before the failure; use
/// [`query`] to get all-or-nothing results.
pub fn query_node<R, F>(filter: &F, stream: &mut R, out_ids: &mut Vec<FeatureId>) -> QixResult<()>
where
    R: Read + Seek + ?Sized,
    F: NodeFilter + ?Sized,
{
    let pos = stream.stream_position()?;
    let end = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(pos))?;
    let mut visitor = NodeVisitor::new(filter, stream, pos, end, MAX_DEPTH_LIMIT, QueryLimits::unlimited());
    visitor.visit(1, out_ids)
}

/// Runs a query over a complete index file held in `stream`.
///
/// Seeks to the root record just past the header and walks from there.
/// The header itself is not read; [`QixReader`] validates it per query.
/// Returned ids are a superset of the features whose bounds match.
pub fn query<R, F>(filter: &F, stream: &mut R) -> QixResult<Vec<FeatureId>>
where
    R: Read + Seek + ?Sized,
    F: NodeFilter + ?Sized,
{
    run_query(filter, stream, MAX_DEPTH_LIMIT, QueryLimits::unlimited()).map(|(ids, _)| ids)
}

/// Like [`query`], with resource limits and walk statistics.
pub fn query_with_limits<R, F>(
    filter: &F,
    stream: &mut R,
    limits: QueryLimits,
) -> QixResult<(Vec<FeatureId>, QueryStats)>
where
    R: Read + Seek + ?Sized,
    F: NodeFilter + ?Sized,
{
    run_query(filter, stream, MAX_DEPTH_LIMIT, limits)
}

fn run_query<R, F>(
    filter: &F,
    stream: &mut R,
    max_depth: u32,
    limits: QueryLimits,
) -> QixResult<(Vec<FeatureId>, QueryStats)>
where
    R: Read + Seek + ?Sized,
    F: NodeFilter + ?Sized,
{
    let end = stream.seek(SeekFrom::End(0))?;
    if end < HEADER_SIZE + NODE_FIXED_SIZE {
        return Err(QixError::CorruptIndex(format!(
            "file of {} bytes is too short to hold a root node",
            end
        )));
    }
    stream.seek(SeekFrom::Start(HEADER_SIZE))?;

    let mut ids = Vec::new();
    let mut visitor = NodeVisitor::new(filter, stream, HEADER_SIZE, end, max_depth, limits);
    visitor.visit(1, &mut ids)?;
    Ok((ids, visitor.stats))
}

/// Cursor owned by a single query.
enum IndexStream<'a> {
    File { reader: BufReader<File>, pos: u64 },
    Mapped(Cursor<&'a [u8]>),
}

impl Read for IndexStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            IndexStream::File { reader, pos } => {
                let n = reader.read(buf)?;
                *pos += n as u64;
                Ok(n)
            }
            IndexStream::Mapped(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for IndexStream<'_> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        match self {
            IndexStream::File { reader, pos } => {
                match target {
                    // keeps the read buffer when the skip lands inside it
                    SeekFrom::Current(offset) => {
                        reader.seek_relative(offset)?;
                        *pos = pos.checked_add_signed(offset).ok_or_else(|| {
                            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
                        })?;
                    }
                    _ => *pos = reader.seek(target)?,
                }
                Ok(*pos)
            }
            IndexStream::Mapped(cursor) => cursor.seek(target),
        }
    }
}

/// A validated index file, ready for queries.
///
/// Every query gets its own cursor: either a fresh file handle or a cursor
/// over a shared read-only memory map. A `QixReader` can therefore be shared
/// between threads and queried concurrently.
///
/// A file-backed reader opens the path again for each query and validates
/// the header of the file it actually reads, so it follows an index rebuilt
/// in place. A mapped reader keeps serving the file it mapped at open.
///
/// # Examples
///
/// ```rust,no_run
/// use qix_index::{BoundingBox, IntersectsFilter, QixReader};
///
/// let reader = QixReader::open("roads.qix")?;
/// let candidates = reader.query(&IntersectsFilter::new(BoundingBox::new(0.0, 0.0, 50.0, 50.0)))?;
/// # Ok::<(), qix_index::QixError>(())
/// ```
#[derive(Debug)]
pub struct QixReader {
    path: PathBuf,
    header: FileHeader,
    file_size: u64,
    mapped: Option<Mmap>,
}

impl QixReader {
    /// Opens an index file and validates its header.
    ///
    /// Only the header is read here; each query opens its own handle.
    pub fn open(path: impl AsRef<Path>) -> QixResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let header = FileHeader::read_from(&mut file)?;

        log::debug!(
            "Opened quadtree index {:?}: {} features, depth {}, {} bytes",
            path,
            header.feature_count,
            header.max_depth,
            file_size
        );
        Ok(Self {
            path: path.to_path_buf(),
            header,
            file_size,
            mapped: None,
        })
    }

    /// Opens an index file and memory-maps it for positioned reads.
    pub fn open_mapped(path: impl AsRef<Path>) -> QixResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let header = FileHeader::read_from(&mut file)?;
        // SAFETY: index files are written once and published by rename, so
        // the mapped file is never modified in place.
        let mmap = unsafe { Mmap::map(&file)? };

        log::debug!("Mapped quadtree index {:?} ({} bytes)", path, file_size);
        Ok(Self {
            path: path.to_path_buf(),
            header,
            file_size,
            mapped: Some(mmap),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Number of features in the dataset the index was built from, as of open.
    pub fn feature_count(&self) -> u32 {
        self.header.feature_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Fresh cursor plus the header of the file it reads.
    fn open_stream(&self) -> QixResult<(IndexStream<'_>, FileHeader)> {
        match &self.mapped {
            Some(mmap) => Ok((IndexStream::Mapped(Cursor::new(&mmap[..])), self.header)),
            None => {
                let mut reader = BufReader::new(File::open(&self.path)?);
                let header = FileHeader::read_from(&mut reader)?;
                if header != self.header {
                    log::debug!("Quadtree index {:?} was replaced since it was opened", self.path);
                }
                let stream = IndexStream::File {
                    reader,
                    pos: HEADER_SIZE,
                };
                Ok((stream, header))
            }
        }
    }

    /// Runs one query; the outer error means no header could be read.
    fn query_snapshot<F: NodeFilter + ?Sized>(
        &self,
        filter: &F,
        limits: QueryLimits,
    ) -> QixResult<(FileHeader, QixResult<(Vec<FeatureId>, QueryStats)>)> {
        let (mut stream, header) = self.open_stream()?;
        let max_depth = header.max_depth.min(MAX_DEPTH_LIMIT);
        Ok((header, run_query(filter, &mut stream, max_depth, limits)))
    }

    /// Candidate ids of nodes accepted by `filter`.
    pub fn query<F: NodeFilter + ?Sized>(&self, filter: &F) -> QixResult<Vec<FeatureId>> {
        self.query_with_limits(filter, QueryLimits::unlimited())
            .map(|(ids, _)| ids)
    }

    /// Candidate ids with resource limits and walk statistics.
    pub fn query_with_limits<F: NodeFilter + ?Sized>(
        &self,
        filter: &F,
        limits: QueryLimits,
    ) -> QixResult<(Vec<FeatureId>, QueryStats)> {
        let (_, result) = self.query_snapshot(filter, limits)?;
        let (ids, stats) = result?;

        log::debug!(
            "Quadtree query on {:?}: {} candidates, {} nodes read, {} skipped",
            self.path,
            ids.len(),
            stats.nodes_visited,
            stats.nodes_skipped
        );
        Ok((ids, stats))
    }

    /// Candidates for features whose bounds may intersect `search`.
    pub fn query_box(&self, search: BoundingBox) -> QixResult<Vec<FeatureId>> {
        self.query(&IntersectsFilter::new(search))
    }

    /// Candidates for features whose bounds may contain the point.
    pub fn query_point(&self, x: f64, y: f64) -> QixResult<Vec<FeatureId>> {
        self.query(&PointFilter::new(x, y))
    }

    /// Like [`QixReader::query`], but a corrupt index degrades to a full scan
    /// over every feature instead of failing.
    ///
    /// The full-scan count comes from the header of the file that was read.
    /// I/O errors, and a header that cannot be read at all, are still
    /// returned as errors.
    pub fn candidates<F: NodeFilter + ?Sized>(&self, filter: &F) -> QixResult<Candidates> {
        let (header, result) = self.query_snapshot(filter, QueryLimits::unlimited())?;
        match result {
            Ok((ids, _)) => Ok(Candidates::Indexed(ids)),
            Err(err) if err.is_corrupt() => {
                log::warn!(
                    "Quadtree index {:?} is unusable, falling back to a full scan: {}",
                    self.path,
                    err
                );
                Ok(Candidates::FullScan(header.feature_count))
            }
            Err(err) => Err(err),
        }
    }

    /// Walks the whole file and checks its structure.
    pub fn verify(&self) -> QixResult<IntegrityReport> {
        let (mut stream, _) = self.open_stream()?;
        verify_stream(&mut stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_qix::qix_config::QuadTreeConfig;
    use crate::disk_qix::qix_tree::QuadTree;
    use crate::filter::AcceptAll;
    use std::collections::BTreeSet;
    use std::io;
    use tempfile::tempdir;

    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    /// Stream that fails any read touching bytes at or after `limit`.
    struct BoundedStream {
        inner: Cursor<Vec<u8>>,
        limit: u64,
    }

    impl Read for BoundedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let pos = self.inner.position();
            if pos + buf.len() as u64 > self.limit {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("read of {} bytes at {} crosses {}", buf.len(), pos, self.limit),
                ));
            }
            self.inner.read(buf)
        }
    }

    impl Seek for BoundedStream {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn extent() -> BoundingBox {
        BoundingBox::new(0.0, 0.0, 100.0, 100.0)
    }

    fn build(items: &[(FeatureId, BoundingBox)], max_depth: u32) -> Vec<u8> {
        let mut tree = QuadTree::new(extent(), QuadTreeConfig::new().with_max_depth(max_depth)).unwrap();
        for (id, bbox) in items {
            tree.insert(*id, *bbox).unwrap();
        }
        tree.trim();
        tree.to_bytes().unwrap()
    }

    fn query_set<F: NodeFilter>(bytes: &[u8], filter: &F) -> BTreeSet<FeatureId> {
        query(filter, &mut Cursor::new(bytes)).unwrap().into_iter().collect()
    }

    fn corner_items() -> Vec<(FeatureId, BoundingBox)> {
        vec![
            (0, BoundingBox::new(1.0, 1.0, 2.0, 2.0)),
            (1, BoundingBox::new(98.0, 98.0, 99.0, 99.0)),
            (2, BoundingBox::new(97.0, 1.0, 98.0, 2.0)),
            (3, BoundingBox::new(10.0, 40.0, 90.0, 60.0)),
        ]
    }

    // ========================================================================
    // Scenario Tests
    // ========================================================================

    #[test]
    fn test_scenario_single_item() {
        let bytes = build(&[(1, BoundingBox::new(10.0, 10.0, 20.0, 20.0))], 8);

        let hit = query_set(&bytes, &IntersectsFilter::new(BoundingBox::new(0.0, 0.0, 50.0, 50.0)));
        assert_eq!(hit, BTreeSet::from([1]));

        let miss = query_set(&bytes, &IntersectsFilter::new(BoundingBox::new(60.0, 60.0, 90.0, 90.0)));
        assert!(miss.is_empty());
    }

    #[test]
    fn test_point_query() {
        let bytes = build(&corner_items(), 8);
        let ids = query_set(&bytes, &PointFilter::new(98.5, 98.5));
        assert!(ids.contains(&1));
        assert!(!ids.contains(&0));
        assert!(!ids.contains(&2));
    }

    #[test]
    fn test_unfiltered_query_returns_everything() {
        let bytes = build(&corner_items(), 8);
        assert_eq!(query_set(&bytes, &AcceptAll), BTreeSet::from([0, 1, 2, 3]));
    }

    #[test]
    fn test_ids_in_pre_order() {
        let bytes = build(&corner_items(), 8);
        let ids = query(&AcceptAll, &mut Cursor::new(&bytes)).unwrap();
        // root holds the straddling item, then children in slot order
        assert_eq!(ids, vec![3, 0, 2, 1]);
    }

    #[test]
    fn test_closure_filter_query() {
        let bytes = build(&corner_items(), 8);
        let ids = query(&|e: &BoundingBox| e.min_x < 50.0, &mut Cursor::new(&bytes)).unwrap();
        assert!(ids.contains(&0));
        assert!(ids.contains(&3));
        assert!(!ids.contains(&1));
    }

    #[test]
    fn test_false_positives_from_shared_node() {
        // both items stay in the root; a query touching one returns both
        let bytes = build(
            &[
                (0, BoundingBox::new(10.0, 40.0, 90.0, 45.0)),
                (1, BoundingBox::new(10.0, 55.0, 90.0, 60.0)),
            ],
            8,
        );
        let ids = query_set(&bytes, &IntersectsFilter::new(BoundingBox::new(20.0, 41.0, 30.0, 42.0)));
        assert_eq!(ids, BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_random_recall_is_sound() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(42);
        let items: Vec<(FeatureId, BoundingBox)> = (0..500)
            .map(|id| {
                let x = rng.random_range(0.0..95.0);
                let y = rng.random_range(0.0..95.0);
                let w = rng.random_range(0.0..5.0);
                let h = rng.random_range(0.0..5.0);
                (id, BoundingBox::new(x, y, x + w, y + h))
            })
            .collect();
        let bytes = build(&items, 8);

        for _ in 0..50 {
            let x = rng.random_range(-10.0..100.0);
            let y = rng.random_range(-10.0..100.0);
            let search = BoundingBox::new(x, y, x + rng.random_range(0.0..30.0), y + 10.0);
            let hits = query_set(&bytes, &IntersectsFilter::new(search));
            for (id, bbox) in &items {
                if bbox.intersects(&search) {
                    assert!(hits.contains(id), "{} with {} missed by {}", id, bbox, search);
                }
            }
        }
    }

    // ========================================================================
    // Skip Tests
    // ========================================================================

    #[test]
    fn test_rejected_root_reads_only_leading_fields() {
        let bytes = build(&corner_items(), 8);
        let mut stream = BoundedStream {
            inner: Cursor::new(bytes),
            limit: HEADER_SIZE + NODE_HEAD_SIZE,
        };
        let (ids, stats) = query_with_limits(
            &IntersectsFilter::new(BoundingBox::new(500.0, 500.0, 600.0, 600.0)),
            &mut stream,
            QueryLimits::unlimited(),
        )
        .unwrap();
        assert!(ids.is_empty());
        assert_eq!(stats.nodes_skipped, 1);
        assert_eq!(stats.nodes_visited, 0);
    }

    #[test]
    fn test_rejected_root_does_not_read_children() {
        let bytes = build(&corner_items(), 8);
        let mut stream = BoundedStream {
            inner: Cursor::new(bytes.clone()),
            limit: HEADER_SIZE + NODE_HEAD_SIZE,
        };
        let filter = IntersectsFilter::new(BoundingBox::new(-10.0, -10.0, -5.0, -5.0));
        assert!(query(&filter, &mut stream).unwrap().is_empty());

        // the same stream refuses an accepting query
        let mut stream = BoundedStream {
            inner: Cursor::new(bytes),
            limit: HEADER_SIZE + NODE_HEAD_SIZE,
        };
        assert!(query(&AcceptAll, &mut stream).is_err());
    }

    #[test]
    fn test_skipped_subtrees_counted() {
        let bytes = build(&corner_items(), 8);
        let (ids, stats) = query_with_limits(
            &PointFilter::new(1.5, 1.5),
            &mut Cursor::new(&bytes),
            QueryLimits::unlimited(),
        )
        .unwrap();
        assert_eq!(ids, vec![3, 0]);
        assert_eq!(stats.nodes_visited, 2);
        assert_eq!(stats.nodes_skipped, 2);
        assert!(stats.bytes_skipped > 0);
    }

    // ========================================================================
    // Limits and Corruption Tests
    // ========================================================================

    #[test]
    fn test_budget_exceeded() {
        let bytes = build(&corner_items(), 8);
        let result = query_with_limits(&AcceptAll, &mut Cursor::new(&bytes), QueryLimits::max_nodes(2));
        assert!(matches!(result, Err(QixError::BudgetExceeded(2))));

        let (ids, _) =
            query_with_limits(&AcceptAll, &mut Cursor::new(&bytes), QueryLimits::max_nodes(4)).unwrap();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let bytes = build(&corner_items(), 8);
        for cut in [HEADER_SIZE as usize + 10, bytes.len() - 1, bytes.len() - 30] {
            let result = query(&AcceptAll, &mut Cursor::new(&bytes[..cut]));
            assert!(
                matches!(result, Err(QixError::CorruptIndex(_))),
                "cut at {} gave {:?}",
                cut,
                result
            );
        }
    }

    #[test]
    fn test_oversized_skip_is_corrupt() {
        let mut bytes = build(&corner_items(), 8);
        let at = HEADER_SIZE as usize;
        bytes[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let filter = IntersectsFilter::new(BoundingBox::new(500.0, 500.0, 600.0, 600.0));
        let result = query(&filter, &mut Cursor::new(&bytes));
        assert!(matches!(result, Err(QixError::CorruptIndex(_))));
    }

    #[test]
    fn test_too_many_children_is_corrupt() {
        let bytes = build(&[(0, BoundingBox::new(10.0, 40.0, 90.0, 60.0))], 8);
        let mut bytes = bytes;
        let child_count_at = bytes.len() - 4;
        bytes[child_count_at..].copy_from_slice(&5u32.to_le_bytes());
        let result = query(&AcceptAll, &mut Cursor::new(&bytes));
        assert!(matches!(result, Err(QixError::CorruptIndex(_))));
    }

    #[test]
    fn test_query_node_at_position() {
        let bytes = build(&[(4, BoundingBox::new(10.0, 40.0, 90.0, 60.0))], 8);
        let mut cursor = Cursor::new(&bytes);
        cursor.seek(SeekFrom::Start(HEADER_SIZE)).unwrap();
        let mut out = Vec::new();
        query_node(&AcceptAll, &mut cursor, &mut out).unwrap();
        assert_eq!(out, vec![4]);
        assert_eq!(cursor.position(), bytes.len() as u64);
    }

    fn raw_record(id_count: u32, ids: &[u32], child_count: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0u32.to_le_bytes());
        for v in [0.0f64, 0.0, 10.0, 10.0] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&id_count.to_le_bytes());
        for id in ids {
            out.extend_from_slice(&id.to_le_bytes());
        }
        out.extend_from_slice(&child_count.to_le_bytes());
        out
    }

    #[test]
    fn test_query_node_huge_id_count_is_corrupt() {
        let bytes = raw_record(u32::MAX, &[], 0);
        let mut out = Vec::new();
        let result = query_node(&AcceptAll, &mut Cursor::new(&bytes), &mut out);
        assert!(matches!(result, Err(QixError::CorruptIndex(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_query_node_short_record_is_corrupt() {
        let bytes = raw_record(2, &[7, 8], 0);
        for cut in [10, NODE_HEAD_SIZE as usize, bytes.len() - 1] {
            let mut out = Vec::new();
            let result = query_node(&AcceptAll, &mut Cursor::new(&bytes[..cut]), &mut out);
            assert!(
                matches!(result, Err(QixError::CorruptIndex(_))),
                "cut at {} gave {:?}",
                cut,
                result
            );
        }
    }

    #[test]
    fn test_query_node_too_many_children_is_corrupt() {
        let bytes = raw_record(1, &[3], 5);
        let mut out = Vec::new();
        let result = query_node(&AcceptAll, &mut Cursor::new(&bytes), &mut out);
        assert!(matches!(result, Err(QixError::CorruptIndex(_))));
    }

    #[test]
    fn test_query_node_oversized_skip_is_corrupt() {
        let mut bytes = raw_record(0, &[], 0);
        bytes[0..4].copy_from_slice(&1000u32.to_le_bytes());
        let reject = |_: &BoundingBox| false;
        let result = query_node(&reject, &mut Cursor::new(&bytes), &mut Vec::new());
        assert!(matches!(result, Err(QixError::CorruptIndex(_))));
    }

    // ========================================================================
    // IndexStream Tests
    // ========================================================================

    #[test]
    fn test_file_stream_relative_seeks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bytes.bin");
        std::fs::write(&path, (0..=255u8).collect::<Vec<_>>()).unwrap();

        let mut stream = IndexStream::File {
            reader: BufReader::new(File::open(&path).unwrap()),
            pos: 0,
        };
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3]);

        assert_eq!(stream.seek(SeekFrom::Current(10)).unwrap(), 14);
        let mut one = [0u8; 1];
        stream.read_exact(&mut one).unwrap();
        assert_eq!(one[0], 14);

        assert_eq!(stream.seek(SeekFrom::Current(-5)).unwrap(), 10);
        stream.read_exact(&mut one).unwrap();
        assert_eq!(one[0], 10);

        assert_eq!(stream.seek(SeekFrom::End(-1)).unwrap(), 255);
        assert_eq!(stream.stream_position().unwrap(), 255);
        assert!(stream.seek(SeekFrom::Current(-1000)).is_err());
    }

    // ========================================================================
    // QixReader Tests
    // ========================================================================

    #[test]
    fn test_reader_open_and_query() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parcels.qix");
        let mut tree = QuadTree::new(extent(), QuadTreeConfig::new()).unwrap();
        for (id, bbox) in corner_items() {
            tree.insert(id, bbox).unwrap();
        }
        tree.trim();
        tree.write_file(&path).unwrap();

        for reader in [QixReader::open(&path).unwrap(), QixReader::open_mapped(&path).unwrap()] {
            assert_eq!(reader.feature_count(), 4);
            assert_eq!(reader.header().max_depth, 8);
            assert_eq!(reader.file_size(), std::fs::metadata(&path).unwrap().len());

            let ids: BTreeSet<_> = reader
                .query_box(BoundingBox::new(0.0, 0.0, 5.0, 5.0))
                .unwrap()
                .into_iter()
                .collect();
            assert!(ids.contains(&0));
            assert!(!ids.contains(&1));

            let ids = reader.query_point(98.5, 98.5).unwrap();
            assert!(ids.contains(&1));
        }
    }

    #[test]
    fn test_reader_rejects_bad_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.qix");
        std::fs::write(&path, b"not an index file at all").unwrap();
        let err = QixReader::open(&path).unwrap_err();
        assert!(err.is_corrupt());

        std::fs::write(&path, b"SQT").unwrap();
        let err = QixReader::open(&path).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_reader_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = QixReader::open(dir.path().join("absent.qix"));
        assert!(matches!(result, Err(QixError::Io(_))));
    }

    fn write_index(path: &Path, items: &[(FeatureId, BoundingBox)], max_depth: u32) {
        let mut tree =
            QuadTree::new(extent(), QuadTreeConfig::new().with_max_depth(max_depth)).unwrap();
        for (id, bbox) in items {
            tree.insert(*id, *bbox).unwrap();
        }
        tree.trim();
        tree.write_file(path).unwrap();
    }

    fn grid_items(cols: u32) -> Vec<(FeatureId, BoundingBox)> {
        let cell = 100.0 / cols as f64;
        (0..cols * cols)
            .map(|i| {
                let x = (i % cols) as f64 * cell;
                let y = (i / cols) as f64 * cell;
                (i, BoundingBox::new(x + 0.1, y + 0.1, x + cell - 0.1, y + cell - 0.1))
            })
            .collect()
    }

    #[test]
    fn test_file_reader_follows_rebuild() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rebuilt.qix");
        write_index(&path, &corner_items(), 1);

        let reader = QixReader::open(&path).unwrap();
        assert_eq!(reader.feature_count(), 4);

        write_index(&path, &grid_items(40), 8);

        let ids = reader.query(&AcceptAll).unwrap();
        assert_eq!(ids.len(), 1600);
        let candidates = reader.candidates(&AcceptAll).unwrap();
        assert_eq!(candidates.into_ids().len(), 1600);
        assert!(reader.verify().unwrap().is_valid);
    }

    #[test]
    fn test_file_reader_full_scan_uses_current_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rebuilt.qix");
        write_index(&path, &corner_items(), 1);
        let reader = QixReader::open(&path).unwrap();

        // rebuilt index is damaged after its header
        write_index(&path, &grid_items(40), 8);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert_eq!(reader.candidates(&AcceptAll).unwrap(), Candidates::FullScan(1600));
    }

    #[test]
    #[cfg(unix)]
    fn test_mapped_reader_keeps_its_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pinned.qix");
        write_index(&path, &corner_items(), 1);
        let reader = QixReader::open_mapped(&path).unwrap();

        write_index(&path, &grid_items(40), 8);

        let ids: BTreeSet<_> = reader.query(&AcceptAll).unwrap().into_iter().collect();
        assert_eq!(ids, BTreeSet::from([0, 1, 2, 3]));
    }

    #[test]
    fn test_reader_candidates_fall_back_to_full_scan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.qix");
        let bytes = build(&corner_items(), 8);
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();

        let reader = QixReader::open(&path).unwrap();
        let candidates = reader.candidates(&AcceptAll).unwrap();
        assert_eq!(candidates, Candidates::FullScan(4));

        std::fs::write(&path, &bytes).unwrap();
        let reader = QixReader::open(&path).unwrap();
        let candidates = reader.candidates(&AcceptAll).unwrap();
        assert!(!candidates.is_full_scan());
    }

    #[test]
    fn test_reader_depth_guard_uses_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deep.qix");
        // header claiming depth 1 followed by a two-level chain
        let mut bytes = build(&[(0, BoundingBox::point(1.0, 1.0))], 4);
        bytes.truncate(HEADER_SIZE as usize);
        bytes[12..16].copy_from_slice(&1u32.to_le_bytes());
        let child_len = 44u32;
        for (subtree, ids, children) in [(child_len, 0u32, 1u32), (0, 0, 0)] {
            bytes.extend_from_slice(&subtree.to_le_bytes());
            for v in [0.0f64, 0.0, 100.0, 100.0] {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            bytes.extend_from_slice(&ids.to_le_bytes());
            bytes.extend_from_slice(&children.to_le_bytes());
        }
        std::fs::write(&path, &bytes).unwrap();

        let reader = QixReader::open(&path).unwrap();
        assert!(reader.query(&AcceptAll).unwrap_err().is_corrupt());
        // the raw stream query allows deeper nesting
        assert!(query(&AcceptAll, &mut Cursor::new(&bytes)).unwrap().is_empty());
    }
}
