//! Constants for the quadtree index file format.

/// Magic bytes at the start of every index file ("SQT" - spatial quadtree)
pub const MAGIC: [u8; 3] = *b"SQT";

/// Byte order flag for little-endian files, the only order this crate writes
pub const BYTE_ORDER_LSB: u8 = 1;

/// Byte order flag for big-endian files, recognised but rejected
pub const BYTE_ORDER_MSB: u8 = 2;

/// File format version
pub const VERSION: u8 = 1;

/// Size of the fixed file header in bytes
pub const HEADER_SIZE: u64 = 16;

/// Fixed part of a node record: subtree length, extent, id count and child count
pub const NODE_FIXED_SIZE: u64 = 4 + 4 * 8 + 4 + 4;

/// Bytes read before the filter decision: subtree length, extent and id count
pub const NODE_HEAD_SIZE: u64 = 4 + 4 * 8 + 4;

/// Size of one stored feature id
pub const ID_SIZE: u64 = 4;

/// Size of the trailing child count field
pub const CHILD_COUNT_SIZE: u64 = 4;

/// Largest storable feature id; the header's u32 feature count must exceed it
pub const MAX_FEATURE_ID: u32 = u32::MAX - 1;

/// Number of child quadrants per node
pub const MAX_CHILDREN: usize = 4;

/// Default maximum tree depth
pub const DEFAULT_MAX_DEPTH: u32 = 8;

/// Default split ratio for child quadrants
pub const DEFAULT_SPLIT_RATIO: f64 = 0.55;

/// Hard upper bound on configured depth, keeps recursive walks shallow
pub const MAX_DEPTH_LIMIT: u32 = 64;

/// Upper bound for depths picked from the feature count
pub const AUTO_DEPTH_LIMIT: u32 = 12;
