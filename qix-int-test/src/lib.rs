//! Shared fixtures for the quadtree index integration tests.

pub mod test_util;
