use qix_index::{BoundingBox, FeatureId, InMemorySource, QixResult};
use rand::Rng;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

/// Runs a test between a setup and a teardown step.
///
/// Teardown runs whether or not the test body fails; the first error
/// wins and is reported as a panic.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> QixResult<()>,
    B: Fn() -> QixResult<TestContext>,
    A: Fn(TestContext) -> QixResult<()>,
{
    let start_time = Instant::now();
    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };

    let test_result = test(ctx.clone());
    let after_result = after(ctx);
    log::debug!("Test finished in {:?}", start_time.elapsed());

    if let Err(e) = test_result {
        panic!("Test failed: {:?}", e);
    }
    if let Err(e) = after_result {
        panic!("After run failed: {:?}", e);
    }
}

/// Scratch directory plus the index path a test writes to.
#[derive(Clone)]
pub struct TestContext {
    dir: Arc<TempDir>,
    index_path: PathBuf,
}

impl TestContext {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Another file path inside the scratch directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn create_test_context() -> QixResult<TestContext> {
    let dir = tempfile::tempdir()?;
    let index_path = qix_index::sidecar_path(dir.path().join("dataset.shp"));
    Ok(TestContext {
        dir: Arc::new(dir),
        index_path,
    })
}

pub fn cleanup(ctx: TestContext) -> QixResult<()> {
    if ctx.index_path().exists() {
        std::fs::remove_file(ctx.index_path())?;
    }
    Ok(())
}

/// `cols * rows` unit-spaced cells, each a little smaller than its slot.
pub fn grid_bounds(cols: u32, rows: u32) -> Vec<Option<BoundingBox>> {
    (0..cols * rows)
        .map(|i| {
            let x = (i % cols) as f64;
            let y = (i / cols) as f64;
            Some(BoundingBox::new(x + 0.1, y + 0.1, x + 0.9, y + 0.9))
        })
        .collect()
}

/// Random boxes of at most `max_size` inside `extent`, with every
/// `null_every`-th feature missing its geometry (0 disables).
pub fn random_bounds<R: Rng>(
    rng: &mut R,
    count: u32,
    extent: BoundingBox,
    max_size: f64,
    null_every: u32,
) -> Vec<Option<BoundingBox>> {
    (0..count)
        .map(|i| {
            if null_every > 0 && i % null_every == null_every - 1 {
                return None;
            }
            let w = rng.random_range(0.0..max_size);
            let h = rng.random_range(0.0..max_size);
            let x = rng.random_range(extent.min_x..extent.max_x - w);
            let y = rng.random_range(extent.min_y..extent.max_y - h);
            Some(BoundingBox::new(x, y, x + w, y + h))
        })
        .collect()
}

pub fn source_for(bounds: &[Option<BoundingBox>]) -> QixResult<InMemorySource> {
    InMemorySource::from_bounds(bounds.to_vec())
}

/// Ids whose bounds really intersect `search`.
pub fn brute_force(bounds: &[Option<BoundingBox>], search: &BoundingBox) -> BTreeSet<FeatureId> {
    bounds
        .iter()
        .enumerate()
        .filter_map(|(id, b)| match b {
            Some(b) if b.intersects(search) => Some(id as FeatureId),
            _ => None,
        })
        .collect()
}
