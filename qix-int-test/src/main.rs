use qix_index::{BoundingBox, IntersectsFilter, QixError, QixReader, QixResult, QuadTree, QuadTreeConfig};
use qix_int_test::test_util::{cleanup, create_test_context, random_bounds, source_for};
use std::io;
use std::sync::Arc;
use std::thread;

fn main() -> QixResult<()> {
    colog::init();
    println!("Starting stress test...");
    let ctx = create_test_context()?;

    let count = 1_000_000;
    let extent = BoundingBox::new(-180.0, -90.0, 180.0, 90.0);
    let bounds = random_bounds(&mut rand::rng(), count, extent, 0.5, 50);
    let mut source = source_for(&bounds)?;

    let start = std::time::Instant::now();
    let tree = QuadTree::build(&mut source, QuadTreeConfig::for_feature_count(count))?;
    println!(
        "Built tree over {} features in {:?}: {} nodes, depth {}",
        count,
        start.elapsed(),
        tree.count_nodes(),
        tree.depth()
    );

    let start = std::time::Instant::now();
    let written = tree.write_file(ctx.index_path())?;
    println!("Wrote {} bytes in {:?}", written, start.elapsed());

    let reader = Arc::new(QixReader::open_mapped(ctx.index_path())?);
    let start = std::time::Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let reader = Arc::clone(&reader);
            thread::spawn(move || -> QixResult<usize> {
                let mut found = 0;
                for i in 0..1000 {
                    let x = -180.0 + ((t * 1000 + i) % 350) as f64;
                    let y = -90.0 + (i % 170) as f64;
                    let search = BoundingBox::new(x, y, x + 2.0, y + 2.0);
                    found += reader.query(&IntersectsFilter::new(search))?.len();
                }
                Ok(found)
            })
        })
        .collect();

    let mut total = 0;
    for handle in handles {
        total += handle
            .join()
            .map_err(|_| QixError::Io(io::Error::other("query thread panicked")))??;
    }
    println!("Ran 8000 queries in {:?}, {} candidates", start.elapsed(), total);

    let start = std::time::Instant::now();
    let report = reader.verify()?;
    println!(
        "Verified {} nodes in {:?}, valid: {}",
        report.nodes_checked,
        start.elapsed(),
        report.is_valid
    );

    drop(reader);
    cleanup(ctx)
}
