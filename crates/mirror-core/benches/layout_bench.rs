//! Criterion benchmarks for the multi-display layout optimizer.
//!
//! The optimizer runs whenever a display is added or removed and whenever the
//! panel is resized, so the exhaustive search has to stay well inside one UI
//! frame even with the maximum of four displays.
//!
//! Run with:
//! ```bash
//! cargo bench --package mirror-core --bench layout_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mirror_core::domain::display::Size;
use mirror_core::domain::layout::best_layout;

/// Displays of a typical foldable plus external screens.
fn display_sizes(n: usize) -> Vec<Size> {
    [Size::new(1080, 2340), Size::new(1920, 1080), Size::new(1768, 2208), Size::new(800, 600)]
        .into_iter()
        .take(n)
        .collect()
}

fn bench_best_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("best_layout");
    let canvas = Size::new(2560, 1440);
    for n in 1..=4 {
        let sizes = display_sizes(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &sizes, |b, sizes| {
            b.iter(|| best_layout(black_box(canvas), black_box(sizes)).expect("layout must succeed"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_best_layout);
criterion_main!(benches);
