//! Benchmarks for timing allocation and filter graph construction.
//!
//! Run with: `cargo bench --bench timing_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reelcast::compose::{reconcile, Canvas, FilterGraph};
use reelcast::timing::{self, CROSSFADE_SECS};
use reelcast::Segment;

const LINES: [&str; 6] = [
    "Every morning we bake bread by hand, long before the city wakes up.",
    "Amazing crusts and a soft crumb!",
    "Our flour comes from a mill two valleys over, stone ground and unbleached.",
    "Why settle for supermarket loaves?",
    "Each batch rests for twenty hours, which gives it that deep, nutty flavour people drive across town for.",
    "Visit us today and get your first loaf free.",
];

fn segments(n: usize) -> Vec<Segment> {
    (0..n)
        .map(|i| Segment::new(format!("scene {i}"), LINES[i % LINES.len()]))
        .collect()
}

fn bench_weight(c: &mut Criterion) {
    let mut group = c.benchmark_group("weight");

    group.bench_function("short_line", |b| {
        b.iter(|| black_box(timing::weight(black_box(LINES[1]))));
    });
    group.bench_function("long_line", |b| {
        b.iter(|| black_box(timing::weight(black_box(LINES[4]))));
    });

    group.finish();
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");

    for n in 1..=6 {
        let input = segments(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &input, |b, input| {
            b.iter(|| black_box(timing::allocate(black_box(input))));
        });
    }

    group.finish();
}

fn bench_graph(c: &mut Criterion) {
    let plan = timing::allocate(&segments(6));

    c.bench_function("reconcile_and_build_graph", |b| {
        b.iter(|| {
            let synced = reconcile(black_box(&plan), black_box(33.3), CROSSFADE_SECS);
            let graph = FilterGraph::build(&synced.plan, Canvas::default(), CROSSFADE_SECS, 0.05);
            black_box(graph.to_filter_complex())
        });
    });
}

criterion_group!(benches, bench_weight, bench_allocate, bench_graph);
criterion_main!(benches);
