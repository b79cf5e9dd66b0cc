//! SPF calculator benchmarks over synthetic topologies.

use {
    criterion::{criterion_group, criterion_main, BenchmarkId, Criterion},
    spanmesh_bench::random_topology,
    spanmesh_topology::SpfCalculator,
};

fn bench_spf(c: &mut Criterion) {
    let calculator = SpfCalculator::new();
    let mut group = c.benchmark_group("spf_compute");

    for &(nodes, chords) in &[(50usize, 100usize), (200, 600), (1000, 4000)] {
        let topology = random_topology(nodes, chords, "n");
        let source = "n-0";
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{nodes}n_{chords}e")),
            &topology,
            |b, topology| {
                b.iter(|| {
                    let table = calculator.compute(source, topology);
                    assert!(!table.is_empty());
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_spf);
criterion_main!(benches);
