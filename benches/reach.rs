use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use flowtrust::model::CallEdge;
use flowtrust::reach::{ReachOptions, check_reachability};
use flowtrust::source::MemoryIndex;

/// Layered call graph: every function in layer n calls `fan_out` functions
/// of layer n + 1 with varying confidence.
fn layered_index(layers: usize, width: usize, fan_out: usize) -> MemoryIndex {
    let mut edges = Vec::new();
    for layer in 0..layers {
        for i in 0..width {
            for k in 0..fan_out {
                let j = (i * 7 + k * 3) % width;
                edges.push(CallEdge {
                    caller: format!("L{layer}_F{i}"),
                    callee: format!("L{}_F{j}", layer + 1),
                    confidence: ((i + j + k) % 10) as f64 / 10.0 + 0.05,
                });
            }
        }
    }
    for i in 0..width {
        edges.push(CallEdge {
            caller: "Main".to_string(),
            callee: format!("L0_F{i}"),
            confidence: 0.9,
        });
    }
    MemoryIndex::new(Vec::new(), edges)
}

fn bench_reachability(c: &mut Criterion) {
    let mut group = c.benchmark_group("reachability");
    for &(layers, width) in &[(10usize, 50usize), (30, 100)] {
        let index = layered_index(layers, width, 4);
        let target = format!("L{layers}_F{}", width / 2);
        let roots = vec!["Main".to_string()];
        let options = ReachOptions::default();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{layers}x{width}")),
            &(index, target),
            |b, (index, target)| {
                b.iter(|| {
                    let result =
                        check_reachability(index, black_box(&roots), black_box(target), &options)
                            .unwrap();
                    black_box(result.best.confidence)
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_reachability);
criterion_main!(benches);
