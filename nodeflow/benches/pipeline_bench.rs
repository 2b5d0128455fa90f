//! Benchmarks for pipeline construction and execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nodeflow::prelude::*;
use serde_json::json;

/// `width` independent chains of `depth` nodes each.
fn chains(width: usize, depth: usize) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(width * depth);
    for w in 0..width {
        for d in 0..depth {
            let input = if d == 0 {
                "raw".to_string()
            } else {
                format!("c{w}_{}", d - 1)
            };
            let computation = func1("inc", |v| Ok(json!(v.as_i64().unwrap_or(0) + 1)));
            if let Ok(built) = node(computation, [input], format!("c{w}_{d}")) {
                nodes.push(built.with_name(format!("n{w}_{d}")));
            }
        }
    }
    nodes
}

fn pipeline_benchmark(c: &mut Criterion) {
    let nodes = chains(20, 25);
    c.bench_function("layering_500_nodes", |b| {
        b.iter(|| Pipeline::new(black_box(nodes.clone())).map(|p| p.layers().len()))
    });

    let Ok(pipeline) = Pipeline::new(chains(8, 10)) else {
        return;
    };
    let Ok(runtime) = tokio::runtime::Runtime::new() else {
        return;
    };
    c.bench_function("sequential_run_80_nodes", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let catalog = DataCatalog::new();
                catalog
                    .add_feed_dict([("raw".to_string(), json!(0))], true)
                    .ok();
                SequentialRunner::new().run(&pipeline, &catalog, false).await.ok()
            })
        })
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
