//! Performance benchmarks for the Orchestrator's cycle loop.
//!
//! Run with: cargo bench --bench orchestrator_benchmarks

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use normweave::{ConceptRepo, EngineConfig, InferenceRepo, Orchestrator};

/// Builds a linear chain of `depth` `simple` inferences: `c0 -> c1 -> ... -> c{depth}`,
/// seeded with a single ground concept at the head.
fn linear_chain(depth: usize) -> (ConceptRepo, InferenceRepo) {
    let mut concepts = vec![serde_json::json!({
        "concept_name": "c0", "type": "semantical", "context": "bench", "axis_name": "row",
        "reference_data": ["1"], "reference_axis_names": ["row"],
    })];
    let mut inferences = Vec::with_capacity(depth);
    for i in 1..=depth {
        concepts.push(serde_json::json!({
            "concept_name": format!("c{i}"), "type": "semantical", "context": "bench", "axis_name": "row",
        }));
        inferences.push(serde_json::json!({
            "concept_to_infer": format!("c{i}"),
            "value_concepts": [format!("c{}", i - 1)],
            "context_concepts": [],
            "inference_sequence": "simple",
            "flow_info": {"flow_index": i.to_string()},
        }));
    }

    let mut concept_repo = ConceptRepo::from_json_list(&serde_json::Value::Array(concepts), &HashSet::new()).unwrap();
    let inference_repo =
        InferenceRepo::from_json_list(&serde_json::Value::Array(inferences), &mut concept_repo).unwrap();
    (concept_repo, inference_repo)
}

fn bench_linear_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("orchestrator_linear_chain");
    for &depth in &[8usize, 64, 256] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |bencher, &depth| {
            bencher.iter_batched(
                || {
                    let (concept_repo, inference_repo) = linear_chain(depth);
                    let mut config = EngineConfig::default();
                    config.max_cycles = (depth as u64) + 1;
                    Orchestrator::new(concept_repo, inference_repo, config).unwrap()
                },
                |mut orchestrator| {
                    orchestrator.run().unwrap();
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_linear_chain);
criterion_main!(benches);
