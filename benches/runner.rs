//! Benchmarks for pipeline runs.
//!
//! Measures step execution overhead with the fake backend and run history
//! listing from in-memory storage.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use etlman::runner::execute_steps;
use etlman::{
    FakeBackend, InMemoryStorage, Language, NewPipeline, NewProject, NewStep, PipelineId,
    PipelineRunner, Step, StepId, Storage,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn steps(count: usize) -> Vec<Step> {
    (0..count)
        .map(|i| Step {
            id: StepId::new(i as i64 + 1),
            pipeline_id: PipelineId::new(1),
            name: format!("step {}", i),
            language: if i % 2 == 0 { Language::Python } else { Language::R },
            script: format!("print({})", i),
            step_order: i as u32,
        })
        .collect()
}

fn bench_execute_steps(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let backend = FakeBackend::with_seed(42);
    let mut group = c.benchmark_group("execute_steps_fake");

    for count in [1, 10, 50].iter() {
        let steps = steps(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    execute_steps(PipelineId::new(1), &steps, &backend)
                        .await
                        .unwrap()
                })
            });
        });
    }

    group.finish();
}

fn bench_run_and_persist(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let storage = Arc::new(InMemoryStorage::new());
    let pipeline_id = rt.block_on(async {
        let project = storage
            .create_project(NewProject::new("bench", ""), "bench")
            .await
            .unwrap();
        let pipeline = storage
            .create_pipeline(NewPipeline::new(project.id, "bench"))
            .await
            .unwrap();
        for i in 0..10 {
            storage
                .create_step(NewStep::new(pipeline.id, "s", Language::Python, "x", i))
                .await
                .unwrap();
        }
        pipeline.id
    });
    let runner = PipelineRunner::new(Arc::clone(&storage));
    let backend = FakeBackend::new();

    c.bench_function("run_pipeline_10_steps_inmemory", |b| {
        b.iter(|| rt.block_on(async { runner.run(pipeline_id, &backend).await.unwrap() }));
    });
}

fn bench_list_runs(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("storage_list_runs");

    for count in [100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("inmemory", count), count, |b, &count| {
            let storage = Arc::new(InMemoryStorage::new());
            let runner = PipelineRunner::new(Arc::clone(&storage));
            let backend = FakeBackend::new();
            let pipeline_id = rt.block_on(async {
                let project = storage
                    .create_project(NewProject::new("bench", ""), "bench")
                    .await
                    .unwrap();
                let pipeline = storage
                    .create_pipeline(NewPipeline::new(project.id, "bench"))
                    .await
                    .unwrap();
                for _ in 0..count {
                    runner.run(pipeline.id, &backend).await.unwrap();
                }
                pipeline.id
            });

            b.iter(|| rt.block_on(async { storage.list_runs(pipeline_id, 50).await.unwrap() }));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_execute_steps,
    bench_run_and_persist,
    bench_list_runs
);
criterion_main!(benches);
