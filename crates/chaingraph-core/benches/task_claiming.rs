//! Task claiming benchmark: enqueue -> claim -> complete against the
//! in-memory task queue, measuring the core scheduling path (component C5).
//!
//! Grounded on the teacher's `task_claiming` bench
//! (`crates/durable/benches/task_claiming.rs`), adapted from workflow/
//! activity task shape to execution-scoped `TaskDefinition`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chaingraph_core::queue::{InMemoryTaskQueue, TaskDefinition, TaskQueue};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;
use uuid::Uuid;

fn task() -> TaskDefinition {
    let execution_id = Uuid::now_v7();
    TaskDefinition {
        execution_id,
        flow_id: Uuid::now_v7(),
        root_execution_id: execution_id,
        parent_execution_id: None,
        depth: 0,
        input: serde_json::json!({}),
        priority: 0,
        app_version: "dev".to_string(),
    }
}

fn bench_claim_single(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("task_claiming/single");
    group.throughput(Throughput::Elements(1));

    for batch_size in [1, 5, 10] {
        group.bench_with_input(BenchmarkId::new("batch", batch_size), &batch_size, |b, &batch_size| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let queue = Arc::new(InMemoryTaskQueue::new());
                let task_count = (iters * batch_size as u64).max(100);
                for _ in 0..task_count {
                    queue.enqueue(task()).await.unwrap();
                }

                let start = Instant::now();
                let mut claimed_total = 0u64;
                while claimed_total < task_count {
                    let claimed = queue.claim("worker-1", "dev", batch_size).await.unwrap();
                    claimed_total += claimed.len() as u64;
                    for claimed_task in claimed {
                        queue.complete(claimed_task.id, serde_json::json!({"ok": true})).await.unwrap();
                    }
                }
                start.elapsed()
            });
        });
    }
    group.finish();
}

fn bench_claim_concurrent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("task_claiming/concurrent");
    group.sample_size(20);

    for workers in [2, 4, 8] {
        let task_count = 5000u64;
        group.throughput(Throughput::Elements(task_count));
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            b.to_async(&rt).iter(|| async move {
                let queue = Arc::new(InMemoryTaskQueue::new());
                for _ in 0..task_count {
                    queue.enqueue(task()).await.unwrap();
                }

                let claimed_total = Arc::new(AtomicU64::new(0));
                let mut handles = Vec::new();
                for worker_id in 0..workers {
                    let queue = queue.clone();
                    let claimed_total = claimed_total.clone();
                    handles.push(tokio::spawn(async move {
                        let worker_name = format!("worker-{worker_id}");
                        loop {
                            if claimed_total.load(Ordering::Relaxed) >= task_count {
                                break;
                            }
                            let claimed = queue.claim(&worker_name, "dev", 1).await.unwrap();
                            if claimed.is_empty() {
                                tokio::task::yield_now().await;
                                continue;
                            }
                            for claimed_task in claimed {
                                queue.complete(claimed_task.id, serde_json::json!({})).await.unwrap();
                                claimed_total.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }));
                }
                for handle in handles {
                    handle.await.unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_enqueue(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("task_claiming/enqueue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let queue = Arc::new(InMemoryTaskQueue::new());
            let start = Instant::now();
            for _ in 0..iters {
                queue.enqueue(task()).await.unwrap();
            }
            start.elapsed()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_claim_single, bench_claim_concurrent, bench_enqueue);
criterion_main!(benches);
