//! Benchmarks for the task queue and pool dispatch.

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sqlpro_core::memory::MemoryDriver;
use sqlpro_core::{ConnectParams, ServicePool, SqlTransaction, TaskQueue, Value};

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_queue");

    group.bench_function("push_pop", |b| {
        let queue = TaskQueue::new();
        b.iter(|| {
            queue.push(black_box(1u64)).unwrap();
            black_box(queue.pop())
        });
    });

    for consumers in [1usize, 2, 4] {
        group.throughput(Throughput::Elements(1_000));
        group.bench_with_input(
            BenchmarkId::new("drain_1000", consumers),
            &consumers,
            |b, &consumers| {
                b.iter(|| {
                    let queue = Arc::new(TaskQueue::new());
                    let workers: Vec<_> = (0..consumers)
                        .map(|_| {
                            let queue = queue.clone();
                            thread::spawn(move || {
                                let mut seen = 0u64;
                                while let Some(item) = queue.pop() {
                                    seen += item;
                                }
                                seen
                            })
                        })
                        .collect();

                    for i in 0..1_000u64 {
                        queue.push(i).unwrap();
                    }
                    while !queue.is_empty() {
                        thread::yield_now();
                    }
                    queue.cancel();

                    let total: u64 = workers.into_iter().map(|w| w.join().unwrap()).sum();
                    black_box(total)
                });
            },
        );
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    let driver = MemoryDriver::new().with_rows(
        "SELECT id, name FROM users",
        vec!["id", "name"],
        (0..100)
            .map(|i| vec![Value::Int(i), Value::Text(format!("user{i}"))])
            .collect(),
    );
    let pool = ServicePool::with_size(driver.clone(), ConnectParams::new("bench"), 4).unwrap();

    group.bench_function("execute", |b| {
        b.iter(|| {
            pool.submit_execute(black_box("UPDATE users SET active = 1"))
                .wait()
                .unwrap();
            driver.clear_journal();
        });
    });

    group.throughput(Throughput::Elements(100));
    group.bench_function("query_100_rows", |b| {
        b.iter(|| {
            let rows: Vec<(i64, String)> = pool
                .submit_query(black_box("SELECT id, name FROM users"))
                .wait()
                .unwrap();
            driver.clear_journal();
            black_box(rows)
        });
    });

    group.bench_function("transaction_3", |b| {
        b.iter(|| {
            let tx = SqlTransaction::with_statements(["A", "B", "C"]);
            pool.submit_transaction(black_box(tx)).wait().unwrap();
            driver.clear_journal();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_queue, bench_dispatch);
criterion_main!(benches);
