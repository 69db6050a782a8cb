use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use jobq_core::{CompletionPolicy, Job};
use jobq_infra::jobs::{InMemoryJobStore, JobStore, PostgresJobStore, TableLayout, TableNames};
use std::sync::Arc;
use tokio::runtime::Runtime;

const LAYOUTS: [TableLayout; 2] = [TableLayout::Unified, TableLayout::Split];
const POLICIES: [CompletionPolicy; 2] = [CompletionPolicy::Delete, CompletionPolicy::UpdateStatus];

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn seeded_store(rt: &Runtime, layout: TableLayout, jobs: usize) -> Arc<InMemoryJobStore> {
    let store = Arc::new(InMemoryJobStore::new(layout));
    rt.block_on(async {
        for i in 0..jobs {
            store
                .insert(Job::new(format!("bench.{i}")).with_param("{\"n\":1}"))
                .await
                .unwrap();
        }
    });
    store
}

async fn claim_and_complete<S: JobStore>(store: &S, policy: CompletionPolicy) -> bool {
    match store.claim().await.unwrap() {
        Some(job) => {
            store.complete(job.id, policy).await.unwrap();
            true
        }
        None => false,
    }
}

/// One insert -> claim -> complete cycle per iteration, per layout and policy.
fn bench_claim_cycle_in_memory(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("claim_cycle_in_memory");

    for layout in LAYOUTS {
        for policy in POLICIES {
            let id = BenchmarkId::new(layout.as_str(), policy.as_str());
            group.bench_function(id, |b| {
                b.iter_batched(
                    || seeded_store(&rt, layout, 0),
                    |store| {
                        rt.block_on(async {
                            store.insert(Job::new("bench.cycle")).await.unwrap();
                            black_box(claim_and_complete(&store, policy).await)
                        })
                    },
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

/// Many claimants draining a queue at once.
fn bench_contended_drain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("contended_drain");
    let jobs = 256;
    let claimants = 16;
    group.throughput(Throughput::Elements(jobs as u64));

    for layout in LAYOUTS {
        group.bench_with_input(BenchmarkId::from_parameter(layout), &layout, |b, &layout| {
            b.iter_batched(
                || seeded_store(&rt, layout, jobs),
                |store| {
                    rt.block_on(async {
                        let tasks: Vec<_> = (0..claimants)
                            .map(|_| {
                                let store = store.clone();
                                tokio::spawn(async move {
                                    let mut done = 0usize;
                                    while claim_and_complete(&store, CompletionPolicy::Delete).await {
                                        done += 1;
                                    }
                                    done
                                })
                            })
                            .collect();

                        let mut total = 0;
                        for task in tasks {
                            total += task.await.unwrap();
                        }
                        assert_eq!(total, jobs);
                    })
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Same cycle against Postgres; skipped unless `DATABASE_URL` is set.
fn bench_claim_cycle_postgres(c: &mut Criterion) {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping Postgres benchmarks");
        return;
    };
    let rt = runtime();
    let pool = rt.block_on(sqlx::PgPool::connect(&url)).unwrap();
    let mut group = c.benchmark_group("claim_cycle_postgres");

    for layout in LAYOUTS {
        for policy in POLICIES {
            let prefix = format!("bench_{}_{}_", layout.as_str(), policy.as_str());
            let tables = TableNames::with_prefix(prefix).unwrap();
            let store = PostgresJobStore::new(pool.clone(), layout, tables.clone());
            rt.block_on(async {
                store.ensure_schema().await.unwrap();
                let names = match layout {
                    TableLayout::Unified => vec![tables.jobs()],
                    TableLayout::Split => vec![tables.states(), tables.descriptors()],
                };
                for table in names {
                    sqlx::query(&format!("TRUNCATE {table}"))
                        .execute(store.pool())
                        .await
                        .unwrap();
                }
            });

            let id = BenchmarkId::new(layout.as_str(), policy.as_str());
            group.bench_function(id, |b| {
                b.iter(|| {
                    rt.block_on(async {
                        store.insert(Job::new("bench.cycle")).await.unwrap();
                        black_box(claim_and_complete(&store, policy).await)
                    })
                })
            });
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_claim_cycle_in_memory,
    bench_contended_drain,
    bench_claim_cycle_postgres
);
criterion_main!(benches);
