//! Performance benchmarks for tree scheduling and task throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use xcopy_engine::{
    Operation, Outcome, Response, SchedulerConfig, StatisticsCollector, Task, TaskId,
    TaskRequest, TaskRunner,
};
use xcopy_fs::MemoryBackend;
use xcopy_types::{EntryOutcome, InFlightLimit, Location, Stat, TaskType};

const FANOUT: usize = 8;
const FILES_PER_DIR: usize = 16;

/// Answer every request of a task from a synthetic tree of the given depth
fn drive_synthetic(limit: usize, depth: usize) -> usize {
    let config = SchedulerConfig::default().with_max_in_flight(InFlightLimit::new(limit).unwrap());
    let request = TaskRequest::new(
        TaskType::Copy,
        uuid::Uuid::nil(),
        Location::drive("d", "src"),
        Location::drive("d", "dst"),
    )
    .with_entries(["root"]);
    let mut task = Task::new(TaskId::new(), request, config);

    let mut answered = 0;
    loop {
        let requests = task.take_requests();
        if requests.is_empty() {
            break;
        }
        for request in requests {
            let outcome = match &request.op {
                Operation::Readdir(Location::Drive { dir, .. }) => {
                    let level = dir.matches('/').count();
                    let mut stats = Vec::new();
                    if dir == "src" {
                        stats.push(Stat::dir("root").with_uuid("src/root"));
                    } else if level <= depth {
                        for i in 0..FANOUT {
                            let name = format!("d{}", i);
                            stats.push(Stat::dir(name.clone()).with_uuid(format!("{}/{}", dir, name)));
                        }
                        for i in 0..FILES_PER_DIR {
                            stats.push(Stat::file(format!("f{}", i)));
                        }
                    }
                    Outcome::Listing(Ok(stats))
                }
                Operation::Mkdirs(mkdirs) => Outcome::Batch(Ok(mkdirs
                    .names
                    .iter()
                    .map(|name| {
                        let stat = Stat::dir(name.clone()).with_uuid(format!("dst/{}", name));
                        (name.clone(), EntryOutcome::created(stat))
                    })
                    .collect())),
                Operation::CopyFile(file) => {
                    Outcome::Entry(Ok(EntryOutcome::created(Stat::file(file.name.clone()))))
                }
                other => unreachable!("{:?}", other),
            };
            task.handle_response(Response::to(&request, outcome));
            answered += 1;
        }
        task.take_events();
    }
    answered
}

fn bench_synthetic_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthetic_tree");
    for limit in [1, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            b.iter(|| black_box(drive_synthetic(limit, 2)));
        });
    }
    group.finish();
}

fn bench_memory_backend_copy(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("memory_backend_copy", |b| {
        b.to_async(&rt).iter(|| async {
            let backend = MemoryBackend::new();
            backend.add_drive("d");
            backend.mkdir_p("d", "dst");
            for i in 0..FANOUT {
                for j in 0..FILES_PER_DIR {
                    backend.write_file("d", &format!("src/tree/d{}/f{}", i, j), b"data");
                }
            }

            let request = TaskRequest::new(
                TaskType::Copy,
                uuid::Uuid::nil(),
                Location::drive("d", "src"),
                Location::drive("d", "dst"),
            )
            .with_entries(["tree"]);
            let config = SchedulerConfig::default();
            let task = Task::new(TaskId::new(), request, config);
            let (runner, _handle) = TaskRunner::new(
                task,
                Arc::new(backend),
                Arc::new(StatisticsCollector::new()),
                config,
            );
            black_box(runner.run().await)
        });
    });
}

criterion_group!(benches, bench_synthetic_tree, bench_memory_backend_copy);
criterion_main!(benches);
