#![cfg(unix)]

mod common;

use std::fs;
use std::time::Duration;

use common::{fake_engine, RESPONSIVE_ENGINE};
use tuner::analysis::{task_channel, Task, WorkerConfig, WorkerPool};
use tuner::uci::EngineConfig;

#[test]
fn pool_analyzes_every_position_exactly_once() {
    const TASKS: u64 = 10;
    const WORKERS: usize = 2;

    let dir = tempfile::tempdir().unwrap();
    let engine_path = fake_engine(dir.path(), "engine.sh", RESPONSIVE_ENGINE);

    let cfg = WorkerConfig {
        engine: EngineConfig::new(engine_path),
        depth: 5,
        claim_timeout: Duration::from_millis(500),
        out_dir: dir.path().to_path_buf(),
        compress: false,
    };

    let (producer, queue) = task_channel();
    let pool = WorkerPool::launch(WORKERS, &cfg, &queue);
    for id in 0..TASKS {
        producer.push(Task::new(id, format!("8/8/8/8/8/8/8/K6k w - - 0 {id}")));
    }
    drop(producer);

    let reports = pool.join();
    assert_eq!(reports.len(), WORKERS);
    assert!(reports.iter().all(|r| !r.failed));
    let processed: u64 = reports.iter().map(|r| r.processed).sum();
    assert_eq!(processed, TASKS);

    // 出力は output_<id> に分かれ、合計行数がタスク数と一致する
    let mut lines = Vec::new();
    for id in 0..WORKERS {
        let path = dir.path().join(format!("output_{id}"));
        let content = fs::read_to_string(&path).unwrap();
        lines.extend(content.lines().map(str::to_string));
    }
    assert_eq!(lines.len(), TASKS as usize);
    for line in &lines {
        // "<fen> <最後のinfo行>" 形式
        assert!(line.starts_with("8/8/8/8/8/8/8/K6k w - - 0 "), "bad line: {line}");
        assert!(line.contains("score cp 13"), "bad line: {line}");
    }
}

#[test]
fn gzip_output_roundtrips_through_open_reader() {
    let dir = tempfile::tempdir().unwrap();
    let engine_path = fake_engine(dir.path(), "engine.sh", RESPONSIVE_ENGINE);

    let cfg = WorkerConfig {
        engine: EngineConfig::new(engine_path),
        depth: 5,
        claim_timeout: Duration::from_millis(300),
        out_dir: dir.path().to_path_buf(),
        compress: true,
    };

    let (producer, queue) = task_channel();
    let pool = WorkerPool::launch(1, &cfg, &queue);
    producer.push(Task::new(0, "8/8/8/8/8/8/8/K6k w - - 0 1"));
    drop(producer);

    let reports = pool.join();
    assert_eq!(reports[0].processed, 1);
    assert!(!reports[0].failed);

    use std::io::BufRead;
    let reader = tuner::common::io::open_reader(dir.path().join("output_0.gz")).unwrap();
    let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("8/8/8/8/8/8/8/K6k w - - 0 1"), "bad line: {}", lines[0]);
}

#[test]
fn per_task_depth_overrides_default() {
    let dir = tempfile::tempdir().unwrap();
    let engine_path = fake_engine(dir.path(), "engine.sh", RESPONSIVE_ENGINE);

    let cfg = WorkerConfig {
        engine: EngineConfig::new(engine_path),
        depth: 5,
        claim_timeout: Duration::from_millis(300),
        out_dir: dir.path().to_path_buf(),
        compress: false,
    };

    let (producer, queue) = task_channel();
    let pool = WorkerPool::launch(1, &cfg, &queue);
    let mut task = Task::new(0, "8/8/8/8/8/8/8/K6k w - - 0 1");
    task.depth = Some(20);
    producer.push(task);
    drop(producer);

    let reports = pool.join();
    assert_eq!(reports[0].processed, 1);
}
