//! 局面解析のタスクキューとワーカープール。
//!
//! crossbeam-channel ワーカーモデル。各ワーカーは自分専用の
//! エンジンプロセスを1本起動し、キューから局面を取り出して
//! 解析結果を自分の出力ファイルに追記する。

use std::io::Write;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel as chan;
use log::{debug, info, warn};
use thiserror::Error;

use crate::common::io::open_writer;
use crate::uci::{EngineConfig, EngineProcess, ProtocolError};

/// 1単位の仕事: 解析する局面（FEN）または設定ラベル。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub id: u64,
    pub payload: String,
    /// 指定があれば既定深さより優先する
    pub depth: Option<u32>,
}

impl Task {
    pub fn new(id: u64, payload: impl Into<String>) -> Self {
        Self {
            id,
            payload: payload.into(),
            depth: None,
        }
    }
}

/// `claim` が仕事を返せなかった理由。
///
/// `Empty` はワーカーの正常な終了条件であってエラーではない。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("no task appeared before the claim timeout")]
    Empty,
    #[error("queue closed by producer")]
    Closed,
}

/// 生産側ハンドル。drop すると以後 `claim` は `Closed` を返すようになる。
pub struct TaskProducer {
    tx: chan::Sender<Task>,
}

impl TaskProducer {
    pub fn push(&self, task: Task) {
        // 受信側が全滅している場合のみ失敗する。その時点で仕事は不要。
        let _ = self.tx.send(task);
    }
}

/// 消費側ハンドル。複数ワーカーで clone して共有する。
#[derive(Clone)]
pub struct TaskQueue {
    rx: chan::Receiver<Task>,
}

impl TaskQueue {
    /// タイムアウト付きでタスクを1件取得する。同一タスクが複数の
    /// ワーカーに渡ることはない（チャネルの消費は排他的）。
    pub fn claim(&self, timeout: Duration) -> Result<Task, ClaimError> {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => Ok(task),
            Err(chan::RecvTimeoutError::Timeout) => Err(ClaimError::Empty),
            Err(chan::RecvTimeoutError::Disconnected) => Err(ClaimError::Closed),
        }
    }

    /// 残タスクの目安。early-exit 判定専用（レースがあるため参考値）。
    pub fn observed_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// 無制限バッファのタスクキューを作る。
pub fn task_channel() -> (TaskProducer, TaskQueue) {
    let (tx, rx) = chan::unbounded();
    (TaskProducer { tx }, TaskQueue { rx })
}

/// ワーカー共通設定。
#[derive(Clone)]
pub struct WorkerConfig {
    pub engine: EngineConfig,
    /// 既定の探索深さ
    pub depth: u32,
    pub claim_timeout: Duration,
    /// `output_<id>` を作成するディレクトリ
    pub out_dir: PathBuf,
    /// true なら `output_<id>.gz` に gzip 圧縮で書く
    pub compress: bool,
}

/// ワーカー1本の終了報告。
#[derive(Debug)]
pub struct WorkerReport {
    pub id: usize,
    pub processed: u64,
    /// プロトコル異常で途中離脱した場合 true
    pub failed: bool,
}

fn worker_main(id: usize, cfg: WorkerConfig, queue: TaskQueue) -> WorkerReport {
    let label = format!("worker-{id}");
    let mut report = WorkerReport {
        id,
        processed: 0,
        failed: false,
    };

    let mut engine = match EngineProcess::spawn(&cfg.engine, label.clone()) {
        Ok(ep) => ep,
        Err(e) => {
            warn!("{label}: failed to spawn engine: {e}");
            report.failed = true;
            return report;
        }
    };

    let suffix = if cfg.compress { ".gz" } else { "" };
    let out_path = cfg.out_dir.join(format!("output_{id}{suffix}"));
    let mut out = match open_writer(&out_path) {
        Ok(w) => w,
        Err(e) => {
            warn!("{label}: failed to create {}: {e}", out_path.display());
            report.failed = true;
            return report;
        }
    };

    loop {
        let task = match queue.claim(cfg.claim_timeout) {
            Ok(t) => t,
            // タイムアウトはワーカーの正常終了
            Err(ClaimError::Empty) | Err(ClaimError::Closed) => break,
        };
        debug!("{label}: analyzing {}", task.payload);

        let depth = task.depth.unwrap_or(cfg.depth);
        let outcome = engine.sync().and_then(|_| engine.new_game()).and_then(|_| {
            engine.search(&format!("position fen {}", task.payload), &format!("go depth {depth}"))
        });
        match outcome {
            Ok(output) => {
                let info = output.last_info().unwrap_or_default();
                if writeln!(out, "{} {}", task.payload, info).and_then(|_| out.flush()).is_err() {
                    warn!("{label}: failed to write result for task {}", task.id);
                }
                report.processed += 1;
            }
            Err(e @ ProtocolError::Timeout { .. }) => {
                // このタスクは諦めてセッションを張り直す
                warn!("{label}: {e}, restarting session");
                match EngineProcess::spawn(&cfg.engine, label.clone()) {
                    Ok(ep) => engine = ep,
                    Err(e) => {
                        warn!("{label}: failed to restart engine: {e}");
                        report.failed = true;
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("{label}: {e}");
                report.failed = true;
                break;
            }
        }

        // 参考値による early-exit。取りこぼしは claim タイムアウトが拾う。
        if queue.observed_empty() {
            break;
        }
    }

    // gzip のストリーム確定をここで行う
    if let Err(e) = out.close() {
        warn!("{label}: failed to finalize {}: {e}", out_path.display());
        report.failed = true;
    }
    // EngineProcess::drop が quit 送信と強制終了を行う
    report
}

/// N 本のワーカーを起動して束ねる。
pub struct WorkerPool {
    handles: Vec<JoinHandle<WorkerReport>>,
}

impl WorkerPool {
    /// 全ワーカーを起動する。タスク投入より先に呼ぶこと
    /// （キューが先に埋まって誰も居ないうちに捌かれる事態はないが、
    /// 起動失敗を早期に観測するため）。
    pub fn launch(workers: usize, cfg: &WorkerConfig, queue: &TaskQueue) -> Self {
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let cfg = cfg.clone();
            let queue = queue.clone();
            handles.push(thread::spawn(move || worker_main(id, cfg, queue)));
        }
        Self { handles }
    }

    /// 全ワーカーの終了を待ち、報告を集める。
    pub fn join(self) -> Vec<WorkerReport> {
        let mut reports = Vec::with_capacity(self.handles.len());
        for h in self.handles {
            match h.join() {
                Ok(r) => reports.push(r),
                Err(_) => warn!("a worker thread panicked"),
            }
        }
        let lost = reports.iter().filter(|r| r.failed).count();
        if lost > 0 {
            info!("{lost} worker(s) lost to protocol failures");
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn claim_times_out_on_empty_queue() {
        let (_producer, queue) = task_channel();
        let err = queue.claim(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, ClaimError::Empty);
    }

    #[test]
    fn claim_reports_closed_after_producer_drop() {
        let (producer, queue) = task_channel();
        producer.push(Task::new(0, "a"));
        drop(producer);
        assert!(queue.claim(Duration::from_millis(20)).is_ok());
        let err = queue.claim(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, ClaimError::Closed);
    }

    #[test]
    fn n_tasks_claimed_exactly_n_times_across_workers() {
        const TASKS: u64 = 200;
        const WORKERS: usize = 4;

        let (producer, queue) = task_channel();
        let claimed = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..WORKERS {
            let queue = queue.clone();
            let claimed = claimed.clone();
            handles.push(thread::spawn(move || {
                loop {
                    match queue.claim(Duration::from_millis(200)) {
                        Ok(_) => {
                            claimed.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(_) => break,
                    }
                }
            }));
        }

        for id in 0..TASKS {
            producer.push(Task::new(id, format!("task-{id}")));
        }
        drop(producer);

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(claimed.load(Ordering::SeqCst), TASKS);
    }

    #[test]
    fn observed_empty_is_advisory_only() {
        let (producer, queue) = task_channel();
        assert!(queue.observed_empty());
        producer.push(Task::new(1, "fen"));
        assert!(!queue.observed_empty());
        assert_eq!(queue.len(), 1);
    }
}
