//! FEN局面の一括解析ツール。
//!
//! 入力ファイル（1行1局面、"-" で標準入力、.gz 可）をタスクキューに
//! 流し込み、ワーカーごとに専用エンジンを立てて解析する。結果は
//! 出力ディレクトリの `output_<id>` に分かれて書かれる。

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use tuner::analysis::{task_channel, Task, WorkerConfig, WorkerPool};
use tuner::common::io::open_reader;
use tuner::uci::EngineConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Batch position analyzer for UCI engines")]
struct Cli {
    /// エンジンバイナリパス
    #[arg(long)]
    engine: PathBuf,

    /// エンジン追加引数
    #[arg(long, num_args = 1..)]
    engine_args: Option<Vec<String>>,

    /// 起動時に送るUCIオプション（Name=Value、複数可）
    #[arg(long = "uci-option")]
    uci_options: Vec<String>,

    /// ワーカー数 (1..=16)
    #[arg(long, default_value_t = 3)]
    threads: usize,

    /// 探索深さ (1..=40)
    #[arg(long, default_value_t = 15)]
    depth: u32,

    /// 入力局面ファイル（"-" で標準入力、.gz 可）
    #[arg(long)]
    input: String,

    /// 出力ディレクトリ
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// 出力を gzip 圧縮する (output_<id>.gz)
    #[arg(long)]
    gzip_output: bool,

    /// キュー待ちタイムアウト（秒）。超過したワーカーは終了する
    #[arg(long, default_value_t = 20)]
    claim_timeout_secs: u64,

    /// 1探索あたりのタイムアウト（秒）
    #[arg(long, default_value_t = 600)]
    search_timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    if !(1..=16).contains(&cli.threads) {
        bail!("--threads must be in 1..=16");
    }
    if !(1..=40).contains(&cli.depth) {
        bail!("--depth must be in 1..=40");
    }

    let mut engine = EngineConfig::new(cli.engine);
    engine.args = cli.engine_args.unwrap_or_default();
    engine.uci_options = cli.uci_options;
    engine.search_timeout = Duration::from_secs(cli.search_timeout_secs);

    let cfg = WorkerConfig {
        engine,
        depth: cli.depth,
        claim_timeout: Duration::from_secs(cli.claim_timeout_secs),
        out_dir: cli.out_dir.clone(),
        compress: cli.gzip_output,
    };
    std::fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("failed to create {}", cli.out_dir.display()))?;

    let (producer, queue) = task_channel();
    // タスク投入より先に全ワーカーを起動する
    let pool = WorkerPool::launch(cli.threads, &cfg, &queue);

    let reader = open_reader(&cli.input)?;
    let mut total = 0u64;
    for line in reader.lines() {
        let line = line.context("failed to read input line")?;
        // 引用符付きFENを許容する
        let fen = line.trim().trim_matches('"').trim_matches('\'').trim();
        if fen.is_empty() {
            continue;
        }
        producer.push(Task::new(total, fen));
        total += 1;
    }
    drop(producer);
    info!("queued {total} positions for {} worker(s)", cli.threads);

    let reports = pool.join();
    let processed: u64 = reports.iter().map(|r| r.processed).sum();
    let failed = reports.iter().filter(|r| r.failed).count();
    info!("analyzed {processed}/{total} positions ({failed} worker failure(s))");
    if processed == 0 && total > 0 {
        bail!("no position was analyzed");
    }
    Ok(())
}
