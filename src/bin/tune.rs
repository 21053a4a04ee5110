//! トーナメント駆動のパラメータ最適化。
//!
//! 各パラメータの候補値を master と対戦させ、ordo レーティングの
//! explore/exploit ランキングで有望値を絞り込む。Ctrl-C は現在の
//! ラウンド完了後に掃引を打ち切る。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use serde::Deserialize;
use tuner::tune::{
    run_sweep, BestParams, MatchSettings, OrdoSettings, ParameterRange, RoundConfig,
    SelectionConfig, SweepConfig, SystemRunner,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tournament-driven parameter tuner for UCI engines")]
struct Cli {
    /// 候補側エンジンバイナリ
    #[arg(long)]
    engine: PathBuf,

    /// 基準側エンジンバイナリ（未指定時は候補側と同一）
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// 対局ツールのパス
    #[arg(long, default_value = "./c-chess-cli")]
    c_chess_exe: PathBuf,

    /// ordo のパス
    #[arg(long, default_value = "./ordo")]
    ordo_exe: PathBuf,

    /// 開始局面ブック
    #[arg(long)]
    book_file: PathBuf,

    /// 持ち時間 (c-chess-cli の tc= 形式)
    #[arg(long, default_value = "3+0.03")]
    tc: String,

    /// ペアあたり対局数
    #[arg(long, default_value_t = 10)]
    games: u32,

    /// 1対局実行あたりのラウンド数
    #[arg(long, default_value_t = 2)]
    match_rounds: u32,

    /// 並列対局数
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// 探索優先度の誤差係数
    #[arg(long, default_value_t = 1.5)]
    explore_factor: f64,

    /// 掃引する単一パラメータ名（--params-file と排他）
    #[arg(long)]
    parameter: Option<String>,

    /// --parameter 用の範囲指定
    #[arg(long)]
    range_min: Option<f64>,
    #[arg(long)]
    range_max: Option<f64>,
    #[arg(long)]
    range_step: Option<f64>,

    /// 複数パラメータの範囲定義 JSON ({"name":{"min":..,"max":..,"step":..}})
    #[arg(long)]
    params_file: Option<PathBuf>,

    /// 既に確定したパラメータの JSON（掃引の初期値になる）
    #[arg(long)]
    fixed_params: Option<PathBuf>,

    /// パラメータあたりのラウンド数。0 なら Ctrl-C まで無制限
    #[arg(long, default_value_t = 10)]
    rounds: u32,

    /// 全パラメータを一巡するループの回数
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// 成果物の出力ディレクトリ
    #[arg(long, default_value = "tuning")]
    out_dir: PathBuf,

    /// exploit 表示数
    #[arg(long, default_value_t = 15)]
    nb_best_print: usize,

    /// explore 選出数
    #[arg(long, default_value_t = 15)]
    nb_best_test: usize,

    /// 1対局実行で実際に試す候補数
    #[arg(long, default_value_t = 3)]
    nb_tested_config: usize,

    /// 対局ツールのタイムアウト（秒）
    #[arg(long, default_value_t = 7200)]
    match_timeout_secs: u64,

    /// ordo のタイムアウト（秒）
    #[arg(long, default_value_t = 600)]
    ordo_timeout_secs: u64,
}

/// --params-file の1エントリ。
#[derive(Deserialize)]
struct RangeSpec {
    min: f64,
    max: f64,
    step: f64,
}

fn load_ranges(cli: &Cli) -> Result<Vec<ParameterRange>> {
    if let Some(path) = &cli.params_file {
        if cli.parameter.is_some() {
            bail!("--parameter and --params-file are mutually exclusive");
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let specs: BTreeMap<String, RangeSpec> = serde_json::from_str(&content)
            .with_context(|| format!("invalid parameter ranges in {}", path.display()))?;
        return Ok(specs
            .into_iter()
            .map(|(name, s)| ParameterRange {
                name,
                min: s.min,
                max: s.max,
                step: s.step,
            })
            .collect());
    }

    let Some(name) = cli.parameter.clone() else {
        bail!("either --parameter or --params-file is required");
    };
    let (Some(min), Some(max), Some(step)) = (cli.range_min, cli.range_max, cli.range_step) else {
        bail!("--parameter requires --range-min, --range-max and --range-step");
    };
    Ok(vec![ParameterRange {
        name,
        min,
        max,
        step,
    }])
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let ranges = load_ranges(&cli)?;
    for r in &ranges {
        if r.step <= 0.0 || r.max < r.min {
            bail!("invalid range for parameter {}: min={} max={} step={}", r.name, r.min, r.max, r.step);
        }
    }
    if cli.nb_tested_config == 0 {
        bail!("--nb-tested-config must be >= 1");
    }

    let initial = match &cli.fixed_params {
        Some(path) => BestParams::load(path)?,
        None => BestParams::default(),
    };

    let baseline = cli.baseline.clone().unwrap_or_else(|| cli.engine.clone());
    let cfg = RoundConfig {
        match_settings: MatchSettings {
            c_chess_exe: cli.c_chess_exe.clone(),
            engine: cli.engine.clone(),
            baseline,
            book_file: cli.book_file.clone(),
            tc: cli.tc.clone(),
            games: cli.games,
            rounds: cli.match_rounds,
            concurrency: cli.concurrency,
            nb_tested_config: cli.nb_tested_config,
            resign: (3, 700),
            draw: (8, 10),
            pgn_file: cli.out_dir.join("out.pgn"),
            log_file: cli.out_dir.join("c_chess.out"),
            timeout: Duration::from_secs(cli.match_timeout_secs),
        },
        ordo: OrdoSettings {
            ordo_exe: cli.ordo_exe.clone(),
            pgn_file: cli.out_dir.join("out.pgn"),
            ordo_out: cli.out_dir.join("ordo.out"),
            concurrency: cli.concurrency,
            timeout: Duration::from_secs(cli.ordo_timeout_secs),
        },
        selection: SelectionConfig {
            explore_factor: cli.explore_factor,
            nb_best_print: cli.nb_best_print,
            nb_best_test: cli.nb_best_test,
        },
    };
    let sweep = SweepConfig {
        loops: cli.loops,
        rounds_per_param: cli.rounds,
        root: cli.out_dir.clone(),
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            info!("stop requested, finishing the current round");
            stop.store(true, Ordering::Relaxed);
        })
        .context("failed to install the Ctrl-C handler")?;
    }

    let runner = SystemRunner;
    let best = run_sweep(&runner, &cfg, &sweep, &ranges, initial, &stop)?;

    info!("final parameters:");
    for (name, value) in &best.0 {
        info!("   {name} = {value}");
    }
    Ok(())
}
