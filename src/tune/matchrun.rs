//! c-chess-cli による対局実行。
//!
//! 基準設定 (master) と候補設定（上位 `nb_tested_config` 件）を
//! 対戦させ、結果を共有の out.pgn に追記する。レーティングは累積
//! なので pgn を上書きしてはならない。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use super::runner::{ToolInvocation, ToolOutcome, ToolRunner};

/// 候補名の接頭辞。`config-<値>` 形式。
pub const CONFIG_PREFIX: &str = "config-";

/// 数値からの候補名生成。整数は小数点なしで出す。
pub fn candidate_name(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{CONFIG_PREFIX}{}", value as i64)
    } else {
        format!("{CONFIG_PREFIX}{value}")
    }
}

/// 候補名からパラメータ値を取り出す。
pub fn value_from_name(name: &str) -> Option<&str> {
    name.strip_prefix(CONFIG_PREFIX)
}

/// 対局1回分の設定。
#[derive(Clone, Debug)]
pub struct MatchSettings {
    pub c_chess_exe: PathBuf,
    /// 候補側エンジンバイナリ
    pub engine: PathBuf,
    /// 基準側エンジンバイナリ（master）
    pub baseline: PathBuf,
    pub book_file: PathBuf,
    /// 持ち時間 (例: "3+0.03")
    pub tc: String,
    pub games: u32,
    pub rounds: u32,
    pub concurrency: usize,
    /// 1対局で実際に試す候補数の上限
    pub nb_tested_config: usize,
    /// 投了判定: (手数, 評価値閾値)
    pub resign: (u32, u32),
    /// 引き分け判定: (手数, 評価値閾値)
    pub draw: (u32, u32),
    pub pgn_file: PathBuf,
    pub log_file: PathBuf,
    pub timeout: Duration,
}

/// c-chess-cli の呼び出しを組み立てる。
///
/// `candidates` はランキング済み（有望順）であること。先頭から
/// `nb_tested_config` 件だけがエンジンエントリになる。`fixed` は
/// 既に確定したパラメータで、基準・候補の両側に渡す。
pub fn build_match_invocation(
    settings: &MatchSettings,
    param: &str,
    candidates: &[String],
    fixed: &BTreeMap<String, String>,
) -> ToolInvocation {
    let mut args: Vec<String> = vec![
        "-each".to_string(),
        format!("tc={}", settings.tc),
        "-games".to_string(),
        settings.games.to_string(),
        "-rounds".to_string(),
        settings.rounds.to_string(),
        "-concurrency".to_string(),
        settings.concurrency.to_string(),
        "-openings".to_string(),
        format!("file={}", settings.book_file.display()),
        "order=random".to_string(),
        "-repeat".to_string(),
        "-resign".to_string(),
        settings.resign.0.to_string(),
        settings.resign.1.to_string(),
        "-draw".to_string(),
        settings.draw.0.to_string(),
        settings.draw.1.to_string(),
    ];

    let fixed_opts: Vec<String> =
        fixed.iter().map(|(k, v)| format!("option.{k}={v}")).collect();

    args.push("-engine".to_string());
    args.push(format!("cmd={}", settings.baseline.display()));
    args.push("name=master".to_string());
    args.extend(fixed_opts.iter().cloned());

    for name in candidates.iter().take(settings.nb_tested_config) {
        let Some(value) = value_from_name(name) else {
            warn!("skipping candidate with unexpected name: {name}");
            continue;
        };
        args.push("-engine".to_string());
        args.push(format!("cmd={}", settings.engine.display()));
        args.push(format!("name={name}"));
        args.extend(fixed_opts.iter().cloned());
        args.push(format!("option.{param}={value}"));
    }

    // 第2引数 0: 追記モード。累積レーティングの前提。
    args.push("-pgn".to_string());
    args.push(settings.pgn_file.display().to_string());
    args.push("0".to_string());

    ToolInvocation {
        program: settings.c_chess_exe.clone(),
        args,
        log_file: Some(settings.log_file.clone()),
        timeout: settings.timeout,
    }
}

/// 対局を実行する。非0終了はログのみ（途中までの棋譜も有用）。
pub fn run_match(
    runner: &dyn ToolRunner,
    settings: &MatchSettings,
    param: &str,
    candidates: &[String],
    fixed: &BTreeMap<String, String>,
) -> Result<()> {
    let inv = build_match_invocation(settings, param, candidates, fixed);
    info!("running match: {} candidates vs master", candidates.len().min(settings.nb_tested_config));
    match runner.run(&inv)? {
        ToolOutcome::Completed { code: 0 } => {}
        outcome => warn!("match tool did not complete cleanly: {outcome:?}"),
    }
    Ok(())
}
