//! ordo 出力の取り込みと ordo 実行。
//!
//! レーティングは毎ラウンド out.pgn 全体から再計算する。メモリ上の
//! 値を増分更新することはない（常に最新ファイルが正）。

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};

use super::runner::{ToolInvocation, ToolRunner};
use super::select::CandidateScore;

/// 未対局候補に与える悲観的プレースホルダ。ランキング最下位に沈むが
/// 誤差が大きいので explore ビューでは選ばれ得る。
pub const PLACEHOLDER_RATING: f64 = -500.0;
pub const PLACEHOLDER_ERROR: f64 = 1000.0;

/// 候補名を含む行の識別マーカー。
pub const CANDIDATE_MARKER: &str = "config";

// ordo 出力の固定カラム位置
const NAME_COLUMN: usize = 1;
const RATING_COLUMN: usize = 3;
const ERROR_COLUMN: usize = 4;

/// ordo 出力ファイルを `{候補名: (rating, error)}` に変換する。
///
/// 全候補をプレースホルダで先に埋めるため、まだ1局も指していない
/// 候補が結果から脱落することはない。ファイル自体が無いのも正常
/// （初回ラウンド）。返り値の順序は `candidates` の順序を保つ。
pub fn parse_ordo(path: &Path, candidates: &[String]) -> Vec<CandidateScore> {
    let mut scores: Vec<CandidateScore> = candidates
        .iter()
        .map(|name| CandidateScore {
            name: name.clone(),
            rating: PLACEHOLDER_RATING,
            error: PLACEHOLDER_ERROR,
        })
        .collect();

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            debug!("no rating file at {}, keeping placeholders", path.display());
            return scores;
        }
    };

    for line in content.lines() {
        if !line.contains(CANDIDATE_MARKER) {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= ERROR_COLUMN {
            debug!("skipping short rating line: {line}");
            continue;
        }
        let name = fields[NAME_COLUMN];
        let (Ok(rating), Ok(error)) =
            (fields[RATING_COLUMN].parse::<f64>(), fields[ERROR_COLUMN].parse::<f64>())
        else {
            debug!("skipping malformed rating line: {line}");
            continue;
        };
        if let Some(entry) = scores.iter_mut().find(|s| s.name == name) {
            entry.rating = rating;
            entry.error = error;
        }
    }

    scores
}

/// ordo 実行設定。
#[derive(Clone, Debug)]
pub struct OrdoSettings {
    pub ordo_exe: PathBuf,
    pub pgn_file: PathBuf,
    pub ordo_out: PathBuf,
    pub concurrency: usize,
    pub timeout: Duration,
}

/// ordo の呼び出しを組み立てる。master をアンカー(0.0)に固定する。
pub fn build_ordo_invocation(settings: &OrdoSettings) -> ToolInvocation {
    let args = vec![
        "-q".to_string(),
        "-G".to_string(),
        "-J".to_string(),
        "-p".to_string(),
        settings.pgn_file.display().to_string(),
        "-a".to_string(),
        "0.0".to_string(),
        "--anchor=master".to_string(),
        "--draw-auto".to_string(),
        "--white-auto".to_string(),
        "-s".to_string(),
        "100".to_string(),
        format!("--cpus={}", settings.concurrency),
        "-o".to_string(),
        settings.ordo_out.display().to_string(),
    ];
    ToolInvocation {
        program: settings.ordo_exe.clone(),
        args,
        log_file: None,
        timeout: settings.timeout,
    }
}

/// 既存の pgn に対して ordo ランキングを再計算する。
/// 失敗はログのみ（このラウンドは新情報なしとして続行）。
pub fn run_ordo(runner: &dyn ToolRunner, settings: &OrdoSettings) {
    let inv = build_ordo_invocation(settings);
    match runner.run(&inv) {
        Ok(outcome) if outcome.succeeded() => {}
        Ok(outcome) => warn!("ordo did not complete cleanly: {outcome:?}"),
        Err(e) => warn!("failed to run ordo: {e}"),
    }
}
