//! チューニングの外側ループ。
//!
//! 1ラウンド = 候補発見 → ランキング → 選出 → 対局 → 再ランキング。
//! パラメータ掃引では各パラメータをラウンド反復で収束させ、得られた
//! 最良値を累積集合 (`BestParams`) に畳み込んで次のパラメータへ渡す。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::matchrun::{candidate_name, run_match, value_from_name, MatchSettings};
use super::ordo::{parse_ordo, run_ordo, OrdoSettings, PLACEHOLDER_ERROR};
use super::runner::ToolRunner;
use super::select::{current_best, rank_exploit, rank_explore, CandidateScore, SelectionConfig};

/// 1パラメータの試験範囲。
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ParameterRange {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParameterRange {
    pub fn values(&self) -> Vec<f64> {
        let mut values = Vec::new();
        if self.step <= 0.0 {
            return values;
        }
        let mut v = self.min;
        // 浮動小数の蓄積誤差で最終値を取りこぼさないよう僅かに緩める
        while v <= self.max + self.step * 1e-9 {
            values.push(v);
            v += self.step;
        }
        values
    }

    /// 範囲から `config-<値>` 名の候補集合を作る。
    pub fn candidate_names(&self) -> Vec<String> {
        self.values().into_iter().map(candidate_name).collect()
    }
}

/// パラメータ掃引をまたいで蓄積される確定値の集合。
///
/// モジュール状態ではなく明示的な値として各掃引ステップへ渡し、
/// 更新のたびにファイルへ永続化する。
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BestParams(pub BTreeMap<String, String>);

impl BestParams {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid fixed-parameters file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.0.insert(name.to_string(), value.to_string());
    }

    /// `param` 自身を除いた確定値。掃引中のパラメータは固定しない。
    pub fn fixed_for(&self, param: &str) -> BTreeMap<String, String> {
        let mut fixed = self.0.clone();
        fixed.remove(param);
        fixed
    }
}

/// 1ラウンドの構成要素。
pub struct RoundConfig {
    pub match_settings: MatchSettings,
    pub ordo: OrdoSettings,
    pub selection: SelectionConfig,
}

/// 掃引全体の設定。
pub struct SweepConfig {
    /// 最適化ループの回数（各ループで全パラメータを一巡）
    pub loops: u32,
    /// パラメータあたりのラウンド数。0 なら stop 信号まで無制限
    pub rounds_per_param: u32,
    /// 成果物ルート。`loop<k>/<param>/` にラウンド成果物を保管する
    pub root: PathBuf,
}

#[derive(Serialize)]
struct SweepMeta {
    timestamp: String,
    loops: u32,
    rounds_per_param: u32,
    parameters: Vec<String>,
}

/// 1ラウンド実行: 現状のレーティングから explore 選出 → 対局 → 再計算。
///
/// 返り値は再計算後のスコア（`candidates` の順序を保つ）。
pub fn run_round(
    runner: &dyn ToolRunner,
    cfg: &RoundConfig,
    param: &str,
    candidates: &[String],
    fixed: &BTreeMap<String, String>,
) -> Result<Vec<CandidateScore>> {
    let scores = parse_ordo(&cfg.ordo.ordo_out, candidates);

    info!("best {} so far:", param);
    for s in rank_exploit(&scores).iter().take(cfg.selection.nb_best_print) {
        info!("   {} : {} +- {}", s.name, s.rating, s.error);
    }

    let explore = rank_explore(&scores, cfg.selection.explore_factor);
    let chosen: Vec<String> = explore
        .iter()
        .take(cfg.selection.nb_best_test)
        .map(|s| s.name.clone())
        .collect();
    info!("measuring up to {} of {} explore candidates", cfg.match_settings.nb_tested_config, chosen.len());

    run_match(runner, &cfg.match_settings, param, &chosen, fixed)?;
    run_ordo(runner, &cfg.ordo);

    let rescored = parse_ordo(&cfg.ordo.ordo_out, candidates);
    if let Some(safe) = current_best(&rescored) {
        info!("current best (conservative): {} ({} +- {})", safe.name, safe.rating, safe.error);
    }
    Ok(rescored)
}

/// パラメータ掃引の全体駆動。
///
/// 各パラメータについて `loop<k>/<param>` が既に存在すれば実行を
/// スキップし、保管済みの ordo 出力から最良値だけを取り直す
/// （ディレクトリはキャッシュ兼監査証跡）。
pub fn run_sweep(
    runner: &dyn ToolRunner,
    cfg: &RoundConfig,
    sweep: &SweepConfig,
    ranges: &[ParameterRange],
    initial: BestParams,
    stop: &AtomicBool,
) -> Result<BestParams> {
    fs::create_dir_all(&sweep.root)
        .with_context(|| format!("failed to create {}", sweep.root.display()))?;
    write_meta(sweep, ranges)?;

    let mut best = initial;
    for loop_idx in 1..=sweep.loops {
        for range in ranges {
            if stop.load(Ordering::Relaxed) {
                return Ok(best);
            }

            let dir = sweep.root.join(format!("loop{loop_idx}")).join(&range.name);
            let candidates = range.candidate_names();
            if candidates.is_empty() {
                warn!("parameter {} has an empty range, skipping", range.name);
                continue;
            }

            if dir.is_dir() {
                info!("skipping already done dir {}", dir.display());
            } else {
                let fixed = best.fixed_for(&range.name);
                let mut round_no = 0u32;
                loop {
                    round_no += 1;
                    info!("loop {} parameter {} round {}", loop_idx, range.name, round_no);
                    run_round(runner, cfg, &range.name, &candidates, &fixed)?;
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if sweep.rounds_per_param > 0 && round_no >= sweep.rounds_per_param {
                        break;
                    }
                }
                archive_artifacts(cfg, &dir)?;
            }

            // 保管済みの ordo 出力から最良値を抽出する。候補は config-*
            // のみなので master が混ざることはない。レーティング降順の
            // 先頭（exploit 最上位）が確定値になる。
            let archived = dir.join(ordo_file_name(cfg));
            let scores = parse_ordo(&archived, &candidates);
            let measured: Vec<CandidateScore> =
                scores.into_iter().filter(|s| s.error < PLACEHOLDER_ERROR).collect();
            match rank_exploit(&measured).first() {
                Some(winner) => {
                    if let Some(value) = value_from_name(&winner.name) {
                        info!(
                            "parameter {} best value {} ({} +- {})",
                            range.name, value, winner.rating, winner.error
                        );
                        best.set(&range.name, value);
                    }
                }
                None => warn!("no measured candidate for {}, keeping previous value", range.name),
            }
            best.save(&sweep.root.join("best_params.json"))?;
        }
    }
    Ok(best)
}

fn ordo_file_name(cfg: &RoundConfig) -> PathBuf {
    cfg.ordo.ordo_out.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("ordo.out"))
}

/// ラウンド成果物 (pgn / ordo / 対局ログ) を掃引ディレクトリへ移す。
fn archive_artifacts(cfg: &RoundConfig, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let artifacts = [
        &cfg.match_settings.pgn_file,
        &cfg.ordo.ordo_out,
        &cfg.match_settings.log_file,
    ];
    for src in artifacts {
        let Some(name) = src.file_name() else { continue };
        if src.exists() {
            fs::rename(src, dir.join(name))
                .with_context(|| format!("failed to archive {}", src.display()))?;
        } else {
            // 全ラウンド失敗時は成果物が無いこともある
            warn!("missing artifact {}", src.display());
        }
    }
    Ok(())
}

fn write_meta(sweep: &SweepConfig, ranges: &[ParameterRange]) -> Result<()> {
    let meta = SweepMeta {
        timestamp: Local::now().to_rfc3339(),
        loops: sweep.loops,
        rounds_per_param: sweep.rounds_per_param,
        parameters: ranges.iter().map(|r| r.name.clone()).collect(),
    };
    let path = sweep.root.join("meta.json");
    fs::write(&path, serde_json::to_string_pretty(&meta)?)
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tune::runner::{ToolInvocation, ToolOutcome};
    use std::cell::RefCell;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn range_expands_like_python_range() {
        let range = ParameterRange {
            name: "NNUEscaling".to_string(),
            min: 32.0,
            max: 257.0,
            step: 8.0,
        };
        let names = range.candidate_names();
        assert_eq!(names.len(), 29);
        assert_eq!(names.first().unwrap(), "config-32");
        assert_eq!(names.last().unwrap(), "config-256");
    }

    #[test]
    fn degenerate_range_is_empty() {
        let range = ParameterRange {
            name: "X".to_string(),
            min: 1.0,
            max: 10.0,
            step: 0.0,
        };
        assert!(range.values().is_empty());
    }

    #[test]
    fn best_params_roundtrip_and_fixed_view() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best_params.json");

        let mut best = BestParams::default();
        best.set("KingSafety", "40");
        best.set("Aggressiveness", "120");
        best.save(&path).unwrap();

        let loaded = BestParams::load(&path).unwrap();
        assert_eq!(loaded, best);

        let fixed = loaded.fixed_for("KingSafety");
        assert!(!fixed.contains_key("KingSafety"));
        assert_eq!(fixed.get("Aggressiveness").map(String::as_str), Some("120"));
    }

    /// 呼び出しを記録し、ordo 実行時に台本どおりの ordo.out を書く実行器。
    struct FakeRunner {
        calls: RefCell<Vec<ToolInvocation>>,
        ordo_content: String,
    }

    impl FakeRunner {
        fn new(ordo_content: &str) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                ordo_content: ordo_content.to_string(),
            }
        }
    }

    impl ToolRunner for FakeRunner {
        fn run(&self, inv: &ToolInvocation) -> anyhow::Result<ToolOutcome> {
            self.calls.borrow_mut().push(inv.clone());
            if inv.program.to_string_lossy().contains("ordo") {
                let out_pos = inv.args.iter().position(|a| a == "-o").unwrap();
                let mut f = std::fs::File::create(&inv.args[out_pos + 1])?;
                write!(f, "{}", self.ordo_content)?;
            } else if let Some(pgn_pos) = inv.args.iter().position(|a| a == "-pgn") {
                // 対局ツールは pgn に追記する
                use std::fs::OpenOptions;
                let mut f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&inv.args[pgn_pos + 1])?;
                writeln!(f, "[Result \"1-0\"]")?;
            }
            Ok(ToolOutcome::Completed { code: 0 })
        }
    }

    fn test_config(work: &Path) -> RoundConfig {
        RoundConfig {
            match_settings: MatchSettings {
                c_chess_exe: PathBuf::from("./c-chess-cli"),
                engine: PathBuf::from("./engine"),
                baseline: PathBuf::from("./engine"),
                book_file: PathBuf::from("./book.epd"),
                tc: "3+0.03".to_string(),
                games: 10,
                rounds: 2,
                concurrency: 2,
                nb_tested_config: 3,
                resign: (3, 700),
                draw: (8, 10),
                pgn_file: work.join("out.pgn"),
                log_file: work.join("c_chess.out"),
                timeout: Duration::from_secs(60),
            },
            ordo: OrdoSettings {
                ordo_exe: PathBuf::from("./ordo"),
                pgn_file: work.join("out.pgn"),
                ordo_out: work.join("ordo.out"),
                concurrency: 2,
                timeout: Duration::from_secs(10),
            },
            selection: SelectionConfig::default(),
        }
    }

    const ORDO_FIXTURE: &str = "\
   # PLAYER      :  RATING  ERROR  POINTS  PLAYED   (%)
   1 config-40   :    25.3    12.1    30.0      40    75
   2 master      :     0.0     ----   20.0      40    50
   3 config-30   :   -10.8     9.4    15.0      40    38
";

    fn test_ranges() -> Vec<ParameterRange> {
        vec![ParameterRange {
            name: "KingSafety".to_string(),
            min: 30.0,
            max: 50.0,
            step: 10.0,
        }]
    }

    #[test]
    fn sweep_runs_rounds_then_extracts_best() {
        let work = tempfile::tempdir().unwrap();
        let cfg = test_config(work.path());
        let sweep = SweepConfig {
            loops: 1,
            rounds_per_param: 2,
            root: work.path().join("runs"),
        };
        let runner = FakeRunner::new(ORDO_FIXTURE);
        let stop = AtomicBool::new(false);

        let best =
            run_sweep(&runner, &cfg, &sweep, &test_ranges(), BestParams::default(), &stop).unwrap();

        // 2ラウンド × (match + ordo)
        assert_eq!(runner.calls.borrow().len(), 4);
        assert_eq!(best.0.get("KingSafety").map(String::as_str), Some("40"));
        assert!(sweep.root.join("loop1/KingSafety/ordo.out").is_file());
        assert!(sweep.root.join("best_params.json").is_file());
        assert!(sweep.root.join("meta.json").is_file());
    }

    // 誤差幅が広くても点推定が最大の候補が確定値になる
    const ORDO_WIDE_ERROR_FIXTURE: &str = "\
   # PLAYER      :  RATING  ERROR  POINTS  PLAYED   (%)
   1 config-50   :    30.0    40.0    12.0      20    60
   2 master      :     0.0     ----   10.0      20    50
   3 config-40   :    20.0     2.0    11.0      20    55
";

    #[test]
    fn extraction_takes_exploit_top_not_conservative_best() {
        let work = tempfile::tempdir().unwrap();
        let cfg = test_config(work.path());
        let sweep = SweepConfig {
            loops: 1,
            rounds_per_param: 1,
            root: work.path().join("runs"),
        };
        let runner = FakeRunner::new(ORDO_WIDE_ERROR_FIXTURE);
        let stop = AtomicBool::new(false);

        let best =
            run_sweep(&runner, &cfg, &sweep, &test_ranges(), BestParams::default(), &stop).unwrap();
        assert_eq!(best.0.get("KingSafety").map(String::as_str), Some("50"));
    }

    #[test]
    fn sweep_skips_existing_directory_but_still_extracts() {
        let work = tempfile::tempdir().unwrap();
        let cfg = test_config(work.path());
        let sweep = SweepConfig {
            loops: 1,
            rounds_per_param: 1,
            root: work.path().join("runs"),
        };

        // 前回実行の成果物を模す
        let done = sweep.root.join("loop1/KingSafety");
        fs::create_dir_all(&done).unwrap();
        fs::write(done.join("ordo.out"), ORDO_FIXTURE).unwrap();

        let runner = FakeRunner::new(ORDO_FIXTURE);
        let stop = AtomicBool::new(false);
        let best =
            run_sweep(&runner, &cfg, &sweep, &test_ranges(), BestParams::default(), &stop).unwrap();

        // 外部ツールは一切呼ばれない
        assert!(runner.calls.borrow().is_empty());
        assert_eq!(best.0.get("KingSafety").map(String::as_str), Some("40"));
    }

    #[test]
    fn sweep_honors_stop_signal_immediately() {
        let work = tempfile::tempdir().unwrap();
        let cfg = test_config(work.path());
        let sweep = SweepConfig {
            loops: 1,
            rounds_per_param: 0,
            root: work.path().join("runs"),
        };
        let runner = FakeRunner::new(ORDO_FIXTURE);
        let stop = AtomicBool::new(true);

        let mut initial = BestParams::default();
        initial.set("KingSafety", "33");
        let best = run_sweep(&runner, &cfg, &sweep, &test_ranges(), initial.clone(), &stop).unwrap();
        assert_eq!(best, initial);
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn round_seeds_unplayed_candidates() {
        let work = tempfile::tempdir().unwrap();
        let cfg = test_config(work.path());
        let runner = FakeRunner::new(ORDO_FIXTURE);
        let candidates = test_ranges()[0].candidate_names();

        let scores =
            run_round(&runner, &cfg, "KingSafety", &candidates, &BTreeMap::new()).unwrap();
        assert_eq!(scores.len(), 3);
        // config-50 は未対局なのでプレースホルダで残る
        let unplayed = scores.iter().find(|s| s.name == "config-50").unwrap();
        assert_eq!(unplayed.error, PLACEHOLDER_ERROR);
        let played = scores.iter().find(|s| s.name == "config-40").unwrap();
        assert_eq!(played.rating, 25.3);
    }
}
