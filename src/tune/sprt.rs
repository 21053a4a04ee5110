//! 逐次確率比検定（SPRT）。
//!
//! 勝/分/負の累積カウントと2つのElo仮説から、候補が基準より
//! 強い(H1)・強くない(H0)・判定保留(Continue)を決める。
//! 5つの数値入力と2つの誤り率だけの純関数。

use std::fmt;

/// Elo差を期待スコアに変換するロジスティック関係。
pub fn logistic_score(elo: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf(-elo / 400.0))
}

/// 対数尤度比。いずれかのカウントが0のときは証拠不足として 0.0 を返す
/// （ゼロ除算になる式を評価しない）。
pub fn log_likelihood_ratio(wins: u64, draws: u64, losses: u64, elo0: f64, elo1: f64) -> f64 {
    if wins == 0 || draws == 0 || losses == 0 {
        return 0.0;
    }
    let n = (wins + draws + losses) as f64;
    let w = wins as f64 / n;
    let d = draws as f64 / n;
    let s = w + d / 2.0;
    let m2 = w + d / 4.0;
    let var = m2 - s * s;
    let var_s = var / n;
    let s0 = logistic_score(elo0);
    let s1 = logistic_score(elo1);
    (s1 - s0) * (2.0 * s - s0 - s1) / var_s / 2.0
}

/// Wald 境界。`lower = ln(beta/(1-alpha))`, `upper = ln((1-beta)/alpha)`。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaldBounds {
    pub lower: f64,
    pub upper: f64,
}

impl WaldBounds {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            lower: (beta / (1.0 - alpha)).ln(),
            upper: ((1.0 - beta) / alpha).ln(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SprtDecision {
    /// 候補の方が強い
    AcceptH1,
    /// 候補は強くない
    AcceptH0,
    /// 証拠不足、続行
    Continue,
}

impl fmt::Display for SprtDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SprtDecision::AcceptH1 => write!(f, "H1"),
            SprtDecision::AcceptH0 => write!(f, "H0"),
            SprtDecision::Continue => write!(f, "continue"),
        }
    }
}

/// 検定結果（統計量と判定のペア）。
#[derive(Clone, Copy, Debug)]
pub struct SprtReport {
    pub llr: f64,
    pub bounds: WaldBounds,
    pub decision: SprtDecision,
}

#[allow(clippy::too_many_arguments)]
pub fn sprt(
    wins: u64,
    draws: u64,
    losses: u64,
    elo0: f64,
    elo1: f64,
    alpha: f64,
    beta: f64,
) -> SprtReport {
    let llr = log_likelihood_ratio(wins, draws, losses, elo0, elo1);
    let bounds = WaldBounds::new(alpha, beta);
    let decision = if llr > bounds.upper {
        SprtDecision::AcceptH1
    } else if llr < bounds.lower {
        SprtDecision::AcceptH0
    } else {
        SprtDecision::Continue
    };
    SprtReport {
        llr,
        bounds,
        decision,
    }
}
