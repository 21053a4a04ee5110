//! 候補設定の explore/exploit ランキング。

use std::cmp::Ordering;

/// レーティング計算後の候補1件。
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateScore {
    pub name: String,
    pub rating: f64,
    pub error: f64,
}

impl CandidateScore {
    /// 探索優先度: `rating + explore_factor * error`（上側信頼値）。
    pub fn upper_confidence(&self, explore_factor: f64) -> f64 {
        self.rating + explore_factor * self.error
    }

    /// 保守的評価: `rating - error`（下側信頼値）。現時点の最良判定に使う。
    pub fn lower_confidence(&self) -> f64 {
        self.rating - self.error
    }
}

/// ランキング設定。
#[derive(Clone, Copy, Debug)]
pub struct SelectionConfig {
    pub explore_factor: f64,
    /// exploit 表示数
    pub nb_best_print: usize,
    /// explore 選出数
    pub nb_best_test: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            explore_factor: 1.5,
            nb_best_print: 15,
            nb_best_test: 15,
        }
    }
}

fn desc(a: f64, b: f64) -> Ordering {
    // NaN は比較不能として同順位に落とす（安定ソートで入力順維持）
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// 点推定の降順（exploit ビュー）。安定ソートなので同値は入力順。
pub fn rank_exploit(scores: &[CandidateScore]) -> Vec<CandidateScore> {
    let mut ranked = scores.to_vec();
    ranked.sort_by(|a, b| desc(a.rating, b.rating));
    ranked
}

/// 上側信頼値の降順（explore ビュー）。次ラウンドの測定対象を決める。
pub fn rank_explore(scores: &[CandidateScore], explore_factor: f64) -> Vec<CandidateScore> {
    let mut ranked = scores.to_vec();
    ranked.sort_by(|a, b| {
        desc(a.upper_confidence(explore_factor), b.upper_confidence(explore_factor))
    });
    ranked
}

/// 下側信頼値が最大の候補。ラウンド終了時の「現時点の最良」。
pub fn current_best(scores: &[CandidateScore]) -> Option<&CandidateScore> {
    scores.iter().max_by(|a, b| {
        a.lower_confidence().partial_cmp(&b.lower_confidence()).unwrap_or(Ordering::Equal)
    })
}
