//! SPRT 判定の単発計算。
//!
//! 勝/分/負カウントと仮説・誤り率から LLR と判定を表示する。

use anyhow::Result;
use clap::Parser;
use tuner::tune::sprt::sprt;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sequential probability ratio test for engine matches")]
struct Cli {
    /// 勝ち数
    wins: u64,
    /// 引き分け数
    draws: u64,
    /// 負け数
    losses: u64,
    /// 帰無仮説のElo差 (H0)
    elo0: f64,
    /// 対立仮説のElo差 (H1)
    elo1: f64,
    /// 第一種過誤率
    #[arg(default_value_t = 0.05)]
    alpha: f64,
    /// 第二種過誤率
    #[arg(default_value_t = 0.05)]
    beta: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let report = sprt(cli.wins, cli.draws, cli.losses, cli.elo0, cli.elo1, cli.alpha, cli.beta);
    println!(
        "LLR: {:.5} [{:.5}, {:.5}] ({}, {})",
        report.llr, report.bounds.lower, report.bounds.upper, cli.elo0, cli.elo1
    );
    println!("{}", report.decision);
    Ok(())
}
