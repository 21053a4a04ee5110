//! パラメータチューニング一式。
//!
//! 対局ツールと ordo を外部プロセスとして駆動し、explore/exploit
//! ランキングでエンジンパラメータを最適化する。SPRT 判定もここ。

pub mod matchrun;
pub mod ordo;
pub mod round;
pub mod runner;
pub mod select;
pub mod sprt;

pub use matchrun::{candidate_name, value_from_name, MatchSettings};
pub use ordo::{parse_ordo, OrdoSettings};
pub use round::{run_sweep, BestParams, ParameterRange, RoundConfig, SweepConfig};
pub use runner::{SystemRunner, ToolInvocation, ToolOutcome, ToolRunner};
pub use select::{CandidateScore, SelectionConfig};
pub use sprt::{sprt, SprtDecision, SprtReport};
