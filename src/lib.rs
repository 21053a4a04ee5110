//! UCIエンジン向けパラメータチューニング・解析ハーネス
//!
//! 外部のUCIエンジンを子プロセスとして駆動し、局面解析（analyze）と
//! パラメータ最適化ループ（tune）を提供する。対局実行とレーティング
//! 計算は外部ツール（c-chess-cli / ordo）に委譲する。

pub mod analysis;
pub mod common;
pub mod tune;
pub mod uci;
