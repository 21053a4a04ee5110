use thiserror::Error;

/// プロトコル層の失敗分類。
///
/// `Broken` はそのワーカーにとって致命的（プロセス消失）、`Timeout` は
/// セッションをリセットすれば回復できる。呼び出し側はこの区別で
/// ワーカー継続可否を判断する。
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{label}: engine exited or closed its pipe")]
    Broken { label: String },

    #[error("{label}: timed out waiting for '{expected}'")]
    Timeout { label: String, expected: String },

    #[error("{label}: {source}")]
    Io {
        label: String,
        source: std::io::Error,
    },
}

impl ProtocolError {
    /// セッション再作成で回復可能か。
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::Timeout { .. })
    }
}

/// `search` 1回分のエンジン出力。terminator (`bestmove` 行) を含む全行を保持する。
#[derive(Clone, Debug, Default)]
pub struct SearchOutput {
    pub lines: Vec<String>,
}

impl SearchOutput {
    /// `bestmove` 行から指し手を取り出す。
    pub fn bestmove(&self) -> Option<&str> {
        let last = self.lines.last()?;
        last.strip_prefix("bestmove")?.split_whitespace().next()
    }

    /// 最後の info 行（最終深度の評価を含む行）。
    pub fn last_info(&self) -> Option<&str> {
        self.lines.iter().rev().find(|l| l.starts_with("info")).map(String::as_str)
    }
}
