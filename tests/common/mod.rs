//! テスト用の偽UCIエンジン。シェルスクリプトで台本応答する。

use std::fs;
use std::path::{Path, PathBuf};

/// 通常応答するエンジン。ハンドシェイク・同期・探索すべてに答える。
pub const RESPONSIVE_ENGINE: &str = r#"#!/bin/sh
while read line; do
  case "$line" in
    uci)
      echo "id name fake-engine"
      echo "option name Hash type spin default 16 min 1 max 1024"
      echo "option name Clear Hash type button"
      echo "uciok"
      ;;
    isready)
      echo "readyok"
      ;;
    go*)
      echo "info depth 15 score cp 13 pv e2e4"
      echo "bestmove e2e4"
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#;

/// ハンドシェイクには応じるが `go` を黙殺するエンジン。
pub const MUTE_SEARCH_ENGINE: &str = r#"#!/bin/sh
while read line; do
  case "$line" in
    uci)
      echo "uciok"
      ;;
    isready)
      echo "readyok"
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#;

pub fn fake_engine(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, script).expect("write fake engine script");
    let mut perms = fs::metadata(&path).expect("stat script").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod script");
    path
}
