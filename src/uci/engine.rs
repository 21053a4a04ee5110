use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::debug;

use super::types::{ProtocolError, SearchOutput};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(600);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

type Result<T> = std::result::Result<T, ProtocolError>;

/// エンジンプロセス起動時の設定。
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    /// 起動直後に適用するUCIオプション (Name=Value 形式)
    pub uci_options: Vec<String>,
    /// `search` の1行読み取りに適用するタイムアウト
    pub search_timeout: Duration,
}

impl EngineConfig {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            args: Vec::new(),
            uci_options: Vec::new(),
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }
}

/// 1本のエンジンに対する入出力をカプセル化する。
///
/// stdout は専用スレッドで行単位に読み、チャネル経由で受け取る。
/// 全ての待ち受けは `recv_timeout` 経由なので、エンジンが無応答でも
/// ワーカーが永久にブロックすることはない。
pub struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    opt_names: HashSet<String>,
    search_timeout: Duration,
    pub label: String,
}

impl EngineProcess {
    /// プロセスを起動し、`uci` ハンドシェイクとオプション適用まで済ませる。
    pub fn spawn(cfg: &EngineConfig, label: String) -> Result<Self> {
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ProtocolError::Io {
                label: label.clone(),
                source: e,
            })?;
        let stdin = child.stdin.take().ok_or_else(|| ProtocolError::Broken {
            label: label.clone(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ProtocolError::Broken {
            label: label.clone(),
        })?;

        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut proc = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            opt_names: HashSet::new(),
            search_timeout: cfg.search_timeout,
            label,
        };
        proc.handshake()?;
        for opt in &cfg.uci_options {
            if let Some((name, value)) = opt.split_once('=') {
                proc.set_option(name.trim(), value.trim())?;
            }
        }
        proc.sync()?;
        Ok(proc)
    }

    /// `uci` を送り、`uciok` が来るまで待つ。途中の `option` 行から
    /// エンジンが受け付けるオプション名を収集する。
    fn handshake(&mut self) -> Result<()> {
        self.write_line("uci")?;
        loop {
            let line = self.recv_line(HANDSHAKE_TIMEOUT, "uciok")?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name);
                }
            } else if line == "uciok" {
                return Ok(());
            }
            // それ以外の行 (id 等) は情報として無視する
        }
    }

    /// `isready` / `readyok` 同期。エンジン状態を変える前に必ず呼ぶ。
    pub fn sync(&mut self) -> Result<()> {
        self.write_line("isready")?;
        loop {
            let line = self.recv_line(READY_TIMEOUT, "readyok")?;
            if line == "readyok" {
                return Ok(());
            }
        }
    }

    /// オプションを設定する。前後の `sync` で適用完了を保証する。
    ///
    /// ハンドシェイクでオプション名一覧が得られた場合、未知の名前は送らない。
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        if !self.opt_names.is_empty() && !self.opt_names.contains(name) {
            debug!("[{}] skipping unknown option '{}'", self.label, name);
            return Ok(());
        }
        self.sync()?;
        self.write_line(&format!("setoption name {} value {}", name, value))?;
        self.sync()
    }

    pub fn new_game(&mut self) -> Result<()> {
        self.sync()?;
        self.write_line("ucinewgame")?;
        self.sync()
    }

    /// 局面を設定して探索を実行し、`bestmove` 行までの全出力を返す。
    ///
    /// `position_cmd` は `position fen ...` / `position startpos ...` 形式、
    /// `go_cmd` は `go depth ...` 等をそのまま渡す。
    pub fn search(&mut self, position_cmd: &str, go_cmd: &str) -> Result<SearchOutput> {
        self.write_line(position_cmd)?;
        self.write_line(go_cmd)?;

        let deadline = Instant::now() + self.search_timeout;
        let mut output = SearchOutput::default();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = self.recv_line(remaining, "bestmove")?;
            let done = line.starts_with("bestmove");
            output.lines.push(line);
            if done {
                return Ok(output);
            }
        }
    }

    /// 終了要求。直前の `sync` で処理中コマンドの完了を待ってから送る。
    pub fn quit(&mut self) -> Result<()> {
        self.sync()?;
        self.write_line("quit")
    }

    fn recv_line(&self, timeout: Duration, expected: &str) -> Result<String> {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => {
                debug!("<-- [{}] {}", self.label, line);
                Ok(line)
            }
            Err(RecvTimeoutError::Timeout) => Err(ProtocolError::Timeout {
                label: self.label.clone(),
                expected: expected.to_string(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ProtocolError::Broken {
                label: self.label.clone(),
            }),
        }
    }

    fn write_line(&mut self, msg: &str) -> Result<()> {
        debug!("--> [{}] {}", self.label, msg);
        let io_err = |e| ProtocolError::Io {
            label: self.label.clone(),
            source: e,
        };
        self.stdin.write_all(msg.as_bytes()).map_err(io_err)?;
        self.stdin.write_all(b"\n").map_err(io_err)?;
        self.stdin.flush().map_err(io_err)
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.write_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// `option name <Name> type ...` 行からオプション名を取り出す。
pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.peek() {
                if *next == "type" {
                    break;
                }
                parts.push(tokens.next().unwrap().to_string());
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}
