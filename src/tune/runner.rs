//! 外部ツール（c-chess-cli / ordo）の実行ラッパ。
//!
//! コマンドは常に引数リストで組み立て、シェル文字列は使わない。
//! タイムアウト時はプロセスグループごと SIGTERM し、子エンジンの
//! リークを防ぐ。

use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::warn;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const TERM_GRACE: Duration = Duration::from_secs(2);

/// 外部ツール呼び出し1回分。
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// stdout/stderr の書き出し先（None なら破棄）
    pub log_file: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolOutcome {
    Completed { code: i32 },
    TimedOut,
}

impl ToolOutcome {
    pub fn succeeded(self) -> bool {
        matches!(self, ToolOutcome::Completed { code: 0 })
    }
}

/// 実行器をトレイトにしてテストから差し替えられるようにする。
pub trait ToolRunner {
    fn run(&self, inv: &ToolInvocation) -> Result<ToolOutcome>;
}

/// 実プロセスを起動する実行器。
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, inv: &ToolInvocation) -> Result<ToolOutcome> {
        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args).stdin(Stdio::null());

        match &inv.log_file {
            Some(path) => {
                let out = File::create(path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                let err = out.try_clone().context("failed to clone log handle")?;
                cmd.stdout(Stdio::from(out)).stderr(Stdio::from(err));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        // 新しいセッションで起動し、グループ単位で殺せるようにする
        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", inv.program.display()))?;

        let deadline = Instant::now() + inv.timeout;
        loop {
            if let Some(status) = child.try_wait().context("failed to poll child")? {
                return Ok(ToolOutcome::Completed {
                    code: status.code().unwrap_or(-1),
                });
            }
            if Instant::now() >= deadline {
                warn!("{} exceeded {:?}, terminating process group", inv.program.display(), inv.timeout);
                terminate_group(&mut child);
                let _ = child.wait();
                return Ok(ToolOutcome::TimedOut);
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

#[cfg(unix)]
fn terminate_group(child: &mut Child) {
    let pgid = child.id() as i32;
    unsafe {
        libc::kill(-pgid, libc::SIGTERM);
    }
    let deadline = Instant::now() + TERM_GRACE;
    while Instant::now() < deadline {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate_group(child: &mut Child) {
    let _ = child.kill();
}
