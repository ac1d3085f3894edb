//! Lifecycle management for the process that serves the editor UI.
//! （管理提供編輯器 UI 的後端進程生命週期。）
//!
//! A [`RunSpec`] describes the command; [`select_port`] makes sure nothing else
//! already listens where the backend will; [`BackendSupervisor`] starts it, waits
//! for its port to accept connections, reports liveness and stops it with a
//! terminate-then-kill sequence.
//! [`RunSpec`] 描述指令；[`BackendSupervisor`] 負責啟動、等待連接埠就緒、回報存活狀態，
//! 並以先終止後強制結束的方式停止進程。

pub mod port;
pub mod supervisor;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;

pub use port::{ensure_port_free, select_port, PortChoice, PORT_SEARCH_SPAN};
pub use supervisor::{BackendState, BackendSupervisor, ShutdownOutcome};

/// Errors that may surface while supervising a process.
/// （監督進程時有可能發生的錯誤。）
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process is already running")]
    AlreadyRunning,
    #[error("process has not been started")]
    NotStarted,
    #[error("failed to poll process status: {0}")]
    Poll(std::io::Error),
    #[error("failed to signal process: {0}")]
    Signal(std::io::Error),
    #[error("failed to terminate process: {0}")]
    Kill(std::io::Error),
    #[error("failed to resolve address {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("port {address} is already in use")]
    PortInUse { address: String },
    #[error("no free port on {host} between {start} and {end}")]
    NoFreePort { host: String, start: u16, end: u16 },
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process exited before becoming ready (exit code {code:?})")]
    ExitedEarly { code: Option<i32> },
    #[error("process was not ready after {0:?}")]
    TimedOut(Duration),
}

/// Serializable command specification.
/// （可序列化的指令設定資料結構。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub clear_env: bool,
    /// Send the child's stdout to our stderr, keeping our stdout free for other use.
    #[serde(default)]
    pub stdout_to_stderr: bool,
}

impl RunSpec {
    /// Creates a new command pointing at the given program.
    /// （以指定的程式建立指令設定。）
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            clear_env: false,
            stdout_to_stderr: false,
        }
    }

    /// Adds multiple arguments at once.
    /// （一次加入多個參數。）
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Registers an environment variable override.
    /// （設定環境變數覆寫值。）
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Enables environment clearing before applying overrides.
    /// （先清除既有環境變數，再套用覆寫值。）
    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// Sets the working directory.
    /// （設定指令執行的工作目錄。）
    pub fn with_working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    pub fn with_stdout_to_stderr(mut self) -> Self {
        self.stdout_to_stderr = true;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.stdin(Stdio::null());
        if self.stdout_to_stderr {
            command.stdout(Stdio::from(std::io::stderr()));
        }

        if self.clear_env {
            command.env_clear();
        }

        for (key, value) in &self.env {
            command.env(key, value);
        }

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}
