use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use crate::{RunError, RunSpec};

const POLL_INTERVAL: Duration = Duration::from_millis(15);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

/// Observed lifecycle state of the backend.
/// （後端進程目前的生命週期狀態。）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendState {
    Idle,
    Running { pid: u32 },
    Exited { code: Option<i32> },
    Stopped,
}

/// How [`BackendSupervisor::shutdown`] ended the process.
/// （[`BackendSupervisor::shutdown`] 結束進程的方式。）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Exited on its own after the polite termination request.
    Terminated,
    /// Did not exit within the grace period and was killed.
    Killed,
    /// Had already exited before shutdown was requested.
    AlreadyExited,
    /// Was never started.
    NotStarted,
}

/// Starts, watches and stops a single backend process.
/// （啟動、監看並停止單一後端進程。）
#[derive(Debug)]
pub struct BackendSupervisor {
    spec: RunSpec,
    child: Option<Child>,
    state: BackendState,
}

impl BackendSupervisor {
    pub fn new(spec: RunSpec) -> Self {
        Self {
            spec,
            child: None,
            state: BackendState::Idle,
        }
    }

    /// Spawns the backend and returns its pid.
    /// （啟動後端並回傳 pid。）
    pub fn start(&mut self) -> Result<u32, RunError> {
        if self.is_alive() {
            return Err(RunError::AlreadyRunning);
        }
        let child = self.spec.command().spawn().map_err(|source| RunError::Spawn {
            program: self.spec.program.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::info!(program = %self.spec.program, pid, "backend started");
        self.child = Some(child);
        self.state = BackendState::Running { pid };
        Ok(pid)
    }

    pub fn pid(&self) -> Option<u32> {
        match self.state {
            BackendState::Running { pid } => Some(pid),
            _ => None,
        }
    }

    /// Polls the child and reports whether it is still running.
    /// （輪詢子進程並回報是否仍在執行。）
    pub fn is_alive(&mut self) -> bool {
        matches!(self.state(), BackendState::Running { .. })
    }

    pub fn state(&mut self) -> BackendState {
        if let (BackendState::Running { .. }, Some(child)) = (self.state, self.child.as_mut()) {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::warn!(program = %self.spec.program, code = ?status.code(), "backend exited");
                    self.state = BackendState::Exited {
                        code: status.code(),
                    };
                    self.child = None;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "failed to poll backend status");
                }
            }
        }
        self.state
    }

    /// Blocks until `address` accepts a TCP connection, the process exits, or
    /// `timeout` elapses.
    /// （阻塞直到 `address` 可建立 TCP 連線、進程結束，或逾時。）
    pub fn wait_until_ready(&mut self, address: &str, timeout: Duration) -> Result<(), RunError> {
        let targets: Vec<SocketAddr> = address
            .to_socket_addrs()
            .map_err(|source| RunError::Resolve {
                address: address.to_string(),
                source,
            })?
            .collect();
        let start = Instant::now();
        loop {
            match self.state() {
                BackendState::Running { .. } => {}
                BackendState::Exited { code } => return Err(RunError::ExitedEarly { code }),
                BackendState::Idle | BackendState::Stopped => return Err(RunError::NotStarted),
            }
            if targets
                .iter()
                .any(|target| TcpStream::connect_timeout(target, CONNECT_TIMEOUT).is_ok())
            {
                tracing::info!(address, elapsed_ms = start.elapsed().as_millis() as u64, "backend ready");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(RunError::TimedOut(timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Asks the process to exit, waits up to `grace`, then kills it.
    /// （要求進程結束，等待 `grace` 後仍未結束則強制終止。）
    pub fn shutdown(&mut self, grace: Duration) -> Result<ShutdownOutcome, RunError> {
        match self.state() {
            BackendState::Idle => return Ok(ShutdownOutcome::NotStarted),
            BackendState::Exited { .. } | BackendState::Stopped => {
                return Ok(ShutdownOutcome::AlreadyExited)
            }
            BackendState::Running { .. } => {}
        }
        let Some(mut child) = self.child.take() else {
            return Ok(ShutdownOutcome::AlreadyExited);
        };
        self.state = BackendState::Stopped;

        if request_termination(&child)? {
            let start = Instant::now();
            while start.elapsed() < grace {
                if child.try_wait().map_err(RunError::Poll)?.is_some() {
                    tracing::info!(program = %self.spec.program, "backend terminated");
                    return Ok(ShutdownOutcome::Terminated);
                }
                thread::sleep(POLL_INTERVAL);
            }
        }

        if child.try_wait().map_err(RunError::Poll)?.is_some() {
            return Ok(ShutdownOutcome::Terminated);
        }
        child.kill().map_err(RunError::Kill)?;
        child.wait().map_err(RunError::Poll)?;
        tracing::warn!(program = %self.spec.program, grace_ms = grace.as_millis() as u64, "backend killed after grace period");
        Ok(ShutdownOutcome::Killed)
    }
}

impl Drop for BackendSupervisor {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

/// Sends SIGTERM. Returns `false` where no polite request exists.
#[cfg(unix)]
fn request_termination(child: &Child) -> Result<bool, RunError> {
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|_| RunError::Signal(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;
    // SAFETY: `pid` belongs to a child we have not yet reaped, so it cannot have been recycled.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(true)
    } else {
        Err(RunError::Signal(std::io::Error::last_os_error()))
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) -> Result<bool, RunError> {
    Ok(false)
}
