//! JSON-lines channel between the UI process and the workspace host.
//! （UI 進程與工作區主機之間的 JSON-lines 通道。）
//!
//! Each stdin line is one intent such as `{"intent":"open","path":"src/main.py"}`.
//! Each reply is one stdout line: `{"ok":<snapshot>}`, `{"unsaved":[...]}` or
//! `{"error":{"kind":"not_found","message":"..."}}`. Snapshots published by the
//! reconciler between intents are written as `{"changed":<snapshot>}`.
//! 每行 stdin 為一個操作；每個回覆為一行 stdout。協調器在操作之間發佈的快照以 `changed` 輸出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustcodium_project::{
    from_wire, to_wire, ErrorKind, Resolution, WorkspaceError, WorkspaceHandle, WorkspaceSnapshot,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
enum BridgeIntent {
    Open { path: String },
    Edit { path: String, text: String },
    Save { path: String },
    SaveAs { path: String, target: String },
    Close { path: String },
    Expand { path: String },
    Collapse { path: String },
    SetActive { path: String },
    ResolveConflict { path: String, resolution: Resolution },
    Snapshot,
    Unsaved,
    Shutdown,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum BridgeReply<'a> {
    Ok(&'a WorkspaceSnapshot),
    Changed(&'a WorkspaceSnapshot),
    Unsaved(Vec<String>),
    Error { kind: FailureKind, message: String },
}

#[derive(Serialize)]
#[serde(untagged)]
enum FailureKind {
    Workspace(ErrorKind),
    Bridge(&'static str),
}

enum Answer {
    Snapshot(Arc<WorkspaceSnapshot>),
    Unsaved(Vec<PathBuf>),
    Stop,
}

struct Failure {
    kind: FailureKind,
    message: String,
    host_closed: bool,
}

impl Failure {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Bridge("invalid_request"),
            message: message.into(),
            host_closed: false,
        }
    }
}

impl From<WorkspaceError> for Failure {
    fn from(err: WorkspaceError) -> Self {
        Self {
            kind: FailureKind::Workspace(err.kind()),
            message: err.to_string(),
            host_closed: matches!(err, WorkspaceError::HostClosed),
        }
    }
}

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    EndOfInput,
    ShutdownRequested,
    HostStopped,
}

/// Pumps intents from `input` into the host and writes replies to `output`
/// until end of input, a `shutdown` intent, or the host going away.
/// （將 `input` 的操作送入主機並把回覆寫到 `output`，直到輸入結束、收到 `shutdown` 或主機停止。）
pub async fn serve<R, W>(handle: &WorkspaceHandle, input: R, mut output: W) -> Result<BridgeExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut updates = handle.subscribe();
    let mut written = updates.borrow_and_update().revision;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read bridge input")? else {
                    return Ok(BridgeExit::EndOfInput);
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let intent = match serde_json::from_str::<BridgeIntent>(line) {
                    Ok(intent) => intent,
                    Err(err) => {
                        tracing::warn!(error = %err, "rejected bridge request");
                        write_failure(&mut output, Failure::invalid(err.to_string())).await?;
                        continue;
                    }
                };
                match dispatch(handle, intent).await {
                    Ok(Answer::Snapshot(snapshot)) => {
                        written = written.max(snapshot.revision);
                        write_reply(&mut output, &BridgeReply::Ok(&snapshot)).await?;
                    }
                    Ok(Answer::Unsaved(paths)) => {
                        let paths = paths.iter().map(|path| to_wire(path)).collect();
                        write_reply(&mut output, &BridgeReply::Unsaved(paths)).await?;
                    }
                    Ok(Answer::Stop) => return Ok(BridgeExit::ShutdownRequested),
                    Err(failure) => {
                        let host_gone = failure.host_closed;
                        write_failure(&mut output, failure).await?;
                        if host_gone {
                            return Ok(BridgeExit::HostStopped);
                        }
                    }
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(BridgeExit::HostStopped);
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.revision > written {
                    written = snapshot.revision;
                    write_reply(&mut output, &BridgeReply::Changed(&snapshot)).await?;
                }
            }
        }
    }
}

async fn dispatch(handle: &WorkspaceHandle, intent: BridgeIntent) -> Result<Answer, Failure> {
    let snapshot = match intent {
        BridgeIntent::Open { path } => handle.open(path_arg(&path)?).await?,
        BridgeIntent::Edit { path, text } => handle.edit(path_arg(&path)?, text).await?,
        BridgeIntent::Save { path } => handle.save(path_arg(&path)?).await?,
        BridgeIntent::SaveAs { path, target } => {
            handle.save_as(path_arg(&path)?, path_arg(&target)?).await?
        }
        BridgeIntent::Close { path } => handle.close(path_arg(&path)?).await?,
        BridgeIntent::Expand { path } => handle.expand(path_arg(&path)?).await?,
        BridgeIntent::Collapse { path } => handle.collapse(path_arg(&path)?).await?,
        BridgeIntent::SetActive { path } => handle.set_active(path_arg(&path)?).await?,
        BridgeIntent::ResolveConflict { path, resolution } => {
            handle.resolve_conflict(path_arg(&path)?, resolution).await?
        }
        BridgeIntent::Snapshot => handle.snapshot().await?,
        BridgeIntent::Unsaved => return Ok(Answer::Unsaved(handle.unsaved_paths().await?)),
        BridgeIntent::Shutdown => return Ok(Answer::Stop),
    };
    Ok(Answer::Snapshot(snapshot))
}

fn path_arg(text: &str) -> Result<PathBuf, Failure> {
    if text.is_empty() {
        return Err(Failure::invalid("path must not be empty"));
    }
    from_wire(text).map_err(Failure::invalid)
}

async fn write_failure<W>(output: &mut W, failure: Failure) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let reply = BridgeReply::Error {
        kind: failure.kind,
        message: failure.message,
    };
    write_reply(output, &reply).await
}

async fn write_reply<W>(output: &mut W, reply: &BridgeReply<'_>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(reply).context("failed to encode bridge reply")?;
    line.push(b'\n');
    output
        .write_all(&line)
        .await
        .context("failed to write bridge reply")?;
    output.flush().await.context("failed to flush bridge reply")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustcodium_project::{HostOptions, TreeFilter, Workspace, WorkspaceHost};
    use serde_json::Value;
    use std::fs;
    use tempfile::tempdir;

    async fn run_script(root: &std::path::Path, script: &str) -> (BridgeExit, Vec<Value>) {
        let workspace = Workspace::open_root(root, TreeFilter::default()).unwrap();
        let (host, handle) = WorkspaceHost::new(workspace, HostOptions::default());
        let task = tokio::spawn(host.run());

        let mut output = Vec::new();
        let exit = serve(&handle, script.as_bytes(), &mut output).await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let replies = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (exit, replies)
    }

    #[tokio::test]
    async fn open_edit_save_over_json_lines() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "a=1").unwrap();
        let script = concat!(
            "{\"intent\":\"open\",\"path\":\"main.py\"}\n",
            "{\"intent\":\"edit\",\"path\":\"main.py\",\"text\":\"a=2\"}\n",
            "{\"intent\":\"unsaved\"}\n",
            "{\"intent\":\"save\",\"path\":\"main.py\"}\n",
        );

        let (exit, replies) = run_script(dir.path(), script).await;
        assert_eq!(exit, BridgeExit::EndOfInput);
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0]["ok"]["active_content"], "a=1");
        assert_eq!(replies[0]["ok"]["buffers"][0]["language"], "python");
        assert_eq!(replies[1]["ok"]["buffers"][0]["dirty"], true);
        let unsaved = replies[2]["unsaved"].as_array().unwrap();
        assert_eq!(unsaved.len(), 1);
        assert!(unsaved[0].as_str().unwrap().ends_with("main.py"));
        assert_eq!(replies[3]["ok"]["buffers"][0]["dirty"], false);
        assert_eq!(fs::read_to_string(dir.path().join("main.py")).unwrap(), "a=2");
    }

    #[tokio::test]
    async fn failures_are_reported_and_the_bridge_keeps_going() {
        let dir = tempdir().unwrap();
        let script = concat!(
            "not json\n",
            "\n",
            "{\"intent\":\"open\",\"path\":\"missing.txt\"}\n",
            "{\"intent\":\"save\",\"path\":\"\"}\n",
            "{\"intent\":\"shutdown\"}\n",
            "{\"intent\":\"snapshot\"}\n",
        );

        let (exit, replies) = run_script(dir.path(), script).await;
        assert_eq!(exit, BridgeExit::ShutdownRequested);
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["error"]["kind"], "invalid_request");
        assert_eq!(replies[1]["error"]["kind"], "not_found");
        assert!(replies[1]["error"]["message"]
            .as_str()
            .unwrap()
            .contains("missing.txt"));
        assert_eq!(replies[2]["error"]["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn tree_intents_return_sorted_children() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/b.py"), "").unwrap();
        fs::write(dir.path().join("pkg/A.py"), "").unwrap();
        let script = "{\"intent\":\"expand\",\"path\":\"pkg\"}\n{\"intent\":\"collapse\",\"path\":\"pkg\"}\n";

        let (_, replies) = run_script(dir.path(), script).await;
        let children = replies[0]["ok"]["tree"]["children"][0]["children"]
            .as_array()
            .unwrap()
            .iter()
            .map(|node| node["name"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(children, vec!["A.py", "b.py"]);
        assert_eq!(
            replies[1]["ok"]["tree"]["children"][0]["children"]
                .as_array()
                .map_or(0, Vec::len),
            0
        );
    }
}
