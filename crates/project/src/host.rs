//! Single-consumer event loop owning the [`Workspace`].
//! 持有 [`Workspace`] 的單一消費者事件迴圈。
//!
//! User intents, watcher events, the debounce deadline and finished disk I/O all
//! arrive as messages; only the loop mutates the workspace. Reads, writes and
//! listings run on tokio's blocking pool and report back through a channel.
//! 使用者操作、監視事件、去抖動期限與完成的磁碟 I/O 都以訊息送達，只有迴圈會修改工作區。

use std::collections::{HashMap, VecDeque};
use std::future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustcodium_core::document::{DiskSnapshot, DocumentError, Fingerprint};
use rustcodium_core::file_monitor::{FileChangeEvent, FileMonitor, FileMonitorError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task;

use crate::reconciler::{ChangeReconciler, DiskReading, DEFAULT_DEBOUNCE};
use crate::tree::{list_directory, DirEntry, ExpandTicket, TreeError};
use crate::workspace::{
    OpenRequest, OpenTicket, Resolution, SaveTicket, Workspace, WorkspaceError, WorkspaceSnapshot,
};

type Reply = oneshot::Sender<Result<Arc<WorkspaceSnapshot>, WorkspaceError>>;

/// Tuning for [`WorkspaceHost`].
/// [`WorkspaceHost`] 的設定。
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub debounce: Duration,
    pub intent_capacity: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            intent_capacity: 64,
        }
    }
}

#[derive(Debug)]
enum Intent {
    Open { path: PathBuf, reply: Reply },
    Edit { path: PathBuf, text: String, reply: Reply },
    Save { path: PathBuf, reply: Reply },
    SaveAs { path: PathBuf, target: PathBuf, reply: Reply },
    Close { path: PathBuf, reply: Reply },
    Expand { path: PathBuf, reply: Reply },
    Collapse { path: PathBuf, reply: Reply },
    SetActive { path: PathBuf, reply: Reply },
    Resolve { path: PathBuf, resolution: Resolution, reply: Reply },
    Snapshot { reply: Reply },
    Unsaved { reply: oneshot::Sender<Vec<PathBuf>> },
    Shutdown,
}

enum Completion {
    Opened {
        ticket: OpenTicket,
        result: Result<DiskSnapshot, DocumentError>,
        reply: Reply,
    },
    Listed {
        ticket: ExpandTicket,
        result: Result<Vec<DirEntry>, TreeError>,
        reply: Reply,
    },
    Saved {
        source: PathBuf,
        ticket: SaveTicket,
        result: Result<Fingerprint, DocumentError>,
        reply: Reply,
    },
    Reloaded {
        path: PathBuf,
        result: Result<DiskSnapshot, DocumentError>,
        reply: Reply,
    },
    DiskRead {
        reading: DiskReading,
    },
}

/// Owns the workspace and serialises every mutation through [`run`](Self::run).
/// 持有工作區，所有修改都經由 [`run`](Self::run) 序列化。
pub struct WorkspaceHost {
    workspace: Workspace,
    reconciler: ChangeReconciler,
    intents: mpsc::Receiver<Intent>,
    events: mpsc::UnboundedReceiver<FileChangeEvent>,
    events_tx: mpsc::UnboundedSender<FileChangeEvent>,
    completions: mpsc::UnboundedReceiver<Completion>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    snapshots: watch::Sender<Arc<WorkspaceSnapshot>>,
    published: u64,
    /// Buffers with a save in flight, and the save intents waiting behind it.
    saving: HashMap<PathBuf, VecDeque<Intent>>,
    monitor: Option<FileMonitor>,
}

impl WorkspaceHost {
    pub fn new(workspace: Workspace, options: HostOptions) -> (Self, WorkspaceHandle) {
        let (intents_tx, intents) = mpsc::channel(options.intent_capacity.max(1));
        let (events_tx, events) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let initial = Arc::new(workspace.snapshot());
        let published = initial.revision;
        let (snapshots, snapshots_rx) = watch::channel(initial);

        let handle = WorkspaceHandle {
            intents: intents_tx,
            events: events_tx.clone(),
            snapshots: snapshots_rx,
        };
        let host = Self {
            workspace,
            reconciler: ChangeReconciler::new(options.debounce),
            intents,
            events,
            events_tx,
            completions,
            completions_tx,
            snapshots,
            published,
            saving: HashMap::new(),
            monitor: None,
        };
        (host, handle)
    }

    /// Starts a recursive watcher on the workspace root feeding this host.
    /// 於工作區根目錄啟動遞迴監視器，事件送入此主機。
    pub fn start_watching(&mut self) -> Result<(), FileMonitorError> {
        let events = self.events_tx.clone();
        let monitor = FileMonitor::with_sink(self.workspace.root(), move |event| {
            let _ = events.send(event);
        })?;
        self.monitor = Some(monitor);
        Ok(())
    }

    /// Runs until a shutdown intent arrives or every handle is dropped, then hands
    /// the workspace back.
    /// 執行直到收到關閉指令或所有 handle 都已釋放，最後交回工作區。
    pub async fn run(mut self) -> Workspace {
        tracing::debug!(root = %self.workspace.root().display(), "workspace host running");
        loop {
            let deadline = self.reconciler.next_deadline();
            tokio::select! {
                biased;
                intent = self.intents.recv() => match intent {
                    Some(Intent::Shutdown) | None => break,
                    Some(intent) => self.handle_intent(intent),
                },
                Some(done) = self.completions.recv() => self.handle_completion(done),
                Some(event) = self.events.recv() => self.reconciler.push(event),
                _ = sleep_until(deadline) => self.settle(),
            }
        }
        tracing::debug!("workspace host stopped");
        self.monitor = None;
        self.workspace
    }

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Open { path, reply } => match self.workspace.begin_open(&path) {
                OpenRequest::AlreadyOpen => self.respond(reply, Ok(())),
                OpenRequest::Pending(ticket) => {
                    self.publish();
                    let path = ticket.path.clone();
                    self.spawn_io(move || Completion::Opened {
                        result: DiskSnapshot::read(&path),
                        ticket,
                        reply,
                    });
                }
            },
            Intent::Edit { path, text, reply } => {
                let result = self.workspace.edit(&path, text).map(|_| ());
                self.respond(reply, result);
            }
            Intent::Save { ref path, .. } | Intent::SaveAs { ref path, .. } => {
                let source = self.workspace_path(path.clone());
                match self.saving.get_mut(&source) {
                    Some(waiting) => waiting.push_back(intent),
                    None => {
                        self.saving.insert(source.clone(), VecDeque::new());
                        self.start_save(source, intent);
                    }
                }
            }
            Intent::Close { path, reply } => {
                let result = self.workspace.close(&path);
                self.respond(reply, result);
            }
            Intent::Expand { path, reply } => match self.workspace.begin_expand(&path) {
                Ok(ticket) => {
                    self.publish();
                    let filter = self.workspace.filter().clone();
                    self.spawn_io(move || Completion::Listed {
                        result: list_directory(&ticket.path, &filter),
                        ticket,
                        reply,
                    });
                }
                Err(err) => self.respond(reply, Err(err)),
            },
            Intent::Collapse { path, reply } => {
                let result = self.workspace.collapse(&path);
                self.respond(reply, result);
            }
            Intent::SetActive { path, reply } => {
                let result = self.workspace.set_active(&path);
                self.respond(reply, result);
            }
            Intent::Resolve {
                path,
                resolution: Resolution::KeepLocal,
                reply,
            } => {
                let result = self.workspace.keep_local(&path);
                self.respond(reply, result);
            }
            Intent::Resolve {
                path,
                resolution: Resolution::Reload,
                reply,
            } => {
                let path = self.workspace_path(path);
                if !self.workspace.is_open(&path) {
                    self.respond(reply, Err(WorkspaceError::NotOpen(path)));
                    return;
                }
                self.spawn_io(move || Completion::Reloaded {
                    result: DiskSnapshot::read(&path),
                    path,
                    reply,
                });
            }
            Intent::Snapshot { reply } => self.respond(reply, Ok(())),
            Intent::Unsaved { reply } => {
                let _ = reply.send(self.workspace.unsaved_paths());
            }
            Intent::Shutdown => {}
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Opened {
                ticket,
                result,
                reply,
            } => {
                let applied = self.workspace.complete_open(ticket, result).map(|_| ());
                self.respond(reply, applied);
            }
            Completion::Listed {
                ticket,
                result,
                reply,
            } => {
                let applied = self.workspace.complete_expand(ticket, result).map(|_| ());
                self.respond(reply, applied);
            }
            Completion::Saved {
                source,
                ticket,
                result,
                reply,
            } => {
                let applied = self.workspace.finish_save(ticket, result);
                self.respond(reply, applied);
                self.next_save(source);
            }
            Completion::Reloaded {
                path,
                result,
                reply,
            } => {
                let applied = self.workspace.apply_reload(&path, result);
                self.respond(reply, applied);
            }
            Completion::DiskRead { reading } => {
                let path = reading.path().to_path_buf();
                let outcomes = self.reconciler.apply(&mut self.workspace, reading);
                self.reconciler.finish(&path);
                if !outcomes.is_empty() {
                    tracing::debug!(path = %path.display(), count = outcomes.len(), "change reconciled");
                }
                self.publish();
            }
        }
    }

    fn settle(&mut self) {
        for change in self.reconciler.take_due(Instant::now()) {
            let request = self.reconciler.plan(&self.workspace, change);
            self.spawn_io(move || Completion::DiskRead {
                reading: request.execute(),
            });
        }
    }

    /// Encodes the buffer now, so a save that waited behind another one writes
    /// the contents current when it starts.
    /// 在開始時才編碼，排隊等候的儲存會寫出當下的內容。
    fn start_save(&mut self, source: PathBuf, intent: Intent) {
        let (prepared, reply) = match intent {
            Intent::Save { path, reply } => (self.workspace.prepare_save(&path), reply),
            Intent::SaveAs { path, target, reply } => {
                (self.workspace.prepare_save_as(&path, &target), reply)
            }
            other => {
                tracing::error!(intent = ?other, "not a save intent");
                return self.next_save(source);
            }
        };
        match prepared {
            Ok(ticket) => self.spawn_io(move || Completion::Saved {
                result: ticket.job.write(),
                source,
                ticket,
                reply,
            }),
            Err(err) => {
                self.respond(reply, Err(err));
                self.next_save(source);
            }
        }
    }

    fn next_save(&mut self, source: PathBuf) {
        let next = self
            .saving
            .get_mut(&source)
            .and_then(VecDeque::pop_front);
        match next {
            Some(intent) => self.start_save(source, intent),
            None => {
                self.saving.remove(&source);
            }
        }
    }

    fn spawn_io<F>(&self, job: F)
    where
        F: FnOnce() -> Completion + Send + 'static,
    {
        let completions = self.completions_tx.clone();
        task::spawn_blocking(move || {
            let _ = completions.send(job());
        });
    }

    fn workspace_path(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.workspace.root().join(path)
        }
    }

    fn respond(&mut self, reply: Reply, result: Result<(), WorkspaceError>) {
        let snapshot = self.publish();
        let _ = reply.send(result.map(|_| snapshot));
    }

    fn publish(&mut self) -> Arc<WorkspaceSnapshot> {
        if self.workspace.revision() == self.published {
            return self.snapshots.borrow().clone();
        }
        let snapshot = Arc::new(self.workspace.snapshot());
        self.published = snapshot.revision;
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => future::pending().await,
    }
}

/// Cloneable front door to a running [`WorkspaceHost`].
/// 操作執行中 [`WorkspaceHost`] 的可複製入口。
#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    intents: mpsc::Sender<Intent>,
    events: mpsc::UnboundedSender<FileChangeEvent>,
    snapshots: watch::Receiver<Arc<WorkspaceSnapshot>>,
}

impl WorkspaceHandle {
    async fn request(
        &self,
        build: impl FnOnce(Reply) -> Intent,
    ) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        let (reply, response) = oneshot::channel();
        self.intents
            .send(build(reply))
            .await
            .map_err(|_| WorkspaceError::HostClosed)?;
        response.await.map_err(|_| WorkspaceError::HostClosed)?
    }

    pub async fn open(&self, path: impl Into<PathBuf>) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        let path = path.into();
        self.request(|reply| Intent::Open { path, reply }).await
    }

    pub async fn edit(
        &self,
        path: impl Into<PathBuf>,
        text: impl Into<String>,
    ) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        let path = path.into();
        let text = text.into();
        self.request(|reply| Intent::Edit { path, text, reply }).await
    }

    pub async fn save(&self, path: impl Into<PathBuf>) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        let path = path.into();
        self.request(|reply| Intent::Save { path, reply }).await
    }

    pub async fn save_as(
        &self,
        path: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
    ) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        let path = path.into();
        let target = target.into();
        self.request(|reply| Intent::SaveAs { path, target, reply }).await
    }

    pub async fn close(&self, path: impl Into<PathBuf>) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        let path = path.into();
        self.request(|reply| Intent::Close { path, reply }).await
    }

    pub async fn expand(&self, path: impl Into<PathBuf>) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        let path = path.into();
        self.request(|reply| Intent::Expand { path, reply }).await
    }

    pub async fn collapse(&self, path: impl Into<PathBuf>) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        let path = path.into();
        self.request(|reply| Intent::Collapse { path, reply }).await
    }

    pub async fn set_active(&self, path: impl Into<PathBuf>) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        let path = path.into();
        self.request(|reply| Intent::SetActive { path, reply }).await
    }

    pub async fn resolve_conflict(
        &self,
        path: impl Into<PathBuf>,
        resolution: Resolution,
    ) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        let path = path.into();
        self.request(|reply| Intent::Resolve {
            path,
            resolution,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<Arc<WorkspaceSnapshot>, WorkspaceError> {
        self.request(|reply| Intent::Snapshot { reply }).await
    }

    /// Paths with unsaved work; the shell asks before quitting.
    /// 含未儲存內容的路徑；外殼在結束前查詢。
    pub async fn unsaved_paths(&self) -> Result<Vec<PathBuf>, WorkspaceError> {
        let (reply, response) = oneshot::channel();
        self.intents
            .send(Intent::Unsaved { reply })
            .await
            .map_err(|_| WorkspaceError::HostClosed)?;
        response.await.map_err(|_| WorkspaceError::HostClosed)
    }

    /// Feeds a raw file-system event into the debounce queue.
    /// 將原始檔案系統事件送入去抖動佇列。
    pub fn forward_event(&self, event: FileChangeEvent) -> Result<(), WorkspaceError> {
        self.events.send(event).map_err(|_| WorkspaceError::HostClosed)
    }

    /// Latest published snapshot, updated on every change.
    /// 最新發佈的快照，每次變更都會更新。
    pub fn subscribe(&self) -> watch::Receiver<Arc<WorkspaceSnapshot>> {
        self.snapshots.clone()
    }

    pub async fn shutdown(&self) -> Result<(), WorkspaceError> {
        self.intents
            .send(Intent::Shutdown)
            .await
            .map_err(|_| WorkspaceError::HostClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeFilter;
    use rustcodium_core::document::SyncState;
    use rustcodium_core::file_monitor::ChangeKind;
    use std::fs;
    use tempfile::tempdir;

    fn start(root: &std::path::Path) -> (tokio::task::JoinHandle<Workspace>, WorkspaceHandle) {
        let workspace = Workspace::open_root(root, TreeFilter::default()).unwrap();
        let options = HostOptions {
            debounce: Duration::from_millis(30),
            ..HostOptions::default()
        };
        let (host, handle) = WorkspaceHost::new(workspace, options);
        (tokio::spawn(host.run()), handle)
    }

    async fn wait_for<F>(handle: &WorkspaceHandle, mut predicate: F) -> Arc<WorkspaceSnapshot>
    where
        F: FnMut(&WorkspaceSnapshot) -> bool,
    {
        let mut updates = handle.subscribe();
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let current = updates.borrow_and_update().clone();
                if predicate(&current) {
                    return current;
                }
                if updates.changed().await.is_err() {
                    panic!("host stopped while waiting");
                }
            }
        })
        .await;
        waited.expect("timed out waiting for snapshot")
    }

    #[tokio::test]
    async fn open_edit_save_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.py");
        fs::write(&path, "a=1").unwrap();
        let (task, handle) = start(dir.path());

        let opened = handle.open(&path).await.unwrap();
        assert_eq!(opened.active.as_deref(), Some(path.as_path()));
        assert_eq!(opened.active_content.as_deref(), Some("a=1"));

        let edited = handle.edit(&path, "a=2").await.unwrap();
        assert!(edited.buffers[0].dirty);

        let saved = handle.save(&path).await.unwrap();
        assert!(!saved.buffers[0].dirty);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a=2");

        handle.shutdown().await.unwrap();
        let workspace = task.await.unwrap();
        assert!(workspace.unsaved_paths().is_empty());
    }

    #[tokio::test]
    async fn errors_reach_the_caller() {
        let dir = tempdir().unwrap();
        let (_task, handle) = start(dir.path());

        let err = handle.open(dir.path().join("missing.txt")).await.unwrap_err();
        assert_eq!(err.kind(), crate::workspace::ErrorKind::NotFound);

        let err = handle.save(dir.path().join("missing.txt")).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::NotOpen(_)));
    }

    #[tokio::test]
    async fn close_before_open_completes_discards_result() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.txt");
        fs::write(&path, "content").unwrap();
        let (_task, handle) = start(dir.path());

        let (opened, closed) = tokio::join!(handle.open(&path), handle.close(&path));
        closed.unwrap();
        let snapshot = opened.unwrap();
        assert!(snapshot.buffers.is_empty());
        assert!(snapshot.active.is_none());
    }

    #[tokio::test]
    async fn expand_collapse_expand_through_host() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/b.rs"), "").unwrap();
        fs::write(dir.path().join("src/a.rs"), "").unwrap();
        let (_task, handle) = start(dir.path());
        let src = dir.path().join("src");

        let first = handle.expand(&src).await.unwrap();
        handle.collapse(&src).await.unwrap();
        let second = handle.expand(&src).await.unwrap();

        let names = |snapshot: &WorkspaceSnapshot| -> Vec<String> {
            snapshot.tree.children[0]
                .children
                .iter()
                .map(|node| node.name.clone())
                .collect()
        };
        assert_eq!(names(&first), vec!["a.rs", "b.rs"]);
        assert_eq!(names(&first), names(&second));
    }

    #[tokio::test]
    async fn forwarded_events_reconcile_after_quiet_period() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.py");
        fs::write(&path, "a=1").unwrap();
        let (_task, handle) = start(dir.path());
        handle.open(&path).await.unwrap();
        handle.edit(&path, "a=2").await.unwrap();

        fs::write(&path, "a=1\n# changed").unwrap();
        for _ in 0..5 {
            handle
                .forward_event(FileChangeEvent::new(&path, ChangeKind::Modified))
                .unwrap();
        }

        let conflicted = wait_for(&handle, |snapshot| {
            snapshot
                .buffers
                .first()
                .map_or(false, |buffer| buffer.state == SyncState::Conflicted)
        })
        .await;
        assert_eq!(conflicted.active_content.as_deref(), Some("a=2"));

        let saved = handle.save(&path).await.unwrap();
        assert_eq!(saved.buffers[0].state, SyncState::Clean);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a=2");
    }

    #[tokio::test]
    async fn overlapping_saves_of_one_buffer_run_one_at_a_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.py");
        fs::write(&path, "a=0").unwrap();
        let (task, handle) = start(dir.path());
        handle.open(&path).await.unwrap();

        let mut expected = String::new();
        for round in 1..=5 {
            expected = format!("a={round}\n").repeat(2048);
            handle.edit(&path, expected.clone()).await.unwrap();
            let (first, second, third) = tokio::join!(
                handle.save(&path),
                handle.save(&path),
                handle.save("main.py")
            );
            for saved in [first, second, third] {
                assert!(!saved.unwrap().buffers[0].dirty);
            }
            assert_eq!(fs::read_to_string(&path).unwrap(), expected);
        }

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name != "main.py")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");

        handle.shutdown().await.unwrap();
        let workspace = task.await.unwrap();
        assert_eq!(workspace.buffer(&path).unwrap().contents(), expected);
        assert!(workspace.unsaved_paths().is_empty());
    }

    #[tokio::test]
    async fn queued_save_follows_a_save_as_that_moved_the_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("draft.txt");
        let target = dir.path().join("final.txt");
        fs::write(&path, "draft").unwrap();
        let (_task, handle) = start(dir.path());
        handle.open(&path).await.unwrap();

        let (moved, stale) = tokio::join!(handle.save_as(&path, &target), handle.save(&path));
        let moved = moved.unwrap();
        assert_eq!(moved.buffers[0].path, target);
        assert!(matches!(stale, Err(WorkspaceError::NotOpen(_))));
        assert_eq!(fs::read_to_string(&target).unwrap(), "draft");
    }

    #[tokio::test]
    async fn reload_resolution_takes_disk_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "disk").unwrap();
        let (_task, handle) = start(dir.path());
        handle.open(&path).await.unwrap();
        handle.edit(&path, "local").await.unwrap();
        fs::write(&path, "disk v2").unwrap();

        let resolved = handle
            .resolve_conflict(&path, Resolution::Reload)
            .await
            .unwrap();
        assert_eq!(resolved.active_content.as_deref(), Some("disk v2"));
        assert_eq!(resolved.buffers[0].state, SyncState::Clean);
        assert!(handle.unsaved_paths().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn handle_reports_host_closed_after_shutdown() {
        let dir = tempdir().unwrap();
        let (task, handle) = start(dir.path());
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(
            handle.snapshot().await,
            Err(WorkspaceError::HostClosed)
        ));
    }
}
