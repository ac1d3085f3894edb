use std::collections::HashMap;
use std::env;
use std::io;
use std::path::{Path, PathBuf};

use rustcodium_core::document::{
    DiskSnapshot, DocumentBuffer, DocumentError, Fingerprint, SaveJob, SyncState,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::{list_directory, DirEntry, ExpandTicket, FileTree, FileTreeNode, TreeError, TreeFilter};
use crate::wire_path;

/// Errors surfaced by workspace intents.
/// 工作區操作回傳的錯誤。
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("{} is not open", .0.display())]
    NotOpen(PathBuf),
    #[error("{} is already open in another tab", .0.display())]
    AlreadyOpen(PathBuf),
    #[error("workspace root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("failed to resolve {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("workspace host has shut down")]
    HostClosed,
}

/// Error categories the UI renders.
/// UI 呈現用的錯誤分類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    UndecodableContent,
    WriteError,
    Other,
}

impl WorkspaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkspaceError::Document(err) => match err {
                DocumentError::NotFound(_) => ErrorKind::NotFound,
                DocumentError::AccessDenied(_) => ErrorKind::AccessDenied,
                DocumentError::Undecodable(_) => ErrorKind::UndecodableContent,
                DocumentError::Write { .. } | DocumentError::Unrepresentable { .. } => {
                    ErrorKind::WriteError
                }
                DocumentError::NotAFile(_) | DocumentError::Io { .. } => ErrorKind::Other,
            },
            WorkspaceError::Tree(TreeError::NotFound(_)) => ErrorKind::NotFound,
            WorkspaceError::Tree(TreeError::AccessDenied(_)) => ErrorKind::AccessDenied,
            _ => ErrorKind::Other,
        }
    }
}

/// How the user settles a conflicted buffer.
/// 使用者解決衝突的方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the in-memory contents; the next save overwrites the disk.
    KeepLocal,
    /// Drop local edits and load the disk contents.
    Reload,
}

/// Result of asking to open a path.
/// 開啟請求的結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenRequest {
    /// Already open; it has been focused.
    AlreadyOpen,
    /// The file must be read; hand the result to [`Workspace::complete_open`].
    Pending(OpenTicket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTicket {
    pub path: PathBuf,
    id: u64,
}

/// A save in flight: the buffer it came from plus the encoded job.
/// 進行中的儲存：來源緩衝區與已編碼的工作。
#[derive(Debug, Clone)]
pub struct SaveTicket {
    pub source: PathBuf,
    pub job: SaveJob,
}

/// Per-buffer view exposed to the UI.
/// 提供 UI 的單一緩衝區摘要。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferSummary {
    #[serde(with = "wire_path")]
    pub path: PathBuf,
    pub name: String,
    pub language: &'static str,
    pub encoding: &'static str,
    pub dirty: bool,
    pub orphaned: bool,
    pub state: SyncState,
    pub active: bool,
}

/// Read-only snapshot the UI re-renders from.
/// UI 重新繪製所依據的唯讀快照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceSnapshot {
    #[serde(with = "wire_path")]
    pub root: PathBuf,
    pub revision: u64,
    pub tree: FileTreeNode,
    pub buffers: Vec<BufferSummary>,
    #[serde(with = "wire_path::option")]
    pub active: Option<PathBuf>,
    pub active_content: Option<String>,
}

/// The aggregate owning every open buffer and the visible tree for one root.
/// 單一根目錄的工作區：持有所有開啟的緩衝區與可見的檔案樹。
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    tree: FileTree,
    filter: TreeFilter,
    buffers: Vec<DocumentBuffer>,
    active: Option<PathBuf>,
    focus_history: Vec<PathBuf>,
    pending_opens: HashMap<PathBuf, u64>,
    next_ticket: u64,
    next_open_seq: u64,
    revision: u64,
}

impl Workspace {
    /// Opens a workspace. A file path roots the workspace at its parent and opens the
    /// file; the root is expanded one level.
    /// 開啟工作區；若傳入檔案則以其上層目錄為根並開啟該檔案。根目錄會展開一層。
    pub fn open_root(path: impl AsRef<Path>, filter: TreeFilter) -> Result<Self, WorkspaceError> {
        let path = absolutize(path.as_ref())?;
        let metadata = std::fs::metadata(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => WorkspaceError::Tree(TreeError::NotFound(path.clone())),
            io::ErrorKind::PermissionDenied => {
                WorkspaceError::Tree(TreeError::AccessDenied(path.clone()))
            }
            _ => WorkspaceError::Io {
                path: path.clone(),
                source: err,
            },
        })?;

        let (root, initial_file) = if metadata.is_file() {
            match path.parent() {
                Some(parent) => (parent.to_path_buf(), Some(path.clone())),
                None => return Err(WorkspaceError::NotADirectory(path)),
            }
        } else if metadata.is_dir() {
            (path, None)
        } else {
            return Err(WorkspaceError::NotADirectory(path));
        };

        let mut workspace = Self::new(root, filter);
        workspace.expand(workspace.root.clone())?;
        if let Some(file) = initial_file {
            workspace.open(file)?;
        }
        tracing::debug!(root = %workspace.root.display(), "workspace opened");
        Ok(workspace)
    }

    /// Creates an empty workspace without touching the disk.
    /// 建立空的工作區，不存取磁碟。
    pub fn new(root: impl Into<PathBuf>, filter: TreeFilter) -> Self {
        let root = root.into();
        Self {
            tree: FileTree::new(root.clone()),
            root,
            filter,
            buffers: Vec::new(),
            active: None,
            focus_history: Vec::new(),
            pending_opens: HashMap::new(),
            next_ticket: 1,
            next_open_seq: 1,
            revision: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    pub fn filter(&self) -> &TreeFilter {
        &self.filter
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Open buffers in tab order.
    /// 依分頁順序排列的已開啟緩衝區。
    pub fn buffers(&self) -> &[DocumentBuffer] {
        &self.buffers
    }

    pub fn buffer(&self, path: impl AsRef<Path>) -> Option<&DocumentBuffer> {
        let path = path.as_ref();
        self.buffers.iter().find(|buffer| buffer.path() == path)
    }

    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        self.buffer(path).is_some()
    }

    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_deref()
    }

    pub fn active_buffer(&self) -> Option<&DocumentBuffer> {
        self.active.as_ref().and_then(|path| self.buffer(path))
    }

    pub(crate) fn buffer_mut(&mut self, path: &Path) -> Option<&mut DocumentBuffer> {
        self.buffers.iter_mut().find(|buffer| buffer.path() == path)
    }

    pub(crate) fn tree_mut(&mut self) -> &mut FileTree {
        &mut self.tree
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
    }

    /// Opens a file synchronously, or focuses it when it is already open.
    /// 同步開啟檔案；已開啟時僅切換焦點。
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<(), WorkspaceError> {
        match self.begin_open(path) {
            OpenRequest::AlreadyOpen => Ok(()),
            OpenRequest::Pending(ticket) => {
                let snapshot = DiskSnapshot::read(&ticket.path);
                self.complete_open(ticket, snapshot).map(|_| ())
            }
        }
    }

    /// First half of an asynchronous open.
    /// 非同步開啟的前半段。
    pub fn begin_open(&mut self, path: impl AsRef<Path>) -> OpenRequest {
        let path = self.resolve(path.as_ref());
        if self.is_open(&path) {
            self.focus(&path);
            return OpenRequest::AlreadyOpen;
        }
        let id = self.next_ticket;
        self.next_ticket += 1;
        self.pending_opens.insert(path.clone(), id);
        OpenRequest::Pending(OpenTicket { path, id })
    }

    /// Second half of an asynchronous open. Returns `Ok(false)` when the request was
    /// cancelled by `close` (or superseded) and the read result was discarded.
    /// 非同步開啟的後半段；若請求已被 `close` 取消則丟棄結果並回傳 `Ok(false)`。
    pub fn complete_open(
        &mut self,
        ticket: OpenTicket,
        snapshot: Result<DiskSnapshot, DocumentError>,
    ) -> Result<bool, WorkspaceError> {
        if self.pending_opens.get(&ticket.path) != Some(&ticket.id) {
            tracing::debug!(path = %ticket.path.display(), "discarding cancelled open");
            return Ok(false);
        }
        self.pending_opens.remove(&ticket.path);
        if self.is_open(&ticket.path) {
            self.focus(&ticket.path);
            return Ok(true);
        }

        let mut buffer = DocumentBuffer::from_snapshot(snapshot?);
        buffer.set_open_seq(self.next_open_seq);
        self.next_open_seq += 1;
        tracing::debug!(
            path = %ticket.path.display(),
            encoding = buffer.encoding().name(),
            language = buffer.language(),
            "buffer opened"
        );
        self.buffers.push(buffer);
        self.focus(&ticket.path);
        Ok(true)
    }

    /// Replaces the contents of an open buffer. Returns the resulting dirty flag.
    /// 取代已開啟緩衝區的內容，回傳 dirty 狀態。
    pub fn edit(&mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Result<bool, WorkspaceError> {
        let path = self.resolve(path.as_ref());
        let buffer = self
            .buffer_mut(&path)
            .ok_or_else(|| WorkspaceError::NotOpen(path.clone()))?;
        let dirty = buffer.edit(text);
        self.touch();
        Ok(dirty)
    }

    /// Saves synchronously.
    /// 同步儲存。
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), WorkspaceError> {
        let ticket = self.prepare_save(path)?;
        let written = ticket.job.write();
        self.finish_save(ticket, written)
    }

    /// Saves under a new path; the buffer moves to it.
    /// 另存新檔，緩衝區改用新路徑。
    pub fn save_as(&mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<(), WorkspaceError> {
        let ticket = self.prepare_save_as(path, target)?;
        let written = ticket.job.write();
        self.finish_save(ticket, written)
    }

    pub fn prepare_save(&self, path: impl AsRef<Path>) -> Result<SaveTicket, WorkspaceError> {
        let source = self.resolve(path.as_ref());
        let buffer = self
            .buffer(&source)
            .ok_or_else(|| WorkspaceError::NotOpen(source.clone()))?;
        let job = buffer.prepare_save()?;
        Ok(SaveTicket { source, job })
    }

    pub fn prepare_save_as(
        &self,
        path: impl AsRef<Path>,
        target: impl AsRef<Path>,
    ) -> Result<SaveTicket, WorkspaceError> {
        let source = self.resolve(path.as_ref());
        let target = self.resolve(target.as_ref());
        let buffer = self
            .buffer(&source)
            .ok_or_else(|| WorkspaceError::NotOpen(source.clone()))?;
        if target != source && self.is_open(&target) {
            return Err(WorkspaceError::AlreadyOpen(target));
        }
        let job = buffer.prepare_save_as(&target)?;
        Ok(SaveTicket { source, job })
    }

    /// Records the outcome of a write. A failed write leaves the buffer untouched.
    /// 記錄寫入結果；寫入失敗時緩衝區保持不變。
    pub fn finish_save(
        &mut self,
        ticket: SaveTicket,
        written: Result<Fingerprint, DocumentError>,
    ) -> Result<(), WorkspaceError> {
        let fingerprint = written.map_err(|err| {
            tracing::warn!(path = %ticket.job.path().display(), error = %err, "save failed");
            WorkspaceError::from(err)
        })?;
        let target = ticket.job.path().to_path_buf();
        let Some(buffer) = self.buffer_mut(&ticket.source) else {
            // 寫入期間分頁已關閉；檔案仍已寫入。 / The tab closed while writing; the file is still on disk.
            return Ok(());
        };
        buffer.finish_save(ticket.job, fingerprint);
        if target != ticket.source {
            self.rename_focus(&ticket.source, &target);
        }
        tracing::debug!(path = %target.display(), "buffer saved");
        self.touch();
        Ok(())
    }

    /// Closes a buffer, or cancels an open still in flight. Focus returns to the most
    /// recently active remaining buffer.
    /// 關閉緩衝區或取消進行中的開啟；焦點回到最近使用的其餘緩衝區。
    pub fn close(&mut self, path: impl AsRef<Path>) -> Result<(), WorkspaceError> {
        let path = self.resolve(path.as_ref());
        if self.pending_opens.remove(&path).is_some() {
            tracing::debug!(path = %path.display(), "open cancelled");
            self.touch();
            return Ok(());
        }
        let index = self
            .buffers
            .iter()
            .position(|buffer| buffer.path() == path)
            .ok_or_else(|| WorkspaceError::NotOpen(path.clone()))?;
        self.buffers.remove(index);
        self.focus_history.retain(|entry| entry != &path);
        if self.active.as_deref() == Some(path.as_path()) {
            self.active = self
                .focus_history
                .pop()
                .or_else(|| self.buffers.last().map(|buffer| buffer.path().to_path_buf()));
        }
        tracing::debug!(path = %path.display(), "buffer closed");
        self.touch();
        Ok(())
    }

    /// Focuses an open buffer.
    /// 切換焦點到已開啟的緩衝區。
    pub fn set_active(&mut self, path: impl AsRef<Path>) -> Result<(), WorkspaceError> {
        let path = self.resolve(path.as_ref());
        if !self.is_open(&path) {
            return Err(WorkspaceError::NotOpen(path));
        }
        self.focus(&path);
        Ok(())
    }

    fn focus(&mut self, path: &Path) {
        if self.active.as_deref() == Some(path) {
            return;
        }
        self.focus_history.retain(|entry| entry != path);
        if let Some(previous) = self.active.take() {
            self.focus_history.push(previous);
        }
        self.active = Some(path.to_path_buf());
        self.touch();
    }

    /// Keeps focus pointing at a buffer that moved to a new path.
    pub(crate) fn rename_focus(&mut self, from: &Path, to: &Path) {
        if self.active.as_deref() == Some(from) {
            self.active = Some(to.to_path_buf());
        }
        for entry in &mut self.focus_history {
            if entry == from {
                *entry = to.to_path_buf();
            }
        }
    }

    /// Expands a directory synchronously.
    /// 同步展開目錄。
    pub fn expand(&mut self, path: impl AsRef<Path>) -> Result<(), WorkspaceError> {
        let ticket = self.begin_expand(path)?;
        let listing = list_directory(&ticket.path, &self.filter);
        self.complete_expand(ticket, listing).map(|_| ())
    }

    pub fn begin_expand(&mut self, path: impl AsRef<Path>) -> Result<ExpandTicket, WorkspaceError> {
        let path = self.resolve(path.as_ref());
        let ticket = self.tree.begin_expand(&path)?;
        self.touch();
        Ok(ticket)
    }

    /// Applies a directory listing; `Ok(false)` means it was stale and discarded.
    /// 套用目錄列表；`Ok(false)` 表示結果已過期而被丟棄。
    pub fn complete_expand(
        &mut self,
        ticket: ExpandTicket,
        listing: Result<Vec<DirEntry>, TreeError>,
    ) -> Result<bool, WorkspaceError> {
        let result = self.tree.complete_expand(ticket, listing);
        self.touch();
        Ok(result?)
    }

    pub fn collapse(&mut self, path: impl AsRef<Path>) -> Result<(), WorkspaceError> {
        let path = self.resolve(path.as_ref());
        self.tree.collapse(&path)?;
        self.touch();
        Ok(())
    }

    /// Settles a conflict synchronously.
    /// 同步解決衝突。
    pub fn resolve_conflict(&mut self, path: impl AsRef<Path>, resolution: Resolution) -> Result<(), WorkspaceError> {
        let path = self.resolve(path.as_ref());
        match resolution {
            Resolution::KeepLocal => self.keep_local(&path),
            Resolution::Reload => {
                let snapshot = DiskSnapshot::read(&path);
                self.apply_reload(&path, snapshot)
            }
        }
    }

    pub fn keep_local(&mut self, path: impl AsRef<Path>) -> Result<(), WorkspaceError> {
        let path = self.resolve(path.as_ref());
        let buffer = self
            .buffer_mut(&path)
            .ok_or_else(|| WorkspaceError::NotOpen(path.clone()))?;
        buffer.keep_local();
        self.touch();
        Ok(())
    }

    /// Replaces a buffer with a fresh disk read, discarding local edits.
    /// 以磁碟內容取代緩衝區，捨棄本地修改。
    pub fn apply_reload(
        &mut self,
        path: impl AsRef<Path>,
        snapshot: Result<DiskSnapshot, DocumentError>,
    ) -> Result<(), WorkspaceError> {
        let path = self.resolve(path.as_ref());
        let buffer = self
            .buffer_mut(&path)
            .ok_or_else(|| WorkspaceError::NotOpen(path.clone()))?;
        buffer.apply_snapshot(snapshot?);
        self.touch();
        Ok(())
    }

    /// Whether closing `path` would lose work.
    /// 關閉 `path` 是否會遺失尚未儲存的內容。
    pub fn has_unsaved_changes(&self, path: impl AsRef<Path>) -> Result<bool, WorkspaceError> {
        let path = self.resolve(path.as_ref());
        self.buffer(&path)
            .map(DocumentBuffer::has_unsaved_changes)
            .ok_or(WorkspaceError::NotOpen(path))
    }

    /// Paths of every buffer with unsaved work, in tab order.
    /// 所有含未儲存內容的緩衝區路徑（依分頁順序）。
    pub fn unsaved_paths(&self) -> Vec<PathBuf> {
        self.buffers
            .iter()
            .filter(|buffer| buffer.has_unsaved_changes())
            .map(|buffer| buffer.path().to_path_buf())
            .collect()
    }

    pub fn snapshot(&self) -> WorkspaceSnapshot {
        let buffers = self
            .buffers
            .iter()
            .map(|buffer| BufferSummary {
                path: buffer.path().to_path_buf(),
                name: buffer
                    .path()
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                language: buffer.language(),
                encoding: buffer.encoding().name(),
                dirty: buffer.is_dirty(),
                orphaned: buffer.is_orphaned(),
                state: buffer.sync_state(),
                active: self.active.as_deref() == Some(buffer.path()),
            })
            .collect();
        WorkspaceSnapshot {
            root: self.root.clone(),
            revision: self.revision,
            tree: self.tree.root().clone(),
            buffers,
            active: self.active.clone(),
            active_content: self.active_buffer().map(|buffer| buffer.contents().to_string()),
        }
    }

    /// Relative intent paths are taken relative to the root.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, WorkspaceError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().map_err(|source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cwd.join(path))
}
