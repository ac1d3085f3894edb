use std::path::{Path, PathBuf};
use std::time::Instant;

use notify::event::{EventKind, MetadataKind, ModifyKind, RenameMode};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

use crate::document::TEMP_SUFFIX;

/// 監控檔案變更時可能回傳的錯誤。 / Error type for file monitoring operations.
#[derive(Debug, Error)]
pub enum FileMonitorError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// 監控到的事件種類。 / Classifies observed file system changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    /// 改名的來源端；是否有對應的目的端由 tracker 決定。 / Source half of a rename; pairing relies on the tracker.
    RenamedFrom,
    /// 改名的目的端；`from` 僅在監視器明確配對時存在。 / Destination half; `from` is set only when the watcher paired both halves.
    RenamedTo { from: Option<PathBuf> },
    /// 事件遺失或監視器出錯，需重新掃描該目錄。 / Events were dropped or the watcher failed; re-scan the path.
    Rescan,
}

/// 檔案事件的詳細資料。 / File event payload with resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub tracker: Option<usize>,
    pub observed_at: Instant,
}

impl FileChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            tracker: None,
            observed_at: Instant::now(),
        }
    }

    pub fn with_tracker(mut self, tracker: usize) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn observed_at(mut self, instant: Instant) -> Self {
        self.observed_at = instant;
        self
    }
}

/// 封裝 `notify` 監視器，遞迴監看工作區根目錄；釋放時停止監看。 /
/// Thin wrapper around `notify` watching a workspace root recursively until dropped.
pub struct FileMonitor {
    _watcher: RecommendedWatcher,
}

impl FileMonitor {
    /// 建立監視器，每個事件交給 `sink`（在 notify 的執行緒上呼叫）。 /
    /// Creates a monitor that hands every event to `sink`, called on notify's thread.
    pub fn with_sink<F>(root: impl AsRef<Path>, sink: F) -> Result<Self, FileMonitorError>
    where
        F: Fn(FileChangeEvent) + Send + 'static,
    {
        let root = root.as_ref().to_path_buf();
        let rescan_root = root.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                for event in map_event(res, &rescan_root) {
                    sink(event);
                }
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        tracing::debug!(root = %root.display(), "file monitor started");

        Ok(Self { _watcher: watcher })
    }
}

fn is_save_temp(path: &Path) -> bool {
    path.file_name()
        .map_or(false, |name| name.to_string_lossy().ends_with(TEMP_SUFFIX))
}

/// 儲存用的暫存檔不對外回報；由暫存檔改名而來的目的端視為未配對。 /
/// Save temporaries are never reported; a rename out of one is an unpaired arrival.
fn drop_save_temps(events: Vec<FileChangeEvent>) -> Vec<FileChangeEvent> {
    events
        .into_iter()
        .filter(|event| !is_save_temp(&event.path))
        .map(|mut event| {
            if let ChangeKind::RenamedTo { from: Some(from) } = &event.kind {
                if is_save_temp(from) {
                    event.kind = ChangeKind::RenamedTo { from: None };
                }
            }
            event
        })
        .collect()
}

fn map_event(res: notify::Result<notify::Event>, root: &Path) -> Vec<FileChangeEvent> {
    drop_save_temps(classify(res, root))
}

fn classify(res: notify::Result<notify::Event>, root: &Path) -> Vec<FileChangeEvent> {
    let event = match res {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(root = %root.display(), error = %err, "watcher error, scheduling rescan");
            let path = err.paths.first().cloned().unwrap_or_else(|| root.to_path_buf());
            return vec![FileChangeEvent::new(path, ChangeKind::Rescan)];
        }
    };

    if event.need_rescan() {
        let path = event.paths.first().cloned().unwrap_or_else(|| root.to_path_buf());
        return vec![FileChangeEvent::new(path, ChangeKind::Rescan)];
    }

    let tracker = event.tracker();
    let tagged = |path: &PathBuf, kind: ChangeKind| {
        let mapped = FileChangeEvent::new(path.clone(), kind);
        match tracker {
            Some(tracker) => mapped.with_tracker(tracker),
            None => mapped,
        }
    };

    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            vec![tagged(
                &event.paths[1],
                ChangeKind::RenamedTo {
                    from: Some(event.paths[0].clone()),
                },
            )]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|path| tagged(path, ChangeKind::RenamedFrom))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|path| tagged(path, ChangeKind::RenamedTo { from: None }))
            .collect(),
        // 無法判定方向時依檔案是否存在決定。 / Direction unknown: decide by whether the path still exists.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                let kind = if path.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                };
                tagged(path, kind)
            })
            .collect(),
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime))
        | EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)) => event
            .paths
            .iter()
            .map(|path| tagged(path, ChangeKind::Modified))
            .collect(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|path| tagged(path, ChangeKind::Created))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|path| tagged(path, ChangeKind::Deleted))
            .collect(),
        _ => Vec::new(),
    }
}
