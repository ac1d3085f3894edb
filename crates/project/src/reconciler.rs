//! Merges external file-system changes into the workspace.
//! 將外部檔案系統變更併入工作區。
//!
//! Events are debounced per path. Once a path settles, reconciliation runs in three
//! steps so the I/O can happen away from the state-update loop:
//! [`ChangeReconciler::plan`] (pure), [`ReadPlan::execute`] (disk reads only) and
//! [`ChangeReconciler::apply`] (state mutation only).
//! 事件依路徑去抖動；路徑穩定後分三步驟處理，使 I/O 可在狀態更新迴圈之外進行。

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rustcodium_core::document::{DiskSnapshot, DocumentError, ExternalChange, Fingerprint};
use rustcodium_core::file_monitor::{ChangeKind, FileChangeEvent};

use crate::tree::{list_directory, DirEntry, TreeError, TreeFilter};
use crate::workspace::Workspace;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// A path whose burst of events has gone quiet.
/// 事件已平息的路徑。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// Observed time of the last event in the burst.
    pub observed_at: Instant,
    /// Number of raw events folded into this change.
    pub coalesced: usize,
}

/// What reconciling a change did to one path.
/// 對單一路徑的處理結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Disk matches the buffer (e.g. the echo of our own save).
    Unchanged,
    /// Clean buffer reloaded from disk.
    Reloaded,
    /// Orphaned buffer found its file again with identical contents.
    Restored,
    /// Disk changed but the new contents could not be loaded.
    ReloadFailed,
    /// Disk changed under unsaved edits.
    Conflicted,
    /// The file vanished; the buffer keeps its contents.
    Orphaned,
    /// A correlated rename moved the buffer.
    Repathed { from: PathBuf },
    /// A visible directory was re-listed and changed.
    TreeRefreshed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub path: PathBuf,
    pub observed_at: Instant,
    pub coalesced: usize,
    pub outcome: Outcome,
}

#[derive(Debug)]
struct Pending {
    kind: ChangeKind,
    tracker: Option<usize>,
    observed_at: Instant,
    coalesced: usize,
}

/// Per-path debounce queue plus the reconciliation rules.
/// 依路徑去抖動的佇列與協調規則。
#[derive(Debug)]
pub struct ChangeReconciler {
    debounce: Duration,
    pending: HashMap<PathBuf, Pending>,
    rename_sources: HashMap<usize, PathBuf>,
    in_flight: HashSet<PathBuf>,
}

impl Default for ChangeReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl ChangeReconciler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: HashMap::new(),
            rename_sources: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Queues a raw event. Rename halves sharing a tracker are paired here.
    /// 將事件排入佇列；共用 tracker 的改名事件在此配對。
    pub fn push(&mut self, event: FileChangeEvent) {
        let FileChangeEvent {
            path,
            mut kind,
            tracker,
            observed_at,
        } = event;

        if let Some(tracker) = tracker {
            match kind {
                ChangeKind::RenamedFrom => {
                    self.rename_sources.insert(tracker, path.clone());
                }
                ChangeKind::RenamedTo { from: None } => {
                    if let Some(source) = self.rename_sources.remove(&tracker) {
                        if matches!(
                            self.pending.get(&source).map(|pending| &pending.kind),
                            Some(ChangeKind::RenamedFrom)
                        ) {
                            self.pending.remove(&source);
                        }
                        kind = ChangeKind::RenamedTo { from: Some(source) };
                    }
                }
                _ => {}
            }
        }

        let mut displaced = None;
        match self.pending.get_mut(&path) {
            Some(pending) => {
                let merged = merge_kind(&pending.kind, kind);
                if let ChangeKind::RenamedTo { from: Some(source) } = &pending.kind {
                    if !matches!(&merged, ChangeKind::RenamedTo { from: Some(kept) } if kept == source) {
                        displaced = Some(source.clone());
                    }
                }
                pending.kind = merged;
                pending.tracker = tracker.or(pending.tracker);
                pending.observed_at = pending.observed_at.max(observed_at);
                pending.coalesced += 1;
            }
            None => {
                self.pending.insert(
                    path,
                    Pending {
                        kind,
                        tracker,
                        observed_at,
                        coalesced: 1,
                    },
                );
            }
        }

        // 改名配對被後續事件覆蓋時，來源端仍需檢查，否則其緩衝區不會變成孤兒。 /
        // A paired rename overwritten by a later event still owes the source a
        // check, or buffers under it would never be orphaned.
        if let Some(source) = displaced {
            self.push(FileChangeEvent::new(source, ChangeKind::Deleted).observed_at(observed_at));
        }
    }

    /// Earliest moment a queued path settles, ignoring paths with work in flight.
    /// 佇列中最早穩定的時間點（略過處理中的路徑）。
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .iter()
            .filter(|(path, _)| !self.in_flight.contains(*path))
            .map(|(_, pending)| pending.observed_at + self.debounce)
            .min()
    }

    /// Removes every path that has been quiet for the debounce interval and marks it
    /// in flight until [`finish`](Self::finish).
    /// 取出已平息的路徑，並標記為處理中直到呼叫 [`finish`](Self::finish)。
    pub fn take_due(&mut self, now: Instant) -> Vec<SettledChange> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(path, pending)| {
                !self.in_flight.contains(*path) && pending.observed_at + self.debounce <= now
            })
            .map(|(path, _)| path.clone())
            .collect();

        let mut settled = Vec::with_capacity(due.len());
        for path in due {
            let Some(pending) = self.pending.remove(&path) else {
                continue;
            };
            if let (ChangeKind::RenamedFrom, Some(tracker)) = (&pending.kind, pending.tracker) {
                self.rename_sources.remove(&tracker);
            }
            self.in_flight.insert(path.clone());
            settled.push(SettledChange {
                path,
                kind: pending.kind,
                observed_at: pending.observed_at,
                coalesced: pending.coalesced,
            });
        }
        settled.sort_by_key(|change| change.observed_at);
        settled
    }

    /// Releases a path taken by [`take_due`](Self::take_due).
    pub fn finish(&mut self, path: &Path) {
        self.in_flight.remove(path);
    }

    /// Decides what must be read from disk to reconcile `change`. Pure.
    /// 決定協調此變更需要讀取哪些磁碟資料（純函式）。
    pub fn plan(&self, workspace: &Workspace, change: SettledChange) -> ReadPlan {
        let tree = workspace.tree();
        let mut listings = Vec::new();
        let mut files = Vec::new();
        let mut repaths = Vec::new();

        let relist = |dir: &Path, listings: &mut Vec<PathBuf>| {
            if tree.is_expanded(dir) && !listings.iter().any(|known| known == dir) {
                listings.push(dir.to_path_buf());
            }
        };
        let buffers_under = |dir: &Path| -> Vec<(PathBuf, Fingerprint)> {
            workspace
                .buffers()
                .iter()
                .filter(|buffer| buffer.path().starts_with(dir))
                .map(|buffer| (buffer.path().to_path_buf(), buffer.fingerprint()))
                .collect()
        };

        match &change.kind {
            ChangeKind::Rescan => {
                let scope = if change.path == workspace.root() || tree.is_expanded(&change.path) {
                    change.path.clone()
                } else {
                    change
                        .path
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| change.path.clone())
                };
                for dir in tree.expanded_dirs() {
                    if dir.starts_with(&scope) {
                        relist(&dir, &mut listings);
                    }
                }
                files = buffers_under(&scope);
            }
            ChangeKind::RenamedTo { from: Some(source) } => {
                for dir in [source.parent(), change.path.parent()].into_iter().flatten() {
                    relist(dir, &mut listings);
                }
                for (old_path, fingerprint) in buffers_under(source) {
                    let Ok(suffix) = old_path.strip_prefix(source) else {
                        continue;
                    };
                    let new_path = if suffix.as_os_str().is_empty() {
                        change.path.clone()
                    } else {
                        change.path.join(suffix)
                    };
                    if workspace.is_open(&new_path) {
                        files.push((old_path, fingerprint));
                    } else {
                        files.push((new_path.clone(), fingerprint));
                        repaths.push((old_path, new_path));
                    }
                }
                files.extend(buffers_under(&change.path));
            }
            ChangeKind::Created
            | ChangeKind::Modified
            | ChangeKind::Deleted
            | ChangeKind::RenamedFrom
            | ChangeKind::RenamedTo { from: None } => {
                if let Some(parent) = change.path.parent() {
                    relist(parent, &mut listings);
                }
                relist(&change.path, &mut listings);
                files = buffers_under(&change.path);
            }
        }

        ReadPlan {
            change,
            listings,
            files,
            repaths,
            filter: workspace.filter().clone(),
        }
    }

    /// Applies the disk reads of a plan. Only touches in-memory state.
    /// 套用磁碟讀取結果；只修改記憶體狀態。
    pub fn apply(&self, workspace: &mut Workspace, reading: DiskReading) -> Vec<Reconciliation> {
        let DiskReading {
            change,
            listings,
            files,
            repaths,
        } = reading;
        let report = |path: &Path, outcome: Outcome| Reconciliation {
            path: path.to_path_buf(),
            observed_at: change.observed_at,
            coalesced: change.coalesced,
            outcome,
        };
        let mut outcomes = Vec::new();

        for (from, to) in repaths {
            if workspace.is_open(&to) {
                continue;
            }
            let Some(buffer) = workspace.buffer_mut(&from) else {
                continue;
            };
            buffer.repath(&to);
            workspace.rename_focus(&from, &to);
            tracing::debug!(from = %from.display(), to = %to.display(), "buffer followed rename");
            outcomes.push(report(&to, Outcome::Repathed { from }));
        }

        for (path, baseline, result) in files {
            let Some(buffer) = workspace.buffer_mut(&path) else {
                continue;
            };
            // 讀取期間緩衝區已儲存或重新載入，此結果已過期。 / Saved or reloaded since the read; the result is stale.
            if buffer.fingerprint() != baseline {
                continue;
            }
            let outcome = match result {
                Ok(snapshot) => match buffer.absorb_external_change(snapshot) {
                    ExternalChange::Unchanged => Outcome::Unchanged,
                    ExternalChange::Reloaded => Outcome::Reloaded,
                    ExternalChange::Restored => Outcome::Restored,
                    ExternalChange::Conflicted => Outcome::Conflicted,
                },
                Err(DocumentError::NotFound(_)) | Err(DocumentError::NotAFile(_)) => {
                    if buffer.is_orphaned() {
                        Outcome::Unchanged
                    } else {
                        buffer.mark_orphaned();
                        Outcome::Orphaned
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "external change could not be loaded");
                    buffer.mark_external_change();
                    Outcome::ReloadFailed
                }
            };
            match &outcome {
                Outcome::Conflicted => {
                    tracing::warn!(path = %path.display(), "disk changed under unsaved edits")
                }
                Outcome::Unchanged => {}
                other => tracing::debug!(path = %path.display(), outcome = ?other, "buffer reconciled"),
            }
            outcomes.push(report(&path, outcome));
        }

        for (dir, result) in listings {
            let changed = match result {
                Ok(entries) => workspace.tree_mut().refresh(&dir, entries),
                Err(TreeError::NotFound(_)) | Err(TreeError::NotADirectory(_)) => {
                    workspace.tree_mut().forget(&dir);
                    true
                }
                Err(err) => {
                    tracing::warn!(dir = %dir.display(), error = %err, "re-listing failed");
                    false
                }
            };
            if changed {
                outcomes.push(report(&dir, Outcome::TreeRefreshed));
            }
        }

        if outcomes
            .iter()
            .any(|reconciliation| reconciliation.outcome != Outcome::Unchanged)
        {
            workspace.touch();
        }
        outcomes
    }

    /// Settles and reconciles everything due, doing the I/O inline.
    /// 同步處理所有已平息的變更（I/O 直接在此執行）。
    pub fn reconcile_due(&mut self, workspace: &mut Workspace, now: Instant) -> Vec<Reconciliation> {
        let mut outcomes = Vec::new();
        for change in self.take_due(now) {
            let path = change.path.clone();
            let reading = self.plan(workspace, change).execute();
            outcomes.extend(self.apply(workspace, reading));
            self.finish(&path);
        }
        outcomes
    }
}

/// Disk reads needed to reconcile one settled change.
/// 協調單一變更所需的磁碟讀取。
#[derive(Debug, Clone)]
pub struct ReadPlan {
    change: SettledChange,
    listings: Vec<PathBuf>,
    files: Vec<(PathBuf, Fingerprint)>,
    repaths: Vec<(PathBuf, PathBuf)>,
    filter: TreeFilter,
}

impl ReadPlan {
    pub fn change(&self) -> &SettledChange {
        &self.change
    }

    /// Performs the reads. Touches no shared state, so it can run on a blocking pool.
    /// 執行讀取；不觸及共享狀態，可於阻塞執行緒池執行。
    pub fn execute(self) -> DiskReading {
        let listings = self
            .listings
            .into_iter()
            .map(|dir| {
                let listing = list_directory(&dir, &self.filter);
                (dir, listing)
            })
            .collect();
        let files = self
            .files
            .into_iter()
            .map(|(path, baseline)| {
                let snapshot = DiskSnapshot::read(&path);
                (path, baseline, snapshot)
            })
            .collect();
        DiskReading {
            change: self.change,
            listings,
            files,
            repaths: self.repaths,
        }
    }
}

/// Results of [`ReadPlan::execute`].
#[derive(Debug)]
pub struct DiskReading {
    change: SettledChange,
    listings: Vec<(PathBuf, Result<Vec<DirEntry>, TreeError>)>,
    files: Vec<(PathBuf, Fingerprint, Result<DiskSnapshot, DocumentError>)>,
    repaths: Vec<(PathBuf, PathBuf)>,
}

impl DiskReading {
    pub fn path(&self) -> &Path {
        &self.change.path
    }
}

fn merge_kind(previous: &ChangeKind, next: ChangeKind) -> ChangeKind {
    match (previous, &next) {
        (ChangeKind::Rescan, _) => ChangeKind::Rescan,
        (ChangeKind::RenamedTo { from: Some(_) }, ChangeKind::Modified | ChangeKind::Created) => {
            previous.clone()
        }
        _ => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustcodium_core::document::SyncState;
    use std::fs;
    use tempfile::tempdir;

    const QUIET: Duration = Duration::from_millis(100);

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, Workspace) {
        let dir = tempdir().unwrap();
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).unwrap();
        }
        let workspace = Workspace::open_root(dir.path(), TreeFilter::default()).unwrap();
        (dir, workspace)
    }

    fn event(path: &Path, kind: ChangeKind, at: Instant) -> FileChangeEvent {
        FileChangeEvent::new(path, kind).observed_at(at)
    }

    #[test]
    fn burst_of_modifies_settles_once_with_last_timestamp() {
        let (dir, mut workspace) = setup(&[("main.py", "a=1")]);
        let path = dir.path().join("main.py");
        workspace.open(&path).unwrap();
        fs::write(&path, "a=5").unwrap();

        let mut reconciler = ChangeReconciler::new(QUIET);
        let start = Instant::now();
        let stamps: Vec<Instant> = (0..5).map(|i| start + Duration::from_millis(i * 10)).collect();
        for at in &stamps {
            reconciler.push(event(&path, ChangeKind::Modified, *at));
        }

        assert!(reconciler
            .reconcile_due(&mut workspace, stamps[4] + QUIET / 2)
            .is_empty());
        assert_eq!(reconciler.next_deadline(), Some(stamps[4] + QUIET));

        let applied = reconciler.reconcile_due(&mut workspace, stamps[4] + QUIET);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].observed_at, stamps[4]);
        assert_eq!(applied[0].coalesced, 5);
        assert_eq!(applied[0].outcome, Outcome::Reloaded);
        assert_eq!(workspace.buffer(&path).unwrap().contents(), "a=5");
        assert!(reconciler.is_idle());
    }

    #[test]
    fn dirty_buffer_conflicts_then_save_wins() {
        let (dir, mut workspace) = setup(&[("main.py", "a=1")]);
        let path = dir.path().join("main.py");
        workspace.open(&path).unwrap();
        assert!(workspace.edit(&path, "a=2").unwrap());

        fs::write(&path, "a=1\nb=1").unwrap();
        let mut reconciler = ChangeReconciler::new(QUIET);
        let now = Instant::now();
        reconciler.push(event(&path, ChangeKind::Modified, now));
        let applied = reconciler.reconcile_due(&mut workspace, now + QUIET);

        assert_eq!(applied[0].outcome, Outcome::Conflicted);
        let buffer = workspace.buffer(&path).unwrap();
        assert_eq!(buffer.sync_state(), SyncState::Conflicted);
        assert_eq!(buffer.contents(), "a=2");

        workspace.save(&path).unwrap();
        assert_eq!(workspace.buffer(&path).unwrap().sync_state(), SyncState::Clean);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a=2");
    }

    #[test]
    fn echo_of_own_save_is_ignored() {
        let (dir, mut workspace) = setup(&[("notes.txt", "one")]);
        let path = dir.path().join("notes.txt");
        workspace.open(&path).unwrap();
        workspace.edit(&path, "two").unwrap();
        workspace.save(&path).unwrap();

        let mut reconciler = ChangeReconciler::new(QUIET);
        let now = Instant::now();
        reconciler.push(event(&path, ChangeKind::Modified, now));
        let applied = reconciler.reconcile_due(&mut workspace, now + QUIET);

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].outcome, Outcome::Unchanged);
        assert_eq!(workspace.buffer(&path).unwrap().sync_state(), SyncState::Clean);
    }

    #[test]
    fn delete_orphans_and_recreate_reattaches() {
        let (dir, mut workspace) = setup(&[("lib.rs", "pub fn a() {}")]);
        let path = dir.path().join("lib.rs");
        workspace.open(&path).unwrap();
        let mut reconciler = ChangeReconciler::new(QUIET);

        fs::remove_file(&path).unwrap();
        let now = Instant::now();
        reconciler.push(event(&path, ChangeKind::Deleted, now));
        let applied = reconciler.reconcile_due(&mut workspace, now + QUIET);
        let outcomes: Vec<_> = applied.iter().map(|r| r.outcome.clone()).collect();
        assert!(outcomes.contains(&Outcome::Orphaned));
        assert!(outcomes.contains(&Outcome::TreeRefreshed));
        assert!(workspace.buffer(&path).unwrap().is_orphaned());
        assert_eq!(workspace.buffer(&path).unwrap().contents(), "pub fn a() {}");
        assert!(workspace.tree().root().children.is_empty());

        fs::write(&path, "pub fn a() {}").unwrap();
        let later = now + QUIET * 2;
        reconciler.push(event(&path, ChangeKind::Created, later));
        let applied = reconciler.reconcile_due(&mut workspace, later + QUIET);
        assert!(applied.iter().any(|r| r.outcome == Outcome::Restored));
        assert!(!workspace.buffer(&path).unwrap().is_orphaned());
        assert_eq!(workspace.tree().root().children.len(), 1);
    }

    #[test]
    fn correlated_rename_moves_the_buffer() {
        let (dir, mut workspace) = setup(&[("old.py", "x = 1\n")]);
        let old = dir.path().join("old.py");
        let new = dir.path().join("new.py");
        workspace.open(&old).unwrap();
        fs::rename(&old, &new).unwrap();

        let mut reconciler = ChangeReconciler::new(QUIET);
        let now = Instant::now();
        reconciler.push(event(&old, ChangeKind::RenamedFrom, now).with_tracker(42));
        reconciler.push(event(&new, ChangeKind::RenamedTo { from: None }, now).with_tracker(42));
        let applied = reconciler.reconcile_due(&mut workspace, now + QUIET);

        assert!(applied
            .iter()
            .any(|r| r.path == new && r.outcome == Outcome::Repathed { from: old.clone() }));
        assert!(!workspace.is_open(&old));
        let buffer = workspace.buffer(&new).unwrap();
        assert_eq!(buffer.sync_state(), SyncState::Clean);
        assert_eq!(workspace.active_path(), Some(new.as_path()));
    }

    #[test]
    fn rename_then_delete_of_the_target_orphans_the_source_buffer() {
        let (dir, mut workspace) = setup(&[("old.py", "x = 1\n")]);
        let old = dir.path().join("old.py");
        let new = dir.path().join("new.py");
        workspace.open(&old).unwrap();
        fs::rename(&old, &new).unwrap();
        fs::remove_file(&new).unwrap();

        let mut reconciler = ChangeReconciler::new(QUIET);
        let now = Instant::now();
        reconciler.push(event(&old, ChangeKind::RenamedFrom, now).with_tracker(9));
        reconciler.push(event(&new, ChangeKind::RenamedTo { from: None }, now).with_tracker(9));
        reconciler.push(event(&new, ChangeKind::Deleted, now + QUIET / 4));
        let applied = reconciler.reconcile_due(&mut workspace, now + QUIET * 2);

        assert!(applied
            .iter()
            .any(|r| r.path == old && r.outcome == Outcome::Orphaned));
        let buffer = workspace.buffer(&old).unwrap();
        assert!(buffer.is_orphaned());
        assert!(buffer.has_unsaved_changes());
        assert!(!workspace.is_open(&new));
        assert!(reconciler.is_idle());
    }

    #[test]
    fn rename_followed_by_a_write_keeps_the_pairing() {
        let (dir, mut workspace) = setup(&[("old.py", "x = 1\n")]);
        let old = dir.path().join("old.py");
        let new = dir.path().join("new.py");
        workspace.open(&old).unwrap();
        fs::rename(&old, &new).unwrap();
        fs::write(&new, "x = 2\n").unwrap();

        let mut reconciler = ChangeReconciler::new(QUIET);
        let now = Instant::now();
        reconciler.push(event(&old, ChangeKind::RenamedFrom, now).with_tracker(3));
        reconciler.push(event(&new, ChangeKind::RenamedTo { from: None }, now).with_tracker(3));
        reconciler.push(event(&new, ChangeKind::Modified, now));
        let applied = reconciler.reconcile_due(&mut workspace, now + QUIET);

        assert!(applied
            .iter()
            .any(|r| r.outcome == Outcome::Repathed { from: old.clone() }));
        assert!(!workspace.is_open(&old));
        assert_eq!(workspace.buffer(&new).unwrap().contents(), "x = 2\n");
    }

    #[test]
    fn rescan_reconciles_open_buffers_in_scope() {
        let (dir, mut workspace) = setup(&[("clean.txt", "one"), ("dirty.txt", "one"), ("gone.txt", "one")]);
        let clean = dir.path().join("clean.txt");
        let dirty = dir.path().join("dirty.txt");
        let gone = dir.path().join("gone.txt");
        for path in [&clean, &dirty, &gone] {
            workspace.open(path).unwrap();
        }
        workspace.edit(&dirty, "mine").unwrap();
        fs::write(&clean, "two").unwrap();
        fs::write(&dirty, "theirs").unwrap();
        fs::remove_file(&gone).unwrap();

        let mut reconciler = ChangeReconciler::new(QUIET);
        let now = Instant::now();
        reconciler.push(event(dir.path(), ChangeKind::Rescan, now));
        let applied = reconciler.reconcile_due(&mut workspace, now + QUIET);

        let outcome_for = |path: &Path| {
            applied
                .iter()
                .find(|r| r.path == path)
                .map(|r| r.outcome.clone())
        };
        assert_eq!(outcome_for(clean.as_path()), Some(Outcome::Reloaded));
        assert_eq!(outcome_for(dirty.as_path()), Some(Outcome::Conflicted));
        assert_eq!(outcome_for(gone.as_path()), Some(Outcome::Orphaned));
        assert_eq!(workspace.buffer(&clean).unwrap().contents(), "two");
        assert_eq!(workspace.buffer(&dirty).unwrap().contents(), "mine");
        assert_eq!(outcome_for(dir.path()), Some(Outcome::TreeRefreshed));
    }

    #[test]
    fn uncorrelated_rename_orphans_the_buffer() {
        let (dir, mut workspace) = setup(&[("old.py", "x = 1\n")]);
        let old = dir.path().join("old.py");
        let new = dir.path().join("new.py");
        workspace.open(&old).unwrap();
        fs::rename(&old, &new).unwrap();

        let mut reconciler = ChangeReconciler::new(QUIET);
        let now = Instant::now();
        reconciler.push(event(&old, ChangeKind::RenamedFrom, now));
        reconciler.push(event(&new, ChangeKind::RenamedTo { from: None }, now));
        reconciler.reconcile_due(&mut workspace, now + QUIET);

        assert!(workspace.buffer(&old).unwrap().is_orphaned());
        assert!(!workspace.is_open(&new));
    }

    #[test]
    fn undecodable_external_write_marks_buffer_externally_modified() {
        let (dir, mut workspace) = setup(&[("data.txt", "text")]);
        let path = dir.path().join("data.txt");
        workspace.open(&path).unwrap();
        fs::write(&path, [0u8, 1, 2, 3, 0, 0]).unwrap();

        let mut reconciler = ChangeReconciler::new(QUIET);
        let now = Instant::now();
        reconciler.push(event(&path, ChangeKind::Modified, now));
        let applied = reconciler.reconcile_due(&mut workspace, now + QUIET);

        assert_eq!(applied[0].outcome, Outcome::ReloadFailed);
        let buffer = workspace.buffer(&path).unwrap();
        assert_eq!(buffer.sync_state(), SyncState::ExternallyModified);
        assert_eq!(buffer.contents(), "text");
    }

    #[test]
    fn rescan_relists_expanded_directories() {
        let (dir, mut workspace) = setup(&[("a.txt", "")]);
        fs::write(dir.path().join("b.txt"), "").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let mut reconciler = ChangeReconciler::new(QUIET);
        let now = Instant::now();
        reconciler.push(event(dir.path(), ChangeKind::Rescan, now));
        reconciler.push(event(dir.path(), ChangeKind::Modified, now));
        let applied = reconciler.reconcile_due(&mut workspace, now + QUIET);

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].outcome, Outcome::TreeRefreshed);
        let names: Vec<_> = workspace
            .tree()
            .root()
            .children
            .iter()
            .map(|node| node.name.clone())
            .collect();
        assert_eq!(names, vec!["sub", "a.txt", "b.txt"]);
    }

    #[test]
    fn in_flight_paths_do_not_settle_twice() {
        let mut reconciler = ChangeReconciler::new(QUIET);
        let path = PathBuf::from("/ws/a.txt");
        let now = Instant::now();
        reconciler.push(event(&path, ChangeKind::Modified, now));
        assert_eq!(reconciler.take_due(now + QUIET).len(), 1);

        reconciler.push(event(&path, ChangeKind::Modified, now + QUIET));
        assert!(reconciler.take_due(now + QUIET * 3).is_empty());
        assert_eq!(reconciler.next_deadline(), None);

        reconciler.finish(&path);
        assert_eq!(reconciler.next_deadline(), Some(now + QUIET * 2));
        assert_eq!(reconciler.take_due(now + QUIET * 3).len(), 1);
    }

    #[test]
    fn events_for_closed_files_only_touch_the_tree() {
        let (dir, mut workspace) = setup(&[("a.txt", "")]);
        let created = dir.path().join("new.txt");
        fs::write(&created, "hello").unwrap();

        let mut reconciler = ChangeReconciler::new(QUIET);
        let now = Instant::now();
        reconciler.push(event(&created, ChangeKind::Created, now));
        let applied = reconciler.reconcile_due(&mut workspace, now + QUIET);

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].path, dir.path());
        assert!(workspace.buffers().is_empty());
    }
}
