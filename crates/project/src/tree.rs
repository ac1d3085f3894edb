use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::wire_path;

/// Kind of an entry in the file tree.
/// 檔案樹節點的類型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
}

/// Expansion state of a directory node.
/// 目錄節點的展開狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expansion {
    Collapsed,
    Expanding,
    Expanded,
}

/// Node of the lazily loaded file tree. Children are only populated while expanded.
/// 延遲載入的檔案樹節點；僅在展開時才有子節點。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTreeNode {
    #[serde(with = "wire_path")]
    pub path: PathBuf,
    pub name: String,
    pub kind: NodeKind,
    pub expansion: Expansion,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileTreeNode>,
    #[serde(skip)]
    ticket: Option<u64>,
}

impl FileTreeNode {
    fn from_entry(entry: DirEntry) -> Self {
        Self {
            path: entry.path,
            name: entry.name,
            kind: entry.kind,
            expansion: Expansion::Collapsed,
            children: Vec::new(),
            ticket: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_expanded(&self) -> bool {
        self.expansion == Expansion::Expanded
    }
}

/// One direct child returned by [`list_directory`].
/// [`list_directory`] 回傳的直接子項目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    pub name: String,
    pub kind: NodeKind,
}

/// Which entries the tree shows.
/// 決定檔案樹要顯示哪些項目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFilter {
    pub show_hidden: bool,
    pub ignored_names: Vec<String>,
}

impl Default for TreeFilter {
    fn default() -> Self {
        Self {
            show_hidden: true,
            ignored_names: vec![".git".to_string()],
        }
    }
}

impl TreeFilter {
    pub fn admits(&self, name: &str) -> bool {
        if !self.show_hidden && name.starts_with('.') {
            return false;
        }
        !self.ignored_names.iter().any(|ignored| ignored == name)
    }
}

/// Errors raised while listing or navigating the tree.
/// 列出目錄或操作檔案樹時的錯誤。
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),
    #[error("access denied to {}", .0.display())]
    AccessDenied(PathBuf),
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("{} is not part of the file tree", .0.display())]
    UnknownNode(PathBuf),
    #[error("I/O error listing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TreeError {
    fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => TreeError::NotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => TreeError::AccessDenied(path.to_path_buf()),
            _ => TreeError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

/// Lists the direct children of `path`: directories first, then case-insensitively by name.
/// Stateless, so it can run on any thread.
/// 列出 `path` 的直接子項目：目錄優先，再依名稱（不分大小寫）排序。無狀態，可在任意執行緒執行。
pub fn list_directory(path: impl AsRef<Path>, filter: &TreeFilter) -> Result<Vec<DirEntry>, TreeError> {
    let path = path.as_ref();
    let metadata = fs::metadata(path).map_err(|err| TreeError::from_io(path, err))?;
    if !metadata.is_dir() {
        return Err(TreeError::NotADirectory(path.to_path_buf()));
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(path).map_err(|err| TreeError::from_io(path, err))? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(dir = %path.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if !filter.admits(&name) {
            continue;
        }
        let entry_path = entry.path();
        // 符號連結依目標判定；失效連結視為檔案。 / Symlinks follow their target; dangling links count as files.
        let is_dir = match entry.file_type() {
            Ok(file_type) if file_type.is_symlink() => {
                fs::metadata(&entry_path).map(|meta| meta.is_dir()).unwrap_or(false)
            }
            Ok(file_type) => file_type.is_dir(),
            Err(_) => false,
        };
        entries.push(DirEntry {
            path: entry_path,
            name,
            kind: if is_dir { NodeKind::Directory } else { NodeKind::File },
        });
    }

    entries.sort_by(|a, b| {
        (a.kind != NodeKind::Directory)
            .cmp(&(b.kind != NodeKind::Directory))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(entries)
}

/// Handle for an expansion whose listing is being produced elsewhere.
/// 展開請求的憑證；目錄列表可在其他執行緒產生。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandTicket {
    pub path: PathBuf,
    id: u64,
}

/// Lazily expanded tree rooted at the workspace root.
/// 以工作區根目錄為根、按需展開的檔案樹。
#[derive(Debug, Clone)]
pub struct FileTree {
    root: FileTreeNode,
    next_ticket: u64,
}

impl FileTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let path = root.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            root: FileTreeNode {
                path,
                name,
                kind: NodeKind::Directory,
                expansion: Expansion::Collapsed,
                children: Vec::new(),
                ticket: None,
            },
            next_ticket: 1,
        }
    }

    pub fn root(&self) -> &FileTreeNode {
        &self.root
    }

    pub fn find(&self, path: impl AsRef<Path>) -> Option<&FileTreeNode> {
        let path = path.as_ref();
        let relative = path.strip_prefix(&self.root.path).ok()?;
        let mut node = &self.root;
        let mut current = self.root.path.clone();
        for component in relative.components() {
            current.push(component);
            node = node.children.iter().find(|child| child.path == current)?;
        }
        Some(node)
    }

    fn find_mut(&mut self, path: &Path) -> Option<&mut FileTreeNode> {
        let relative = path.strip_prefix(&self.root.path).ok()?.to_path_buf();
        let mut node = &mut self.root;
        let mut current = node.path.clone();
        for component in relative.components() {
            current.push(component);
            node = node.children.iter_mut().find(|child| child.path == current)?;
        }
        Some(node)
    }

    pub fn is_expanded(&self, path: impl AsRef<Path>) -> bool {
        self.find(path).map_or(false, FileTreeNode::is_expanded)
    }

    /// Expands a directory synchronously, listing only its direct children.
    /// 同步展開目錄，只列出直接子項目。
    pub fn expand(&mut self, path: impl AsRef<Path>, filter: &TreeFilter) -> Result<(), TreeError> {
        let ticket = self.begin_expand(path)?;
        let listing = list_directory(&ticket.path, filter);
        self.complete_expand(ticket, listing).map(|_| ())
    }

    /// Marks a directory as expanding and hands out a ticket for the listing.
    /// 將目錄標記為展開中並發出憑證。
    pub fn begin_expand(&mut self, path: impl AsRef<Path>) -> Result<ExpandTicket, TreeError> {
        let path = path.as_ref();
        let id = self.next_ticket;
        let node = self
            .find_mut(path)
            .ok_or_else(|| TreeError::UnknownNode(path.to_path_buf()))?;
        if !node.is_dir() {
            return Err(TreeError::NotADirectory(path.to_path_buf()));
        }
        node.expansion = Expansion::Expanding;
        node.ticket = Some(id);
        self.next_ticket += 1;
        Ok(ExpandTicket {
            path: path.to_path_buf(),
            id,
        })
    }

    /// Applies a listing produced for `ticket`. Returns `Ok(false)` when the node was
    /// collapsed or re-requested meanwhile and the listing was discarded.
    /// 套用憑證對應的列表；若節點期間已收合或重新請求則丟棄並回傳 `Ok(false)`。
    pub fn complete_expand(
        &mut self,
        ticket: ExpandTicket,
        listing: Result<Vec<DirEntry>, TreeError>,
    ) -> Result<bool, TreeError> {
        let Some(node) = self.find_mut(&ticket.path) else {
            return Ok(false);
        };
        if node.ticket != Some(ticket.id) {
            tracing::debug!(path = %ticket.path.display(), "discarding stale directory listing");
            return Ok(false);
        }
        node.ticket = None;
        match listing {
            Ok(entries) => {
                node.children = entries.into_iter().map(FileTreeNode::from_entry).collect();
                node.expansion = Expansion::Expanded;
                Ok(true)
            }
            Err(err) => {
                node.children.clear();
                node.expansion = Expansion::Collapsed;
                Err(err)
            }
        }
    }

    /// Collapses a directory, dropping its children without touching the disk.
    /// 收合目錄並丟棄子節點，不存取磁碟。
    pub fn collapse(&mut self, path: impl AsRef<Path>) -> Result<(), TreeError> {
        let path = path.as_ref();
        let node = self
            .find_mut(path)
            .ok_or_else(|| TreeError::UnknownNode(path.to_path_buf()))?;
        node.children.clear();
        node.expansion = Expansion::Collapsed;
        node.ticket = None;
        Ok(())
    }

    /// Replaces the children of an expanded directory with a fresh listing, keeping
    /// the subtrees of children that still exist. Returns whether anything changed.
    /// 以新列表更新已展開目錄，保留仍存在子項目的子樹；回傳是否有變更。
    pub fn refresh(&mut self, dir: impl AsRef<Path>, listing: Vec<DirEntry>) -> bool {
        let Some(node) = self.find_mut(dir.as_ref()) else {
            return false;
        };
        if !node.is_expanded() {
            return false;
        }
        let mut previous = std::mem::take(&mut node.children);
        let mut changed = previous.len() != listing.len();
        for entry in listing {
            let kept = previous
                .iter()
                .position(|child| child.path == entry.path && child.kind == entry.kind)
                .map(|idx| previous.swap_remove(idx));
            match kept {
                Some(child) => node.children.push(child),
                None => {
                    changed = true;
                    node.children.push(FileTreeNode::from_entry(entry));
                }
            }
        }
        changed
    }

    /// Removes every descendant of `dir` from view after the directory vanished.
    /// 目錄消失後收合並移除其子項目。
    pub fn forget(&mut self, dir: impl AsRef<Path>) {
        if let Some(node) = self.find_mut(dir.as_ref()) {
            node.children.clear();
            node.expansion = Expansion::Collapsed;
            node.ticket = None;
        }
    }

    /// Every directory currently expanded, root first.
    /// 目前所有已展開的目錄（根目錄優先）。
    pub fn expanded_dirs(&self) -> Vec<PathBuf> {
        fn walk(node: &FileTreeNode, out: &mut Vec<PathBuf>) {
            if node.is_expanded() {
                out.push(node.path.clone());
                for child in &node.children {
                    walk(child, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names(nodes: &[FileTreeNode]) -> Vec<&str> {
        nodes.iter().map(|node| node.name.as_str()).collect()
    }

    #[test]
    fn listing_puts_directories_first_then_sorts_case_insensitively() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::create_dir(dir.path().join("A")).unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("C.md"), "c").unwrap();

        let entries = list_directory(dir.path(), &TreeFilter::default()).unwrap();
        let listed: Vec<_> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(listed, vec!["A", "a.txt", "b.txt", "C.md"]);
        assert_eq!(entries[0].kind, NodeKind::Directory);
    }

    #[test]
    fn listing_reports_missing_and_non_directories() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();

        assert!(matches!(
            list_directory(dir.path().join("missing"), &TreeFilter::default()),
            Err(TreeError::NotFound(_))
        ));
        assert!(matches!(
            list_directory(&file, &TreeFilter::default()),
            Err(TreeError::NotADirectory(_))
        ));
    }

    #[test]
    fn filter_hides_dotfiles_and_ignored_names() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".env"), "").unwrap();
        fs::write(dir.path().join("main.py"), "").unwrap();

        let default = list_directory(dir.path(), &TreeFilter::default()).unwrap();
        assert_eq!(default.len(), 2);

        let strict = TreeFilter {
            show_hidden: false,
            ignored_names: Vec::new(),
        };
        let listed = list_directory(dir.path(), &strict).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "main.py");
    }

    #[test]
    fn expand_collapse_expand_reflects_current_disk() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "").unwrap();

        let mut tree = FileTree::new(dir.path());
        let filter = TreeFilter::default();
        tree.expand(dir.path(), &filter).unwrap();
        let src = dir.path().join("src");
        tree.expand(&src, &filter).unwrap();
        assert_eq!(names(&tree.find(&src).unwrap().children), vec!["lib.rs"]);

        tree.collapse(&src).unwrap();
        assert!(tree.find(&src).unwrap().children.is_empty());
        fs::write(src.join("main.rs"), "").unwrap();

        tree.expand(&src, &filter).unwrap();
        assert_eq!(names(&tree.find(&src).unwrap().children), vec!["lib.rs", "main.rs"]);
        assert_eq!(tree.expanded_dirs(), vec![dir.path().to_path_buf(), src]);
    }

    #[test]
    fn stale_listing_is_discarded_after_collapse() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        let mut tree = FileTree::new(dir.path());

        let ticket = tree.begin_expand(dir.path()).unwrap();
        assert_eq!(tree.root().expansion, Expansion::Expanding);
        tree.collapse(dir.path()).unwrap();

        let listing = list_directory(dir.path(), &TreeFilter::default());
        assert!(!tree.complete_expand(ticket, listing).unwrap());
        assert_eq!(tree.root().expansion, Expansion::Collapsed);
        assert!(tree.root().children.is_empty());
    }

    #[test]
    fn failed_listing_reverts_to_collapsed() {
        let dir = tempdir().unwrap();
        let mut tree = FileTree::new(dir.path());
        let ticket = tree.begin_expand(dir.path()).unwrap();

        let err = tree
            .complete_expand(ticket, Err(TreeError::AccessDenied(dir.path().to_path_buf())))
            .unwrap_err();
        assert!(matches!(err, TreeError::AccessDenied(_)));
        assert_eq!(tree.root().expansion, Expansion::Collapsed);
    }

    #[test]
    fn expanding_a_file_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        let mut tree = FileTree::new(dir.path());
        tree.expand(dir.path(), &TreeFilter::default()).unwrap();

        assert!(matches!(
            tree.begin_expand(dir.path().join("a.txt")),
            Err(TreeError::NotADirectory(_))
        ));
        assert!(matches!(
            tree.begin_expand(dir.path().join("nope")),
            Err(TreeError::UnknownNode(_))
        ));
    }

    #[test]
    fn refresh_keeps_surviving_subtrees() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/mod.rs"), "").unwrap();
        fs::write(dir.path().join("old.txt"), "").unwrap();

        let filter = TreeFilter::default();
        let mut tree = FileTree::new(dir.path());
        tree.expand(dir.path(), &filter).unwrap();
        tree.expand(dir.path().join("pkg"), &filter).unwrap();

        fs::remove_file(dir.path().join("old.txt")).unwrap();
        fs::write(dir.path().join("new.txt"), "").unwrap();
        let listing = list_directory(dir.path(), &filter).unwrap();
        assert!(tree.refresh(dir.path(), listing));

        assert_eq!(names(&tree.root().children), vec!["pkg", "new.txt"]);
        assert!(tree.is_expanded(dir.path().join("pkg")));
        assert_eq!(
            names(&tree.find(dir.path().join("pkg")).unwrap().children),
            vec!["mod.rs"]
        );
    }
}
