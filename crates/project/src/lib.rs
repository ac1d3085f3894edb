//! Workspace state for RustCodium: the lazy file tree, open buffers, the change
//! reconciler and the event loop that owns them.
//! RustCodium 的工作區狀態：延遲載入的檔案樹、開啟的緩衝區、變更協調器與持有它們的事件迴圈。

mod wire_path;

pub mod host;
pub mod reconciler;
pub mod tree;
pub mod workspace;

pub use host::{HostOptions, WorkspaceHandle, WorkspaceHost};
pub use reconciler::{
    ChangeReconciler, DiskReading, Outcome, ReadPlan, Reconciliation, SettledChange, DEFAULT_DEBOUNCE,
};
pub use tree::{
    list_directory, DirEntry, ExpandTicket, Expansion, FileTree, FileTreeNode, NodeKind, TreeError,
    TreeFilter,
};
pub use wire_path::{from_wire, to_wire};
pub use workspace::{
    BufferSummary, ErrorKind, OpenRequest, OpenTicket, Resolution, SaveTicket, Workspace,
    WorkspaceError, WorkspaceSnapshot,
};
