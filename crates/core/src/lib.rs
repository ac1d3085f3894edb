pub mod document;
pub mod encoding;
pub mod file_monitor;
pub mod language;

pub use document::{
    DiskSnapshot, DocumentBuffer, DocumentError, ExternalChange, Fingerprint, LineEnding,
    SaveJob, SyncState, TEMP_SUFFIX,
};
pub use encoding::{detect, detect_with_hint, Decoded, Encoding, EncodingError};
pub use file_monitor::{ChangeKind, FileChangeEvent, FileMonitor, FileMonitorError};
pub use language::{detect_language, UNDEFINED_LANGUAGE};
