use std::collections::hash_map::DefaultHasher;
use std::fs::{self, Metadata};
use std::hash::{Hash, Hasher};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::encoding::{self, Encoding, EncodingError};
use crate::language::{default_encoding_for, detect_language};

/// 儲存時暫存檔的副檔名；監視器可藉此忽略它們。 / Suffix of in-flight save files.
pub const TEMP_SUFFIX: &str = ".rustcodium-tmp";

/// 表示文件目前使用的行尾樣式。 / Represents the current line ending style for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
    Cr,
}

impl LineEnding {
    /// 回傳序列化文字時使用的行尾字串。 / Returns the literal string representation used when serialising text.
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
            LineEnding::Cr => "\r",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LineEnding::Lf => "LF",
            LineEnding::CrLf => "CRLF",
            LineEnding::Cr => "CR",
        }
    }
}

/// 緩衝區相對於磁碟的同步狀態。 / Synchronisation state of a buffer relative to the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// 內容與磁碟一致。 / Contents match the disk.
    Clean,
    /// 有未儲存的本地修改，磁碟未變。 / Unsaved local edits, disk unchanged since open/save.
    DirtyLocal,
    /// 磁碟已變更但尚未重新載入。 / Disk changed while no local edits were pending, reload not applied yet.
    ExternallyModified,
    /// 磁碟與記憶體同時變更，需要使用者決定。 / Disk changed while local edits were pending.
    Conflicted,
}

/// 外部變更套用到緩衝區後的結果。 / Result of folding an external disk change into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalChange {
    Unchanged,
    Reloaded,
    Restored,
    Conflicted,
}

/// 磁碟內容指紋：大小、修改時間與內容雜湊。 / On-disk fingerprint: size, modification time and content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub len: u64,
    pub modified_nanos: Option<u128>,
    pub content_hash: u64,
}

impl Fingerprint {
    fn new(metadata: &Metadata, bytes: &[u8]) -> Self {
        Self {
            len: metadata.len(),
            modified_nanos: metadata.modified().ok().and_then(system_time_to_nanos),
            content_hash: hash_bytes(bytes),
        }
    }

    /// 忽略修改時間，只比較大小與內容。 / Compares size and content, ignoring the modification time.
    pub fn same_content(&self, other: &Fingerprint) -> bool {
        self.len == other.len && self.content_hash == other.content_hash
    }
}

/// 文件載入或儲存時可能發生的錯誤。 / Errors that can occur while loading or saving a document.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),
    #[error("access denied to {}", .0.display())]
    AccessDenied(PathBuf),
    #[error("{} is not a regular file", .0.display())]
    NotAFile(PathBuf),
    #[error("{} is binary or uses an unsupported text encoding", .0.display())]
    Undecodable(PathBuf),
    #[error("text of {} cannot be represented in {encoding}", path.display())]
    Unrepresentable {
        path: PathBuf,
        encoding: &'static str,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DocumentError {
    fn from_read(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => DocumentError::NotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => DocumentError::AccessDenied(path.to_path_buf()),
            _ => DocumentError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    fn from_encoding(path: &Path, err: EncodingError) -> Self {
        match err {
            EncodingError::Undecodable => DocumentError::Undecodable(path.to_path_buf()),
            EncodingError::Unrepresentable(encoding) => DocumentError::Unrepresentable {
                path: path.to_path_buf(),
                encoding,
            },
        }
    }
}

/// 一次磁碟讀取的結果，已解碼並正規化行尾。 / One read of a file from disk, decoded and newline-normalised.
///
/// 讀取與套用分離，讓呼叫端可在背景執行緒進行 I/O。 /
/// Reading is split from applying so callers can run the I/O off the state-update thread.
#[derive(Debug, Clone)]
pub struct DiskSnapshot {
    pub path: PathBuf,
    pub text: String,
    pub encoding: Encoding,
    pub has_bom: bool,
    pub line_ending: LineEnding,
    pub fingerprint: Fingerprint,
}

impl DiskSnapshot {
    /// 讀取並解碼檔案。 / Reads and decodes the file at `path`.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|err| DocumentError::from_read(path, err))?;
        if !metadata.is_file() {
            return Err(DocumentError::NotAFile(path.to_path_buf()));
        }
        let bytes = fs::read(path).map_err(|err| DocumentError::from_read(path, err))?;
        let decoded = encoding::detect_with_hint(&bytes, default_encoding_for(path))
            .map_err(|err| DocumentError::from_encoding(path, err))?;

        Ok(Self {
            path: path.to_path_buf(),
            line_ending: detect_line_ending(&decoded.text),
            text: normalize_newlines(&decoded.text),
            encoding: decoded.encoding,
            has_bom: decoded.has_bom,
            fingerprint: Fingerprint::new(&metadata, &bytes),
        })
    }
}

/// 待寫入磁碟的儲存工作；編碼在前景完成，寫入可在背景進行。 /
/// A pending save: encoded up front, written wherever the caller likes.
#[derive(Debug, Clone)]
pub struct SaveJob {
    path: PathBuf,
    bytes: Vec<u8>,
    has_bom: bool,
    text_hash: u64,
    revision: u64,
    create_parents: bool,
}

impl SaveJob {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 先寫入同目錄的唯一暫存檔再取代目標，避免出現部分寫入的情況。 /
    /// Writes a uniquely named temporary file in the target directory, then
    /// renames it over the target so readers never see a partial write.
    pub fn write(&self) -> Result<Fingerprint, DocumentError> {
        let write_error = |source| DocumentError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if self.create_parents {
            fs::create_dir_all(dir).map_err(write_error)?;
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix(".").suffix(TEMP_SUFFIX);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Temporary files default to 0600; keep the target's mode instead.
            let permissions = fs::metadata(&self.path)
                .map(|metadata| metadata.permissions())
                .unwrap_or_else(|_| fs::Permissions::from_mode(0o666));
            builder.permissions(permissions);
        }

        let mut tmp = builder.tempfile_in(dir).map_err(write_error)?;
        tmp.write_all(&self.bytes).map_err(write_error)?;
        tmp.as_file().sync_all().map_err(write_error)?;
        // 失敗時暫存檔隨 `PersistError` 一併刪除。 / On failure the temporary file is removed with the `PersistError`.
        tmp.persist(&self.path).map_err(|err| write_error(err.error))?;

        let metadata = fs::metadata(&self.path).map_err(write_error)?;
        tracing::debug!(path = %self.path.display(), bytes = self.bytes.len(), "document written");
        Ok(Fingerprint::new(&metadata, &self.bytes))
    }
}

/// 代表一個已開啟檔案的記憶體模型。 / In-memory model of one open file.
#[derive(Debug, Clone)]
pub struct DocumentBuffer {
    path: PathBuf,
    contents: String,
    line_ending: LineEnding,
    encoding: Encoding,
    has_bom: bool,
    language: &'static str,
    fingerprint: Fingerprint,
    saved_hash: u64,
    revision: u64,
    dirty: bool,
    orphaned: bool,
    conflicted: bool,
    external_change: bool,
    open_seq: u64,
}

impl DocumentBuffer {
    /// 從磁碟載入文件並將行尾內部正規化為 `\n`。 / Loads a document from disk, normalising newlines to `\n` internally.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        DiskSnapshot::read(path).map(Self::from_snapshot)
    }

    /// 以一次磁碟讀取結果建立乾淨的緩衝區。 / Builds a clean buffer from a disk read.
    pub fn from_snapshot(snapshot: DiskSnapshot) -> Self {
        let saved_hash = hash_text(&snapshot.text);
        Self {
            language: detect_language(&snapshot.path),
            path: snapshot.path,
            contents: snapshot.text,
            line_ending: snapshot.line_ending,
            encoding: snapshot.encoding,
            has_bom: snapshot.has_bom,
            fingerprint: snapshot.fingerprint,
            saved_hash,
            revision: 0,
            dirty: false,
            orphaned: false,
            conflicted: false,
            external_change: false,
            open_seq: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 取得目前文件內容（行尾已正規化為 `\n`）。 / Returns the current contents, normalised to `\n` line endings.
    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn has_bom(&self) -> bool {
        self.has_bom
    }

    pub fn language(&self) -> &'static str {
        self.language
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_orphaned(&self) -> bool {
        self.orphaned
    }

    pub fn is_conflicted(&self) -> bool {
        self.sync_state() == SyncState::Conflicted
    }

    /// 關閉前是否需要確認：有未儲存修改，或磁碟檔案已消失。 /
    /// Whether closing needs confirmation: unsaved edits, or the file vanished from disk.
    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty || self.orphaned
    }

    pub fn sync_state(&self) -> SyncState {
        if self.conflicted || (self.external_change && self.dirty) {
            SyncState::Conflicted
        } else if self.external_change {
            SyncState::ExternallyModified
        } else if self.dirty {
            SyncState::DirtyLocal
        } else {
            SyncState::Clean
        }
    }

    /// 開啟順序（分頁排序用）。 / Open order, used for tab ordering.
    pub fn open_seq(&self) -> u64 {
        self.open_seq
    }

    pub fn set_open_seq(&mut self, seq: u64) {
        self.open_seq = seq;
    }

    /// 以新文字取代記憶體內容；與上次儲存內容相同時視為未修改。 /
    /// Replaces the contents; matching the last saved text again clears the dirty flag.
    pub fn edit(&mut self, text: impl Into<String>) -> bool {
        self.contents = normalize_newlines(&text.into());
        self.revision = self.revision.wrapping_add(1);
        self.dirty = hash_text(&self.contents) != self.saved_hash;
        if !self.dirty {
            self.conflicted = false;
        }
        self.dirty
    }

    /// 將文件儲存至目前路徑。 / Saves the document to its current path.
    pub fn save(&mut self) -> Result<(), DocumentError> {
        let job = self.prepare_save()?;
        let fingerprint = job.write()?;
        self.finish_save(job, fingerprint);
        Ok(())
    }

    /// 將文件另存為新路徑。 / Saves the document under a new path, which becomes its path.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<(), DocumentError> {
        let job = self.prepare_save_as(path)?;
        let fingerprint = job.write()?;
        self.finish_save(job, fingerprint);
        Ok(())
    }

    /// 依緩衝區編碼序列化內容，產生儲存工作。 / Encodes the contents with the buffer's encoding into a save job.
    pub fn prepare_save(&self) -> Result<SaveJob, DocumentError> {
        self.prepare_save_as(self.path.clone())
    }

    /// 所有行以開啟時偵測到的第一種行尾寫出；混合行尾會被統一。UTF-16/32 一律寫入 BOM。 /
    /// Every line is written with the line ending detected first at open time, so
    /// mixed endings are unified. UTF-16 and UTF-32 always get a BOM, otherwise
    /// non-ASCII text could not be detected again on the next open.
    pub fn prepare_save_as(&self, path: impl AsRef<Path>) -> Result<SaveJob, DocumentError> {
        let path = path.as_ref().to_path_buf();
        let text = self.contents.replace('\n', self.line_ending.as_str());
        let has_bom = self.has_bom || self.encoding.needs_bom();
        let bytes = self
            .encoding
            .encode(&text, has_bom)
            .map_err(|err| DocumentError::from_encoding(&path, err))?;
        Ok(SaveJob {
            create_parents: self.orphaned || path != self.path,
            path,
            bytes,
            has_bom,
            text_hash: hash_text(&self.contents),
            revision: self.revision,
        })
    }

    /// 寫入成功後更新指紋並清除 dirty；寫入期間的新修改保持 dirty。 /
    /// Records a successful write; edits made while the write was in flight keep the buffer dirty.
    pub fn finish_save(&mut self, job: SaveJob, fingerprint: Fingerprint) {
        if job.path != self.path {
            self.language = detect_language(&job.path);
            self.path = job.path;
        }
        self.fingerprint = fingerprint;
        self.has_bom = job.has_bom;
        self.saved_hash = job.text_hash;
        self.dirty = job.revision != self.revision && hash_text(&self.contents) != self.saved_hash;
        self.conflicted = false;
        self.external_change = false;
        self.orphaned = false;
    }

    /// 重新載入磁碟內容覆蓋記憶體，並重設 dirty 狀態。 / Reloads from disk, replacing the in-memory contents.
    pub fn reload(&mut self) -> Result<(), DocumentError> {
        let snapshot = DiskSnapshot::read(&self.path)?;
        self.apply_snapshot(snapshot);
        Ok(())
    }

    /// 以磁碟讀取結果覆蓋緩衝區。 / Replaces the buffer state with a disk read.
    pub fn apply_snapshot(&mut self, snapshot: DiskSnapshot) {
        self.saved_hash = hash_text(&snapshot.text);
        self.contents = snapshot.text;
        self.encoding = snapshot.encoding;
        self.has_bom = snapshot.has_bom;
        self.line_ending = snapshot.line_ending;
        self.fingerprint = snapshot.fingerprint;
        self.revision = self.revision.wrapping_add(1);
        self.dirty = false;
        self.conflicted = false;
        self.external_change = false;
        self.orphaned = false;
    }

    /// 將外部變更併入緩衝區：乾淨時重新載入，有修改時標記衝突並保留內容。 /
    /// Folds an external change in: clean buffers reload, dirty ones keep their contents and become conflicted.
    pub fn absorb_external_change(&mut self, snapshot: DiskSnapshot) -> ExternalChange {
        if self.fingerprint.same_content(&snapshot.fingerprint) && !self.external_change {
            self.fingerprint = snapshot.fingerprint;
            if self.orphaned {
                self.orphaned = false;
                return ExternalChange::Restored;
            }
            return ExternalChange::Unchanged;
        }

        if !self.dirty {
            self.apply_snapshot(snapshot);
            return ExternalChange::Reloaded;
        }

        self.fingerprint = snapshot.fingerprint;
        self.saved_hash = hash_text(&snapshot.text);
        self.orphaned = false;
        self.external_change = false;
        if hash_text(&self.contents) == self.saved_hash {
            self.dirty = false;
            self.conflicted = false;
            ExternalChange::Unchanged
        } else {
            tracing::debug!(path = %self.path.display(), "disk and buffer diverged");
            self.conflicted = true;
            ExternalChange::Conflicted
        }
    }

    /// 磁碟已變更但無法重新載入（例如變成二進位檔）。 / The disk changed but could not be reloaded (e.g. it became binary).
    pub fn mark_external_change(&mut self) {
        self.external_change = true;
    }

    /// 磁碟檔案已消失；內容保留。 / The file vanished from disk; contents are kept.
    pub fn mark_orphaned(&mut self) {
        self.orphaned = true;
    }

    /// 保留本地內容並結束衝突；緩衝區維持 dirty，之後的儲存會覆寫磁碟。 /
    /// Keeps the local contents and ends the conflict; the buffer stays dirty so the next save overwrites the disk.
    pub fn keep_local(&mut self) {
        self.conflicted = false;
        self.external_change = false;
        self.dirty = hash_text(&self.contents) != self.saved_hash;
    }

    /// 檔案被確認改名後更新路徑。 / Moves the buffer to the path a correlated rename reported.
    pub fn repath(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
        self.language = detect_language(&self.path);
        self.orphaned = false;
    }
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

fn hash_text(text: &str) -> u64 {
    hash_bytes(text.as_bytes())
}

fn system_time_to_nanos(time: SystemTime) -> Option<u128> {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => Some(duration.as_nanos()),
        Err(_) => None,
    }
}

/// 掃描原始文字找到第一個換行記號以推斷行尾偏好。 / Scans the raw text for the first newline sentinel to infer the preferred line ending.
fn detect_line_ending(text: &str) -> LineEnding {
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\r' => {
                if idx + 1 < bytes.len() && bytes[idx + 1] == b'\n' {
                    return LineEnding::CrLf;
                }
                return LineEnding::Cr;
            }
            b'\n' => return LineEnding::Lf,
            _ => idx += 1,
        }
    }
    LineEnding::Lf
}

fn normalize_newlines(input: &str) -> String {
    if !input.contains('\r') {
        return input.to_owned();
    }
    // 將 CRLF 與 CR 轉成 LF，簡化記憶體儲存。 / Convert CRLF and CR sequences to LF for internal storage simplicity.
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                result.push('\n');
            }
            _ => result.push(ch),
        }
    }
    result
}
