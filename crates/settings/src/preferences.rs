use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const PREFERENCES_VERSION: u32 = 1;

const MIN_DEBOUNCE_MS: u64 = 10;
const MAX_DEBOUNCE_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to read preferences {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse preferences {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize preferences {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write preferences {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 應用程式設定，每個欄位都有預設值。 / Application preferences; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub workspace: WorkspacePreferences,
    #[serde(default)]
    pub backend: BackendPreferences,
    #[serde(default)]
    pub logging: LoggingPreferences,
}

fn default_version() -> u32 {
    PREFERENCES_VERSION
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            workspace: WorkspacePreferences::default(),
            backend: BackendPreferences::default(),
            logging: LoggingPreferences::default(),
        }
    }
}

impl Preferences {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = PREFERENCES_VERSION;
        }
        self.workspace.sanitize();
        self.backend.sanitize();
        self.logging.sanitize();
    }
}

/// 工作區同步相關設定。 / Workspace synchronisation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspacePreferences {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_true")]
    pub show_hidden: bool,
    #[serde(default = "default_ignored_names")]
    pub ignored_names: Vec<String>,
    #[serde(default = "default_true")]
    pub watch: bool,
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    150
}

fn default_ignored_names() -> Vec<String> {
    vec![".git".to_string()]
}

impl Default for WorkspacePreferences {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            show_hidden: true,
            ignored_names: default_ignored_names(),
            watch: true,
        }
    }
}

impl WorkspacePreferences {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    fn sanitize(&mut self) {
        self.debounce_ms = self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
        self.ignored_names.retain(|name| !name.trim().is_empty());
        self.ignored_names.dedup();
    }
}

/// 提供 UI 的後端程序設定；`program` 為空時不啟動後端。 / The UI-serving backend; no backend is started when `program` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendPreferences {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// 為真時後端只取得 `env` 中的變數。 / When set, the backend sees only the variables in `env`.
    #[serde(default)]
    pub clear_env: bool,
    /// 後端的工作目錄；未設定時沿用目前目錄。 / Working directory for the backend (the current one when unset).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_host")]
    pub host: String,
    /// 固定連接埠；未設定時從 [`DEFAULT_BACKEND_PORT`] 起找第一個空閒的。 /
    /// Fixed port; when unset the first free one from [`DEFAULT_BACKEND_PORT`] upwards is used.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// 未設定連接埠時開始搜尋的位置。 / Where the port search starts when none is configured.
pub const DEFAULT_BACKEND_PORT: u16 = 8000;

fn default_startup_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl Default for BackendPreferences {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            clear_env: false,
            working_dir: None,
            host: default_host(),
            port: None,
            startup_timeout_ms: default_startup_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl BackendPreferences {
    /// `host:port` for a port chosen at start-up.
    pub fn address(&self, port: u16) -> String {
        format!("{}:{}", self.host, port)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    fn sanitize(&mut self) {
        if self
            .program
            .as_deref()
            .map_or(false, |program| program.trim().is_empty())
        {
            self.program = None;
        }
        if self.host.trim().is_empty() {
            self.host = default_host();
        }
        if self.port == Some(0) {
            self.port = None;
        }
        if self
            .working_dir
            .as_ref()
            .map_or(false, |dir| dir.as_os_str().is_empty())
        {
            self.working_dir = None;
        }
        if self.startup_timeout_ms == 0 {
            self.startup_timeout_ms = default_startup_timeout_ms();
        }
    }
}

/// 日誌設定。 / Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingPreferences {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingPreferences {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            directory: None,
        }
    }
}

impl LoggingPreferences {
    fn sanitize(&mut self) {
        if self.filter.trim().is_empty() {
            self.filter = default_filter();
        }
    }
}

#[derive(Debug)]
pub struct PreferencesStore {
    path: PathBuf,
    data: Preferences,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>, preferences: Preferences) -> Self {
        Self {
            path: path.into(),
            data: preferences,
        }
    }

    /// 讀取設定檔；檔案不存在時回傳預設值。 / Loads the preferences file, falling back to defaults when it is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut data = Preferences::default();
            data.sanitize();
            return Ok(Self { path, data });
        }

        let contents = fs::read_to_string(&path).map_err(|source| PreferencesError::Read {
            path: path.clone(),
            source,
        })?;
        let mut data: Preferences =
            serde_json::from_str(&contents).map_err(|source| PreferencesError::Parse {
                path: path.clone(),
                source,
            })?;
        data.sanitize();
        Ok(Self { path, data })
    }

    pub fn preferences(&self) -> &Preferences {
        &self.data
    }

    pub fn into_preferences(self) -> Preferences {
        self.data
    }

    pub fn update<F>(&mut self, mut op: F) -> Result<(), PreferencesError>
    where
        F: FnMut(&mut Preferences),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    /// 以暫存檔加上 rename 寫入。 / Writes via a temporary file and rename.
    pub fn save(&self) -> Result<(), PreferencesError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| PreferencesError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(&self.data).map_err(|source| {
            PreferencesError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| PreferencesError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| PreferencesError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
