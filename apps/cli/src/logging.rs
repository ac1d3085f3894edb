use std::io;

use anyhow::{Context, Result};
use rustcodium_settings::LoggingPreferences;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "RUSTCODIUM_LOG";

const LOG_FILE_PREFIX: &str = "rustcodium.log";

/// Keeps the file writer flushing until dropped.
/// （持有檔案寫入器；釋放時才停止寫出。）
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber. Logs go to stderr so stdout stays free for
/// the bridge; a daily rolling file is added when a directory is configured.
/// （安裝全域訂閱者。日誌寫到 stderr，保留 stdout 給橋接通道；設定目錄時另寫每日輪替檔案。）
pub fn init(preferences: &LoggingPreferences) -> Result<LoggingGuard> {
    let filter = build_filter(preferences);
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(true);

    let (file_layer, file_guard) = match &preferences.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    if let Some(dir) = &preferences.directory {
        tracing::debug!(log_dir = %dir.display(), "file logging enabled");
    }
    Ok(LoggingGuard { _file: file_guard })
}

fn build_filter(preferences: &LoggingPreferences) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&preferences.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
