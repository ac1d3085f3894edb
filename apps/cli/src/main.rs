mod bridge;
mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rustcodium_core::{detect_language, DiskSnapshot};
use rustcodium_project::{
    list_directory, HostOptions, NodeKind, TreeFilter, Workspace, WorkspaceHost,
};
use rustcodium_runexec::{select_port, BackendSupervisor, PortChoice, RunSpec, ShutdownOutcome};
use rustcodium_settings::{BackendPreferences, Preferences, PreferencesStore, DEFAULT_BACKEND_PORT};

use crate::bridge::BridgeExit;

const STDIN_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);
/// Tells the backend which port was chosen for it.
const BACKEND_PORT_ENV: &str = "RUSTCODIUM_BACKEND_PORT";
/// Replaced by the chosen port in backend arguments.
const PORT_PLACEHOLDER: &str = "{port}";

#[derive(Parser)]
#[command(
    name = "rustcodium",
    about = "Workspace synchronisation core for the RustCodium editor",
    author,
    version
)]
struct Cli {
    /// 偏好設定檔路徑；未指定時使用預設值。 / Preferences file (defaults are used when omitted).
    #[arg(long, global = true, value_name = "FILE", env = "RUSTCODIUM_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 啟動後端與工作區主機，並透過 stdin/stdout 交換 JSON 行。 / Start the backend and workspace host, exchanging JSON lines over stdin/stdout.
    Run(RunArgs),
    /// 顯示檔案的編碼、行尾與語言。 / Show the encoding, line ending and language of files.
    Detect(DetectArgs),
    /// 列出目錄的直接子項目（目錄優先）。 / List the direct children of a directory, directories first.
    Tree(TreeArgs),
}

#[derive(Args)]
struct RunArgs {
    /// 工作區根目錄或要開啟的檔案。 / Workspace root, or a file to open inside its parent directory.
    #[arg(env = "RUSTCODIUM_INITIAL_PATH", value_name = "PATH")]
    path: Option<PathBuf>,

    /// 不監視檔案系統變更。 / Do not watch the file system for external changes.
    #[arg(long)]
    no_watch: bool,

    /// 不啟動設定中的後端程式。 / Do not start the configured backend program.
    #[arg(long)]
    no_backend: bool,

    /// 後端連接埠；必須空閒。未指定時自動尋找。 / Backend port, which must be free (picked automatically when omitted).
    #[arg(long, value_name = "PORT")]
    backend_port: Option<u16>,
}

#[derive(Args)]
struct DetectArgs {
    /// 要檢查的檔案。 / Files to inspect.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Args)]
struct TreeArgs {
    /// 要列出的目錄；預設為目前目錄。 / Directory to list (defaults to the current directory).
    path: Option<PathBuf>,

    /// 隱藏以點開頭的項目。 / Hide entries whose name starts with a dot.
    #[arg(long)]
    hide_hidden: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli { config, command } = Cli::parse();
    let preferences = load_preferences(config.as_deref())?;
    match command {
        Commands::Run(args) => execute_run(args, preferences),
        Commands::Detect(args) => execute_detect(args),
        Commands::Tree(args) => execute_tree(args, &preferences),
    }
}

fn load_preferences(path: Option<&Path>) -> Result<Preferences> {
    match path {
        Some(path) => Ok(PreferencesStore::load(path)?.into_preferences()),
        None => Ok(Preferences::default()),
    }
}

fn tree_filter(preferences: &Preferences) -> TreeFilter {
    TreeFilter {
        show_hidden: preferences.workspace.show_hidden,
        ignored_names: preferences.workspace.ignored_names.clone(),
    }
}

fn execute_run(args: RunArgs, preferences: Preferences) -> Result<()> {
    let _logging = logging::init(&preferences.logging)?;

    let mut supervisor = match (&preferences.backend.program, args.no_backend) {
        (Some(_), false) => Some(start_backend(&preferences.backend, args.backend_port)?),
        _ => None,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let served = runtime.block_on(serve_workspace(&args, &preferences));
    // The stdin reader may still be parked on a blocking read.
    runtime.shutdown_timeout(STDIN_SHUTDOWN_GRACE);

    if let Some(supervisor) = supervisor.as_mut() {
        match supervisor.shutdown(preferences.backend.shutdown_grace()) {
            Ok(ShutdownOutcome::Killed) => {
                tracing::warn!("backend ignored the termination request and was killed");
            }
            Ok(outcome) => tracing::info!(?outcome, "backend stopped"),
            Err(err) => tracing::error!(error = %err, "failed to stop backend"),
        }
    }
    served
}

fn start_backend(backend: &BackendPreferences, port_override: Option<u16>) -> Result<BackendSupervisor> {
    let Some(program) = backend.program.as_deref() else {
        bail!("no backend program configured");
    };
    let choice = match port_override.or(backend.port) {
        Some(port) => PortChoice::Fixed(port),
        None => PortChoice::FirstFreeFrom(DEFAULT_BACKEND_PORT),
    };
    let port = select_port(&backend.host, choice).context("cannot start backend")?;
    let spec = backend_spec(program, backend, port);

    let mut supervisor = BackendSupervisor::new(spec);
    supervisor
        .start()
        .with_context(|| format!("failed to start backend {program}"))?;
    let address = backend.address(port);
    supervisor
        .wait_until_ready(&address, backend.startup_timeout())
        .with_context(|| format!("backend did not become ready on {address}"))?;
    Ok(supervisor)
}

fn backend_spec(program: &str, backend: &BackendPreferences, port: u16) -> RunSpec {
    let port_text = port.to_string();
    let args = backend
        .args
        .iter()
        .map(|arg| arg.replace(PORT_PLACEHOLDER, &port_text));
    let mut spec = RunSpec::new(program)
        .with_args(args)
        .with_stdout_to_stderr();
    if backend.clear_env {
        spec = spec.clear_env();
    }
    if let Some(dir) = &backend.working_dir {
        spec = spec.with_working_dir(dir.clone());
    }
    for (key, value) in &backend.env {
        spec = spec.with_env(key.clone(), value.clone());
    }
    spec.with_env(BACKEND_PORT_ENV, port_text)
}

async fn serve_workspace(args: &RunArgs, preferences: &Preferences) -> Result<()> {
    let root = match &args.path {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let workspace = Workspace::open_root(&root, tree_filter(preferences))
        .with_context(|| format!("failed to open workspace {}", root.display()))?;
    tracing::info!(root = %workspace.root().display(), "workspace opened");

    let options = HostOptions {
        debounce: preferences.workspace.debounce(),
        ..HostOptions::default()
    };
    let (mut host, handle) = WorkspaceHost::new(workspace, options);
    if preferences.workspace.watch && !args.no_watch {
        if let Err(err) = host.start_watching() {
            tracing::warn!(error = %err, "file watching unavailable; external changes will not be detected");
        }
    }
    let host_task = tokio::spawn(host.run());

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    let exit = tokio::select! {
        exit = bridge::serve(&handle, stdin, stdout) => exit?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            BridgeExit::EndOfInput
        }
    };
    tracing::debug!(?exit, "bridge closed");

    if let Ok(unsaved) = handle.unsaved_paths().await {
        for path in unsaved {
            tracing::warn!(path = %path.display(), "closing with unsaved changes");
        }
    }
    let _ = handle.shutdown().await;
    host_task.await.context("workspace host panicked")?;
    Ok(())
}

fn execute_detect(args: DetectArgs) -> Result<()> {
    for path in &args.files {
        let snapshot = DiskSnapshot::read(path)
            .with_context(|| format!("failed to inspect {}", path.display()))?;
        println!(
            "{}: {}{} {} {}",
            path.display(),
            snapshot.encoding.name(),
            if snapshot.has_bom { " (BOM)" } else { "" },
            snapshot.line_ending.label(),
            detect_language(path)
        );
    }
    Ok(())
}

fn execute_tree(args: TreeArgs, preferences: &Preferences) -> Result<()> {
    let dir = match args.path {
        Some(path) => path,
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let mut filter = tree_filter(preferences);
    if args.hide_hidden {
        filter.show_hidden = false;
    }
    let entries =
        list_directory(&dir, &filter).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        match entry.kind {
            NodeKind::Directory => println!("{}/", entry.name),
            NodeKind::File => println!("{}", entry.name),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_spec_carries_the_chosen_port_and_preferences() {
        let mut backend = BackendPreferences {
            program: Some("python3".to_string()),
            args: vec!["-m".into(), "http.server".into(), "{port}".into()],
            clear_env: true,
            working_dir: Some(PathBuf::from("/srv/app")),
            ..BackendPreferences::default()
        };
        backend.env.insert("PYTHONUNBUFFERED".into(), "1".into());

        let spec = backend_spec("python3", &backend, 8042);
        assert_eq!(spec.args, vec!["-m", "http.server", "8042"]);
        assert!(spec.clear_env);
        assert_eq!(spec.working_dir.as_deref(), Some(Path::new("/srv/app")));
        assert_eq!(spec.env.get(BACKEND_PORT_ENV).map(String::as_str), Some("8042"));
        assert_eq!(spec.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
        assert!(spec.stdout_to_stderr);
    }
}
