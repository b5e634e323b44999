pub mod bridge;
pub mod config;
pub mod document;
pub mod inference;
pub mod mcp_server;
pub mod tools;
pub mod transcription;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use bridge::owner_channel;
use config::{expand_tilde, BridgeConfig};
use document::{Document, ProjectStore};
use mcp_server::{Dispatcher, McpServer};
use tools::{register_all_tools, ToolContext};
use workspace::Workspace;

/// Environment variable consulted before `RUST_LOG` for the log filter.
pub const LOG_ENV_VAR: &str = "SUBBRIDGE_LOG";

/// Return the platform-standard data directory for Subbridge.
///
/// - macOS: `~/Library/Application Support/subbridge/`
/// - Windows: `{FOLDERID_RoamingAppData}\subbridge\`
/// - Linux: `$XDG_DATA_HOME/subbridge/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.subbridge/` only if none of the above can be resolved.
pub(crate) fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("subbridge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".subbridge")
}

/// Initialize the tracing subscriber, writing structured logs to the data
/// directory.
///
/// On each startup:
/// 1. Rotates existing logs (bridge.log → bridge.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh bridge.log with a line-flushing writer.
/// 3. Logs a startup banner with the log path.
fn init_tracing() -> std::io::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join("bridge.log");
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("subbridge=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== Subbridge starting ==="
    );
    Ok(log_path)
}

/// Rotate log files: `bridge.log` → `bridge.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so the
/// log survives a crash of the editor process.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Project store location: the configured path, or `project.db` in the data
/// directory.
fn resolve_project_path(config: &BridgeConfig) -> String {
    match &config.project.path {
        Some(path) if !path.is_empty() => expand_tilde(path),
        _ => {
            let dir = data_dir();
            let _ = std::fs::create_dir_all(&dir);
            dir.join("project.db").to_string_lossy().into_owned()
        }
    }
}

/// Wait for Ctrl-C on a small dedicated runtime, then stop the transport.
///
/// Dropping the server releases the last request-side owner handles, which
/// lets the owner loop finish once background transcriptions have drained.
fn stop_on_ctrl_c(mut server: McpServer) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    std::thread::Builder::new()
        .name("signal".into())
        .spawn(move || {
            let received = runtime.block_on(tokio::signal::ctrl_c());
            match received {
                Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
                Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl-C"),
            }
            server.stop();
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

/// Run the bridge until Ctrl-C.
///
/// The calling thread becomes the owner thread: it holds the [`Workspace`]
/// and drains the bridge queue until every handle is gone.
pub fn run() -> anyhow::Result<()> {
    let (config, config_path) = config::load_or_default().context("failed to load config")?;
    init_tracing().context("failed to initialize logging")?;
    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "config loaded"),
        None => tracing::info!("no config file found, using defaults"),
    }

    let project_path = resolve_project_path(&config);
    let store = ProjectStore::open(&project_path).context("failed to open project store")?;
    let document = Document::open(store).context("failed to load project")?;
    let mut ws = Workspace::new(document, config.stt.clone(), config.audio_llm.clone());

    let (owner, queue) = owner_channel::<Workspace>();
    let context = ToolContext::new(owner, Arc::clone(&ws.stt));
    let dispatcher = Arc::new(Dispatcher::new(register_all_tools(), context));

    let mut server = McpServer::new(dispatcher, &config.server.host, config.server.port);
    let addr = server.start()?;
    println!("subbridge listening on http://{addr}/mcp");
    stop_on_ctrl_c(server)?;

    let jobs = queue.run(&mut ws);
    tracing::info!(jobs, "owner loop finished");

    ws.document.save().context("failed to save project")?;
    tracing::info!(path = %project_path, "project saved, exiting");
    Ok(())
}
