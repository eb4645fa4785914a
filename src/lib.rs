pub mod classifier;
pub mod conversation;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod settings;
pub mod suggestions;
pub mod sync;
pub mod trigger;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use db::Database;
use engine::{EngineCommand, EngineController, EngineServices, HostEvent, StdoutSink};
use settings::SettingsStore;
use suggestions::HttpSuggestionService;
use sync::HttpBackendClient;
use utils::logging::preview;

fn data_dir() -> PathBuf {
    std::env::var_os("REPLYCUE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".replycue"))
}

fn settings_path(data_dir: &std::path::Path) -> PathBuf {
    std::env::var_os("REPLYCUE_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join("settings.json"))
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var); stdout is reserved for events
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(serve()) {
        error!("replycue stopped: {err:?}");
        std::process::exit(1);
    }
}

async fn serve() -> Result<()> {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings_store = SettingsStore::new(settings_path(&data_dir))?;
    let settings = settings_store
        .settings()
        .with_overrides(|key| std::env::var(key).ok());

    let database = Database::new(data_dir.join("replycue.sqlite3"))?;
    let suggestions = HttpSuggestionService::new(&settings.suggestions)
        .context("failed to configure suggestion service")?;
    let backend =
        HttpBackendClient::new(&settings.backend).context("failed to configure backend client")?;
    if settings.backend.token.is_none() {
        warn!("No backend token configured; messages will stay in the outbox until one is set");
    }

    let mut controller = EngineController::new();
    let engine = controller.start(
        settings,
        EngineServices {
            suggestions: Arc::new(suggestions),
            backend: Arc::new(backend),
            db: database,
            sink: Arc::new(StdoutSink),
        },
    )?;
    info!("Listening for host events on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<HostEvent>(line) {
                        Ok(event) => {
                            if engine.send(EngineCommand::from(event)).is_err() {
                                warn!("Engine stopped; ignoring further host events");
                                break;
                            }
                        }
                        Err(err) => warn!("Ignoring malformed host event ({err}): {}", preview(line, 120)),
                    }
                }
                None => {
                    info!("Host closed stdin");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    controller.stop().await
}
