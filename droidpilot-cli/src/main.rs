use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use droidpilot::ocr::{TextRecognizer, UniOcrRecognizer};
use droidpilot::{Collaborators, MemucController, RunLedger, Settings, TemplateStore};

mod menu;

#[derive(Parser, Debug)]
#[command(name = "droidpilot")]
#[command(about = "Run screen-driven workflows on Android emulator instances")]
struct Args {
    /// Settings file describing the emulator, paths and workflow
    #[arg(short, long, env = "DROIDPILOT_CONFIG", default_value = "config/settings.yaml")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(logs_dir: &Path, level: &str) -> WorkerGuard {
    if let Err(e) = std::fs::create_dir_all(logs_dir) {
        eprintln!("Failed to create log directory {}: {e}", logs_dir.display());
    }
    let file_appender = rolling::daily(logs_dir, "droidpilot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args.config)
        .with_context(|| format!("loading settings from {}", args.config.display()))?;
    let _guard = init_logging(&settings.paths.logs_dir, &args.log_level);
    info!(
        "Loaded workflow '{}' with {} checkpoints",
        settings.workflow.name,
        settings.workflow.checkpoints.len()
    );

    let controller = Arc::new(MemucController::new(
        settings.emulator.path.clone(),
        Duration::from_secs(settings.emulator.command_timeout_secs),
    ));
    let ocr: Option<Arc<dyn TextRecognizer>> = if settings.detector.keywords.is_empty() {
        None
    } else {
        Some(Arc::new(UniOcrRecognizer))
    };
    let collaborators = Collaborators {
        shell: controller.clone(),
        control: controller,
        ledger: Arc::new(RunLedger::new(settings.paths.ledger.clone())),
        templates: Arc::new(TemplateStore::new(settings.paths.assets_dir.clone())),
        ocr,
    };

    let stop = CancellationToken::new();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current checkpoint");
            ctrl_c.cancel();
        }
    });

    let console = menu::Console::new(Arc::new(settings), collaborators, stop);
    console.run().await
}
