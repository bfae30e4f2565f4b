use anyhow::{Context, Result};
use clap::Parser;
use dvrip_alarm::config::Config;
use dvrip_alarm::extractor::{CameraArchive, HybridExtractor};
use dvrip_alarm::poller::{AlarmPoller, AlarmStore, CameraMarkers, LogNotifier, MemoryPhotoStore};
use dvrip_alarm::vision::default_decoder;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt};

/// Polls a DVR-IP camera's event index and recovers a photo for each new alarm.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Also write the log to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(path: Option<&PathBuf>) -> Result<()> {
    let file_layer = match path {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };
    let console_layer = fmt::layer().with_ansi(!cfg!(windows));

    let collector = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(tracing_subscriber::filter::EnvFilter::from_default_env());
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing::info!(
        "polling {}:{} every {}s",
        config.camera.host,
        config.camera.port,
        config.poller.poll_interval().as_secs()
    );

    let archive = Arc::new(CameraArchive::new(config.camera.clone(), &config.extraction));
    let extractor = Arc::new(HybridExtractor::new(
        archive,
        config.extraction.clone(),
        default_decoder(),
    ));
    let source = Arc::new(CameraMarkers::new(
        config.camera.clone(),
        &config.scanner,
        &config.poller,
    ));
    let store = Arc::new(AlarmStore::new(config.poller.history_max));

    let poller = AlarmPoller::new(
        store,
        source,
        extractor,
        Arc::new(MemoryPhotoStore::default()),
        Arc::new(LogNotifier),
        config.poller.clone(),
    );

    poller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
