use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use media_sync::cdn::{CdnUploader, ImageKitClient};
use media_sync::config;
use media_sync::pipeline::Pipeline;
use media_sync::server::{self, AppState};
use media_sync::shutdown::shutdown_signal;
use media_sync::sync_log::{self, SyncLog};
use media_sync::trigger::Authorizer;
use media_sync::watch::{InMemoryProcessedSet, IntervalTicker, WatchLoop};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Watch the product folder and sync descriptor photos to the CDN"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Do not start the HTTP trigger even when configured
    #[arg(long)]
    no_trigger: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let log: Arc<dyn SyncLog> = Arc::from(sync_log::open(&cfg).await?);
    let cdn: Arc<dyn CdnUploader> = Arc::new(ImageKitClient::from_config(&cfg)?);
    if let Err(err) = cdn.ping().await {
        warn!(error = %format!("{:#}", err), "CDN connectivity check failed; uploads may fail");
    }
    let pipeline = Arc::new(Pipeline::from_config(&cfg, cdn)?);

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    let ticker = IntervalTicker::new(cfg.poll_interval(), cancel.clone());
    let mut watch = WatchLoop::new(pipeline.clone(), log.clone(), cfg.app.page_size);
    info!(
        interval_secs = cfg.app.poll_interval_secs,
        folder = %cfg.drive.folder_id,
        "starting watch loop"
    );
    tasks.push(tokio::spawn(async move {
        let mut processed = InMemoryProcessedSet::default();
        watch.run(ticker, &mut processed).await;
    }));

    match cfg.trigger.as_ref() {
        Some(trigger) if !args.no_trigger => {
            let state = Arc::new(AppState {
                pipeline: Some(pipeline.clone()),
                log: log.clone(),
                auth: Authorizer::from_config(trigger),
                page_size: trigger.page_size,
            });
            let listen = trigger.listen.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = server::serve(&listen, state, cancel).await {
                    error!(?err, "trigger server stopped");
                }
            }));
        }
        _ => info!("trigger server disabled"),
    }

    shutdown_signal()?.await;
    info!("shutdown requested; finishing current work");
    cancel.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            error!(?err, "task panicked");
        }
    }
    info!("shutdown complete");
    Ok(())
}

