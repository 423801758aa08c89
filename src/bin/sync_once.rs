use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use media_sync::cdn::{CdnUploader, ImageKitClient};
use media_sync::config;
use media_sync::pipeline::Pipeline;
use media_sync::sync_log;
use media_sync::trigger;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one discovery pass against the product folder and print the summary"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Descriptors to check (defaults to trigger.page_size, or 10)
    #[arg(long)]
    page_size: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let page_size = args
        .page_size
        .or_else(|| cfg.trigger.as_ref().map(|t| t.page_size))
        .unwrap_or(10);

    let log = sync_log::open(&cfg).await?;
    let cdn: Arc<dyn CdnUploader> = Arc::new(ImageKitClient::from_config(&cfg)?);
    let pipeline = Pipeline::from_config(&cfg, cdn)?;

    info!(page_size, "running one sync pass");
    let summary = trigger::run_once(&pipeline, log.as_ref(), page_size)
        .await
        .context("sync pass failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
