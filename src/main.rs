mod catalog;
mod cli;
mod config;
mod error;
mod fetcher;
mod image;
mod pipeline;
mod simplestreams;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{info, warn};

use catalog::{CloudsFile, GlanceClient};
use cli::Cli;
use config::Config;
use fetcher::FetcherSet;
use pipeline::Exit;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level, cli.log_format())?;

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("cannot load configuration from {}", cli.config.display()))?;

    let clouds_file = cli.clouds_file.as_deref().or(config.catalog().clouds_file().map(|p| p.as_path()));
    let clouds = CloudsFile::load(clouds_file).context("cannot load clouds.yaml")?;
    let cloud_name = cli
        .cloud
        .as_deref()
        .or(config.catalog().cloud())
        .ok_or_else(|| anyhow!("no cloud selected: pass --cloud, set OS_CLOUD or catalog.cloud"))?;
    let cloud = clouds.cloud(cloud_name)?;

    // No request timeout here: image uploads are long-running.
    let glance = GlanceClient::connect(reqwest::Client::new(), cloud)
        .await
        .with_context(|| format!("cannot connect to cloud '{cloud_name}'"))?;

    let fetchers = Arc::new(FetcherSet::from_config(&config).context("cannot set up fetchers")?);
    if fetchers.is_empty() {
        warn!(config = %cli.config.display(), "no images configured, nothing to sync");
    }

    let exit = pipeline::run(
        &config,
        Arc::new(glance),
        fetchers,
        cli.mode(),
        pipeline::termination_signal(),
    )
    .await;

    match exit {
        Exit::Completed => info!("run complete"),
        Exit::Signalled => info!("stopped by signal"),
    }
    Ok(())
}
