use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use stevedore_http::Distribution;
use stevedore_storage::{purge_stale_uploads, DriverRegistry};

mod config;
use crate::config::Config;

#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    config_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .compact()
        .init();

    // load configuration
    let mut config_file = File::open(cli.config_file.unwrap_or("./dev-config.yml".into()))?;
    let mut s = String::new();
    config_file.read_to_string(&mut s)?;
    let config: Config = serde_yaml::from_str(&s)?;

    // initialize the storage backend
    let driver = config.storage.new_driver().await?;
    let mut registry = DriverRegistry::new(driver);
    if config.skip_dependency_verification {
        registry = registry.with_skipped_dependency_verification();
    }

    // periodic sweep of abandoned upload sessions
    let sweeper = registry.clone();
    let purge_age = chrono::Duration::seconds(config.uploads.purge_age_secs);
    let purge_interval = Duration::from_secs(config.uploads.purge_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match purge_stale_uploads(sweeper.driver(), sweeper.paths(), purge_age).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "swept stale upload sessions"),
                Err(e) => tracing::warn!("upload sweep failed: {e}"),
            }
        }
    });

    let distribution = Distribution::new(
        registry,
        config.http.secret.as_deref().map(str::as_bytes),
    );
    let router = distribution.router()?;

    // run the HTTP server
    tracing::info!(addr = %config.http.addr, "registry listening");
    axum::Server::bind(&config.http.addr)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
