use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use bulk_dl_engine::config::EngineConfig;
use bulk_dl_engine::engine::manager::SessionManager;
use bulk_dl_engine::logging::init_tracing;
use bulk_dl_engine::server::handler::ApiServer;
use bulk_dl_engine::source::http_source::HttpBulkDownloader;

#[derive(Debug, Parser)]
#[command(name = "bulk-dl", version, about = "Bulk-download session server")]
struct Cli {
    /// TOML config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    let downloader = Arc::new(HttpBulkDownloader::new(&config)?);
    let manager = Arc::new(SessionManager::new(downloader));
    let server = ApiServer::start(Arc::clone(&manager), &config.bind).await?;
    info!("bulk-dl ready at http://{}", server.addr());

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    manager
        .shutdown(Duration::from_secs(config.shutdown_grace_secs))
        .await;
    server.shutdown();
    Ok(())
}
