use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use datapump::{DatapumpConfig, DatapumpService};
use sentinelcam_storage::StorageRoots;
use sentinelcam_wire::reqrep::serve;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(about = "SentinelCam data-access service")]
struct Args {
    /// Path to a TOML configuration file.
    config_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config: DatapumpConfig = sentinelcam_config::parse_config_file(&args.config_file)
        .with_context(|| format!("loading config from {}", args.config_file.display()))?;
    config.fixup_relative_paths(&args.config_file);

    let _log_guard =
        env_tracing_logger::initiate_logging(config.log_path.as_deref(), false)?;

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: DatapumpConfig) -> anyhow::Result<()> {
    let roots = StorageRoots::new(config.storage.csv_root.clone(), config.storage.img_root.clone());
    let purge_tx = datapump::purge_worker::spawn(roots.clone());
    let service = DatapumpService::new(roots, purge_tx);

    let listener = TcpListener::bind(config.control_addr)
        .await
        .with_context(|| format!("binding control socket on {}", config.control_addr))?;
    tracing::info!(addr = %config.control_addr, "datapump listening");

    serve(listener, move |req| {
        let service = service.clone();
        async move { service.handle(req).await }
    })
    .await
    .context("serving data-access requests")?;

    Ok(())
}
