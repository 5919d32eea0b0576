use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use camwatcher::config::CamwatcherConfig;
use camwatcher::dispatcher::Dispatcher;
use camwatcher::{control, csv_service};
use clap::Parser;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(about = "SentinelCam ingest service")]
struct Args {
    /// Path to a TOML configuration file.
    config_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config: CamwatcherConfig = sentinelcam_config::parse_config_file(&args.config_file)
        .with_context(|| format!("loading config from {}", args.config_file.display()))?;
    config.fixup_relative_paths(&args.config_file);

    let _log_guard = env_tracing_logger::initiate_logging(config.log_path.as_deref(), false)?;

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: CamwatcherConfig) -> anyhow::Result<()> {
    let dispatcher = Arc::new(Dispatcher::new(&config));

    for descriptor in config.outposts.values() {
        if let Err(e) = dispatcher.register_outpost(descriptor.clone()).await {
            tracing::warn!(node = %descriptor.node, view = %descriptor.view, error = %e, "failed registering startup outpost");
        }
    }

    if let Some(agent) = config.scheduler.as_ref() {
        let analytics_exe = config
            .analytics_exe
            .clone()
            .unwrap_or_else(|| PathBuf::from("camwatcher-analytics"));
        let child = std::process::Command::new(&analytics_exe)
            .arg("--result-addr")
            .arg(agent.result_addr.to_string())
            .arg("--csv-addr")
            .arg(config.csv_addr.to_string())
            .arg("--csv-root")
            .arg(&config.storage.csv_root)
            .arg("--img-root")
            .arg(&config.storage.img_root)
            .spawn()
            .with_context(|| format!("spawning analytics subscriber from {}", analytics_exe.display()))?;
        tracing::info!(result_addr = %agent.result_addr, "spawned analytics subscriber");
        std::thread::spawn(move || {
            let mut child = child;
            if let Ok(status) = child.wait() {
                tracing::warn!(%status, "analytics subscriber exited");
            }
        });
    }

    let stale_after = chrono::Duration::seconds(config.heartbeat_stale_after_secs as i64);
    let sweep_dispatcher = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            (config.heartbeat_stale_after_secs / 3).max(1),
        ));
        loop {
            ticker.tick().await;
            sweep_dispatcher.heartbeat_sweep(stale_after).await;
        }
    });

    let csv_listener = TcpListener::bind(config.csv_addr)
        .await
        .with_context(|| format!("binding csv socket on {}", config.csv_addr))?;
    let csv_tx = dispatcher.csv_sender();
    tokio::spawn(async move {
        if let Err(e) = csv_service::run(csv_listener, csv_tx).await {
            tracing::error!(error = %e, "csv service stopped");
        }
    });

    let control_listener = TcpListener::bind(config.control_addr)
        .await
        .with_context(|| format!("binding control socket on {}", config.control_addr))?;
    tracing::info!(addr = %config.control_addr, "camwatcher ingest service listening");
    control::run(control_listener, dispatcher).await
}
