use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use camwatcher::analytics::AnalyticsSubscriber;
use clap::Parser;
use sentinelcam_storage::StorageRoots;

#[derive(Parser, Debug)]
#[command(about = "SentinelCam post-event analytics subscriber subprocess")]
struct Args {
    /// The scheduler's unified result PUB.
    #[arg(long)]
    result_addr: SocketAddr,
    /// The ingest service's own CSV-writer REP.
    #[arg(long)]
    csv_addr: SocketAddr,
    #[arg(long)]
    csv_root: PathBuf,
    #[arg(long)]
    img_root: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Console-only: a separate OS process from the ingest service. See
    // camwatcher-imgwriter's rationale and DESIGN.md.
    let _log_guard = env_tracing_logger::initiate_logging::<&str>(None, false)?;

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let storage = StorageRoots::new(args.csv_root, args.img_root);
    let subscriber = Arc::new(AnalyticsSubscriber::new(storage, args.csv_addr));
    tracing::info!(result_addr = %args.result_addr, "analytics subscriber starting");
    subscriber.run(args.result_addr).await
}
