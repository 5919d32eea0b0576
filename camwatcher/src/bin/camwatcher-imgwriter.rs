use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use camwatcher::imgwriter::{self, ImageWriterOptions};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "SentinelCam per-view image writer subprocess")]
struct Args {
    #[arg(long)]
    control_addr: SocketAddr,
    #[arg(long)]
    jpeg_addr: SocketAddr,
    #[arg(long)]
    topic_filter: String,
    #[arg(long)]
    img_root: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Console-only: each view's writer is a separate OS process, and the
    // file layer in `env-tracing-logger` truncates on open, so sharing the
    // ingest service's log file across processes would race. See DESIGN.md.
    let _log_guard = env_tracing_logger::initiate_logging::<&str>(None, false)?;

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(imgwriter::run(ImageWriterOptions {
        control_addr: args.control_addr,
        jpeg_addr: args.jpeg_addr,
        topic_filter: args.topic_filter,
        img_root: args.img_root,
    }))
}
