use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sentinel::config::SentinelConfig;
use sentinel::engine::{self, EngineOptions};

#[derive(Parser, Debug)]
#[command(about = "SentinelCam task-engine subprocess")]
struct Args {
    #[arg(long)]
    name: String,
    #[arg(long)]
    job_addr: SocketAddr,
    #[arg(long)]
    ring_addr: SocketAddr,
    #[arg(long)]
    result_addr: SocketAddr,
    #[arg(long, default_value_t = 3)]
    failure_limit: u32,
    /// Scheduler's own config file; only its `task_catalog` table is read.
    #[arg(long)]
    config_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Console-only: each engine is a separate OS process, and the file
    // layer in `env-tracing-logger` truncates on open, so sharing the
    // scheduler's log file across processes would race. See DESIGN.md.
    let _log_guard = env_tracing_logger::initiate_logging::<&str>(None, false)?;

    let config: SentinelConfig = sentinelcam_config::parse_config_file(&args.config_file)
        .with_context(|| format!("loading config from {}", args.config_file.display()))?;

    let opts = EngineOptions {
        name: args.name,
        job_addr: args.job_addr,
        ring_addr: args.ring_addr,
        result_addr: args.result_addr,
        failure_limit: args.failure_limit,
        task_catalog: Arc::new(config.task_catalog),
    };

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(engine::run(opts))
}
