use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sentinel::config::SentinelConfig;
use sentinel::job_manager::{EngineRuntime, JobManager};
use sentinel::scheduler;
use sentinelcam_storage::StorageRoots;
use sentinelcam_wire::pubsub::Publisher;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(about = "SentinelCam analytics scheduler")]
struct Args {
    /// Path to a TOML configuration file.
    config_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config: SentinelConfig = sentinelcam_config::parse_config_file(&args.config_file)
        .with_context(|| format!("loading config from {}", args.config_file.display()))?;
    config.fixup_relative_paths(&args.config_file);

    let _log_guard = env_tracing_logger::initiate_logging(config.log_path.as_deref(), false)?;

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(run(config, args.config_file))
}

/// Each engine gets three deterministic ports derived from the scheduler's
/// own control port: job intake, ring wire, and its local result PUB.
fn engine_addrs(control_addr: SocketAddr, index: u16) -> (SocketAddr, SocketAddr, SocketAddr) {
    let base = control_addr.port();
    let mut job = control_addr;
    job.set_port(base + 1000 + index);
    let mut ring = control_addr;
    ring.set_port(base + 2000 + index);
    let mut result = control_addr;
    result.set_port(base + 3000 + index);
    (job, ring, result)
}

async fn run(config: SentinelConfig, config_file: PathBuf) -> anyhow::Result<()> {
    let storage = Arc::new(StorageRoots::new(
        config.storage.csv_root.clone(),
        config.storage.img_root.clone(),
    ));
    let task_catalog = Arc::new(config.task_catalog.clone());
    let result_pub: Publisher<sentinelcam_types::SchedulerMessage> = Publisher::new(1024);

    let job_manager = Arc::new(JobManager::new(
        Arc::clone(&storage),
        Arc::clone(&task_catalog),
        result_pub.clone(),
    ));

    let mut children = Vec::new();
    for (index, (name, engine)) in config.engine_catalog.iter().enumerate() {
        let (job_addr, ring_addr, result_addr) = engine_addrs(config.control_addr, index as u16);
        let models = config.models_for(&engine.ring_buffers);

        let exe = engine
            .exe_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("sentinel-engine"));
        let child = std::process::Command::new(&exe)
            .arg("--name")
            .arg(name)
            .arg("--job-addr")
            .arg(job_addr.to_string())
            .arg("--ring-addr")
            .arg(ring_addr.to_string())
            .arg("--result-addr")
            .arg(result_addr.to_string())
            .arg("--failure-limit")
            .arg(config.failure_limit.to_string())
            .arg("--config-file")
            .arg(&config_file)
            .spawn()
            .with_context(|| format!("spawning engine {name} from {}", exe.display()))?;
        tracing::info!(engine = %name, %job_addr, %ring_addr, %result_addr, "spawned engine");
        children.push(child);

        job_manager
            .register_engine(EngineRuntime::new(
                name.clone(),
                engine.classes.clone(),
                models,
                job_addr,
            ))
            .await;

        subscribe_engine_results(Arc::clone(&job_manager), name.clone(), result_addr);
    }
    // Reaped on a dedicated thread per child so a crashed engine's exit
    // status shows up in the log; supervised restart is not in scope (see
    // DESIGN.md).
    for mut child in children {
        std::thread::spawn(move || {
            if let Ok(status) = child.wait() {
                tracing::warn!(%status, "engine process exited");
            }
        });
    }

    let control_listener = TcpListener::bind(config.control_addr)
        .await
        .with_context(|| format!("binding control socket on {}", config.control_addr))?;
    tracing::info!(addr = %config.control_addr, "sentinel scheduler listening");

    let result_listener = TcpListener::bind(config.result_addr)
        .await
        .with_context(|| format!("binding result socket on {}", config.result_addr))?;
    let serving_pub = result_pub.clone();
    tokio::spawn(async move {
        serving_pub.serve(result_listener).await.ok();
    });

    scheduler::run_control(control_listener, job_manager).await
}

fn subscribe_engine_results(job_manager: Arc<JobManager>, name: String, result_addr: SocketAddr) {
    tokio::spawn(async move {
        loop {
            match sentinelcam_wire::pubsub::Subscriber::<sentinelcam_types::EngineEnvelope>::connect(
                result_addr,
                "",
            )
            .await
            {
                Ok(mut sub) => loop {
                    match sub.recv().await {
                        Ok((_, envelope)) => job_manager.on_engine_envelope(&name, envelope).await,
                        Err(e) => {
                            tracing::warn!(engine = %name, error = %e, "lost engine result stream");
                            break;
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(engine = %name, error = %e, "could not connect to engine result stream");
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    });
}
