use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use sentinelcam_config::{fixup_relative_path, StorageConfig};
use serde::{Deserialize, Serialize};

fn default_heartbeat_stale_after_secs() -> u64 {
    30
}

/// One outpost's wire endpoints, known either from the startup catalog or
/// learned at runtime via `CameraUp`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutpostDescriptor {
    pub node: String,
    pub view: String,
    pub image_publisher: SocketAddr,
    pub logger: SocketAddr,
}

/// Where completed events get submitted for post-event analytics. Absent
/// if this deployment of the ingest service runs with no scheduler agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerAgent {
    pub sentinel_addr: SocketAddr,
    /// Where the scheduler's unified result PUB listens, for the analytics
    /// subscriber.
    pub result_addr: SocketAddr,
    /// Task name submitted on `end`, if any.
    #[serde(default)]
    pub post_event_task: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CamwatcherConfig {
    pub control_addr: SocketAddr,
    /// REP endpoint the CSV writer serves for the out-of-process analytics
    /// subscriber.
    pub csv_addr: SocketAddr,
    #[serde(flatten)]
    pub storage: StorageConfig,
    /// Known outposts at startup, keyed by `node`. Additional outposts may
    /// register at runtime via `CameraUp`.
    #[serde(default)]
    pub outposts: HashMap<String, OutpostDescriptor>,
    #[serde(default)]
    pub scheduler: Option<SchedulerAgent>,
    /// Path to the `camwatcher-imgwriter` executable; defaults to a sibling
    /// of the ingest service binary when unset.
    #[serde(default)]
    pub imgwriter_exe: Option<PathBuf>,
    /// Path to the `camwatcher-analytics` executable.
    #[serde(default)]
    pub analytics_exe: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    #[serde(default = "default_heartbeat_stale_after_secs")]
    pub heartbeat_stale_after_secs: u64,
}

impl CamwatcherConfig {
    pub fn fixup_relative_paths(&mut self, config_file_path: &std::path::Path) {
        fixup_relative_path(&mut self.storage.csv_root, config_file_path);
        fixup_relative_path(&mut self.storage.img_root, config_file_path);
        if let Some(exe) = self.imgwriter_exe.as_mut() {
            fixup_relative_path(exe, config_file_path);
        }
        if let Some(exe) = self.analytics_exe.as_mut() {
            fixup_relative_path(exe, config_file_path);
        }
        if let Some(log_path) = self.log_path.as_mut() {
            fixup_relative_path(log_path, config_file_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml_src = r#"
control_addr = "127.0.0.1:7000"
csv_addr = "127.0.0.1:7001"
csv_root = "data/csv"
img_root = "data/img"

[outposts.n1]
node = "n1"
view = "front"
image_publisher = "127.0.0.1:8000"
logger = "127.0.0.1:8001"
"#;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), toml_src).unwrap();
        let cfg: CamwatcherConfig = sentinelcam_config::parse_config_file(tmp.path()).unwrap();
        assert_eq!(cfg.heartbeat_stale_after_secs, 30);
        assert_eq!(cfg.outposts["n1"].view, "front");
        assert!(cfg.scheduler.is_none());
    }
}
