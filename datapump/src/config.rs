use std::net::SocketAddr;
use std::path::PathBuf;

use sentinelcam_config::{fixup_relative_path, StorageConfig};
use serde::{Deserialize, Serialize};

fn default_shutdown_grace_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatapumpConfig {
    pub control_addr: SocketAddr,
    #[serde(flatten)]
    pub storage: StorageConfig,
    pub log_path: Option<PathBuf>,
    /// Seconds the background purge worker is given to drain its queue
    /// before the process exits.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl DatapumpConfig {
    pub fn fixup_relative_paths(&mut self, config_file_path: &std::path::Path) {
        fixup_relative_path(&mut self.storage.csv_root, config_file_path);
        fixup_relative_path(&mut self.storage.img_root, config_file_path);
        if let Some(log_path) = self.log_path.as_mut() {
            fixup_relative_path(log_path, config_file_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinelcam_config::parse_config_file;

    #[test]
    fn parses_minimal_config() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            r#"
control_addr = "127.0.0.1:7100"
csv_root = "data/csv"
img_root = "data/img"
"#,
        )
        .unwrap();
        let cfg: DatapumpConfig = parse_config_file(tmp.path()).unwrap();
        assert_eq!(cfg.shutdown_grace_secs, 5);
    }
}
