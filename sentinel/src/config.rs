use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use sentinelcam_config::{fixup_relative_path, StorageConfig};
use sentinelcam_types::JobClass;
use serde::{Deserialize, Serialize};

use crate::ring::RingModel;
use crate::task::TaskDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineDescriptor {
    pub classes: Vec<JobClass>,
    #[serde(default)]
    pub accelerator: Option<String>,
    pub ring_buffers: String,
    /// Path to the `sentinel-engine` executable; defaults to a sibling of
    /// the scheduler binary when unset.
    #[serde(default)]
    pub exe_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SentinelConfig {
    pub control_addr: SocketAddr,
    pub result_addr: SocketAddr,
    /// Default data-access service this scheduler pulls frames from.
    pub datapump_addr: SocketAddr,
    /// Roots the job manager reads JPEGs and tracking CSVs from directly,
    /// bypassing the data-access service for the frame-feeding hot path.
    #[serde(flatten)]
    pub storage: StorageConfig,
    pub task_catalog: HashMap<String, TaskDescriptor>,
    pub engine_catalog: HashMap<String, EngineDescriptor>,
    /// `{model_name -> {slot_name -> (W,H,L)}}`. Each slot's [`RingModel::name`]
    /// is filled in from the inner map key by [`SentinelConfig::models_for`]
    /// if left blank in the TOML source.
    pub ring_buffer_models: HashMap<String, HashMap<String, RingModel>>,
    pub log_path: Option<PathBuf>,
    #[serde(default = "default_failure_limit")]
    pub failure_limit: u32,
}

fn default_failure_limit() -> u32 {
    3
}

impl SentinelConfig {
    /// Fill in each ring-model slot's `name` from its map key when the TOML
    /// source left it blank, and flatten `ring_buffer_models` for a given
    /// engine's `ring_buffers` catalog reference.
    pub fn models_for(&self, model_name: &str) -> Vec<RingModel> {
        self.ring_buffer_models
            .get(model_name)
            .map(|slots| {
                slots
                    .iter()
                    .map(|(key, model)| {
                        let mut model = model.clone();
                        if model.name.is_empty() {
                            model.name = key.clone();
                        }
                        model
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn fixup_relative_paths(&mut self, config_file_path: &std::path::Path) {
        fixup_relative_path(&mut self.storage.csv_root, config_file_path);
        fixup_relative_path(&mut self.storage.img_root, config_file_path);
        for task in self.task_catalog.values_mut() {
            fixup_relative_path(&mut task.config_path, config_file_path);
        }
        for engine in self.engine_catalog.values_mut() {
            if let Some(exe) = engine.exe_path.as_mut() {
                fixup_relative_path(exe, config_file_path);
            }
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
control_addr = "127.0.0.1:7200"
result_addr = "127.0.0.1:7201"
datapump_addr = "127.0.0.1:7100"
csv_root = "data/csv"
img_root = "data/img"

[task_catalog.NullTask]
class = 1
config_path = "tasks/null.toml"

[engine_catalog.engine-a]
classes = [1]
ring_buffers = "standard"

[ring_buffer_models.standard.small]
name = "small"
width = 640
height = 360
length = 8
"#;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), toml_src).unwrap();
        let cfg: SentinelConfig = sentinelcam_config::parse_config_file(tmp.path()).unwrap();
        assert_eq!(cfg.failure_limit, 3);
        assert_eq!(cfg.engine_catalog["engine-a"].classes, vec![JobClass(1)]);
        let models = cfg.models_for("standard");
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "small");
    }
}
