//! TOML configuration loading shared by all three services, following
//! `braid-config-data`'s `parse_config_file` + relative-path-fixup pattern.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML deserialization error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The on-disk roots every service needs: where tracking CSVs live, and
/// where JPEG frames live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub csv_root: PathBuf,
    pub img_root: PathBuf,
}

/// Parse `fname` as TOML into `T`. Does not resolve relative paths inside
/// `T` — callers with path fields call [`fixup_relative_path`] themselves
/// the way `BraidConfig2::fixup_relative_paths` does, since only the
/// config struct knows which of its fields are paths.
pub fn parse_config_file<T: DeserializeOwned>(fname: impl AsRef<Path>) -> Result<T, ConfigError> {
    let fname = fname.as_ref();
    let contents = std::fs::read_to_string(fname).map_err(|source| ConfigError::Io {
        path: fname.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Toml {
        path: fname.to_path_buf(),
        source,
    })
}

/// If `path` is relative, make it relative to the directory containing the
/// config file that was parsed (`config_file_path`).
pub fn fixup_relative_path(path: &mut PathBuf, config_file_path: &Path) {
    if path.is_relative() {
        if let Some(dir) = config_file_path.parent() {
            *path = dir.join(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        n: u32,
    }

    #[test]
    fn parses_toml_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "name = \"x\"\nn = 7\n").unwrap();
        let parsed: Sample = parse_config_file(tmp.path()).unwrap();
        assert_eq!(parsed.name, "x");
        assert_eq!(parsed.n, 7);
    }

    #[test]
    fn fixup_relative_path_joins_config_dir() {
        let mut p = PathBuf::from("data/csv");
        fixup_relative_path(&mut p, Path::new("/etc/sentinelcam/camwatcher.toml"));
        assert_eq!(p, PathBuf::from("/etc/sentinelcam/data/csv"));
    }
}
