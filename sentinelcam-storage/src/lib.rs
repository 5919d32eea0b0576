//! On-disk storage layout: `<ROOT>/YYYY-MM-DD/` date folders holding the
//! append-only date index, per-`(event, type)` tracking CSVs, and (under a
//! separate image root) the JPEG frames.

pub mod date_index;
pub mod images;
pub mod purge;
pub mod tracking_csv;

use std::path::{Path, PathBuf};

use sentinelcam_types::{EventId, TypeTag};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// The two storage roots a service is configured with.
#[derive(Clone, Debug)]
pub struct StorageRoots {
    pub csv_root: PathBuf,
    pub img_root: PathBuf,
}

impl StorageRoots {
    pub fn new(csv_root: impl Into<PathBuf>, img_root: impl Into<PathBuf>) -> Self {
        Self {
            csv_root: csv_root.into(),
            img_root: img_root.into(),
        }
    }

    pub fn date_csv_dir(&self, date: &str) -> PathBuf {
        self.csv_root.join(date)
    }

    pub fn date_img_dir(&self, date: &str) -> PathBuf {
        self.img_root.join(date)
    }

    pub fn index_path(&self, date: &str) -> PathBuf {
        self.date_csv_dir(date).join("camwatcher.csv")
    }

    pub fn tracking_csv_path(&self, date: &str, event_id: &EventId, type_tag: TypeTag) -> PathBuf {
        self.date_csv_dir(date)
            .join(format!("{event_id}_{type_tag}.csv"))
    }

    /// List calendar dates with data present, newest first. Mirrors the
    /// `dat` data-access command.
    pub fn available_dates(&self) -> Result<Vec<String>, StorageError> {
        let mut dates = Vec::new();
        if !self.csv_root.exists() {
            return Ok(dates);
        }
        let entries = std::fs::read_dir(&self.csv_root).map_err(|source| StorageError::Io {
            path: self.csv_root.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                path: self.csv_root.clone(),
                source,
            })?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if is_date_folder(name) {
                        dates.push(name.to_string());
                    }
                }
            }
        }
        dates.sort_unstable();
        dates.reverse();
        Ok(dates)
    }
}

fn is_date_folder(name: &str) -> bool {
    name.len() == 10
        && name.as_bytes()[4] == b'-'
        && name.as_bytes()[7] == b'-'
        && name.chars().enumerate().all(|(i, c)| match i {
            4 | 7 => c == '-',
            _ => c.is_ascii_digit(),
        })
}

/// Ensure a date folder exists under `root`, creating it lazily.
pub fn ensure_date_dir(dir: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(dir).map_err(|source| StorageError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_date_folder_names() {
        assert!(is_date_folder("2026-07-30"));
        assert!(!is_date_folder("2026-07-3"));
        assert!(!is_date_folder("not-a-date"));
    }

    #[test]
    fn available_dates_returns_empty_for_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = StorageRoots::new(tmp.path().join("nope"), tmp.path().join("imgs"));
        assert!(roots.available_dates().unwrap().is_empty());
    }

    #[test]
    fn available_dates_sorted_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = StorageRoots::new(tmp.path(), tmp.path());
        ensure_date_dir(&roots.date_csv_dir("2026-01-01")).unwrap();
        ensure_date_dir(&roots.date_csv_dir("2026-03-01")).unwrap();
        ensure_date_dir(&roots.date_csv_dir("2026-02-01")).unwrap();
        assert_eq!(
            roots.available_dates().unwrap(),
            vec!["2026-03-01", "2026-02-01", "2026-01-01"]
        );
    }
}
